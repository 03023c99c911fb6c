use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};

/// Sort key for dates that could not be normalized. Lexicographically after
/// every real `YYYYMMDD` key, so unparseable dates sort last, never first.
pub const UNPARSEABLE_KEY: &str = "99999999";

pub fn format_dmy(date: NaiveDate) -> String {
    format!("{:02}/{:02}/{:04}", date.day(), date.month(), date.year())
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// `DD/MM/YYYY` shaped input (for key extraction; day/month not validated).
fn is_dmy_shape(s: &str) -> bool {
    let b = s.as_bytes();
    s.len() == 10
        && b[2] == b'/'
        && b[5] == b'/'
        && all_digits(&s[0..2])
        && all_digits(&s[3..5])
        && all_digits(&s[6..10])
}

/// Canonical input is passed through as-is. A month slot above 12 is not
/// canonical; it falls to the ambiguity heuristic and gets swapped.
fn is_canonical_dmy(s: &str) -> bool {
    if !is_dmy_shape(s) {
        return false;
    }
    matches!(s[3..5].parse::<u32>(), Ok(1..=12))
}

fn iso_date_prefix(s: &str) -> Option<(u32, u32, i32)> {
    let b = s.as_bytes();
    if b.len() < 10 || b[4] != b'-' || b[7] != b'-' {
        return None;
    }
    let digits = |range: std::ops::Range<usize>| b[range].iter().all(u8::is_ascii_digit);
    if !(digits(0..4) && digits(5..7) && digits(8..10)) {
        return None;
    }
    // The first ten bytes are ASCII, so string slicing cannot split a char.
    let year: i32 = s[0..4].parse().ok()?;
    let month: u32 = s[5..7].parse().ok()?;
    let day: u32 = s[8..10].parse().ok()?;
    Some((day, month, year))
}

fn split_ambiguous(s: &str) -> Option<(u32, u32, &str)> {
    let sep = if s.contains('/') { '/' } else { '-' };
    let mut parts = s.split(sep);
    let a = parts.next()?;
    let b = parts.next()?;
    let year = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    if a.len() > 2 || b.len() > 2 || year.len() != 4 {
        return None;
    }
    if !(all_digits(a) && all_digits(b) && all_digits(year)) {
        return None;
    }
    Some((a.parse().ok()?, b.parse().ok()?, year))
}

fn parse_generic(s: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    NaiveDate::parse_from_str(s, "%Y/%m/%d").ok()
}

/// Normalize a heterogeneous date string to canonical `DD/MM/YYYY`.
///
/// Precedence: canonical passthrough, ISO with time, plain ISO, ambiguous
/// `A/B/YYYY` (day-first unless the second slot cannot be a month), then a
/// generic parse. Unparseable input is returned unchanged; this never fails.
///
/// The `A/B/YYYY` heuristic is lossy when both components are <= 12
/// (`03/04/2024` is always read day-first). Known limitation, kept as-is.
pub fn normalize(raw: &str) -> String {
    let s = raw.trim();
    if s.is_empty() {
        return String::new();
    }

    if is_canonical_dmy(s) {
        return s.to_string();
    }

    // ISO with a time component. The prefix fallback must not fail even when
    // full parsing rejects a malformed zone suffix.
    if s.len() > 10 && s.as_bytes().get(10) == Some(&b'T') {
        if let Some(date) = parse_generic(s) {
            return format_dmy(date);
        }
        if let Some((d, m, y)) = iso_date_prefix(s) {
            return format!("{d:02}/{m:02}/{y:04}");
        }
        return s.to_string();
    }

    if s.len() == 10 {
        if let Some((d, m, y)) = iso_date_prefix(s) {
            return format!("{d:02}/{m:02}/{y:04}");
        }
    }

    if let Some((a, b, year)) = split_ambiguous(s) {
        // Second slot > 12 cannot be a month, so the input was month-first.
        if b > 12 && (1..=12).contains(&a) {
            return format!("{b:02}/{a:02}/{year}");
        }
        return format!("{a:02}/{b:02}/{year}");
    }

    match parse_generic(s) {
        Some(date) => format_dmy(date),
        None => s.to_string(),
    }
}

/// Normalize a loosely typed spreadsheet cell. Numbers are treated as epoch
/// milliseconds and formatted from the UTC calendar date.
pub fn normalize_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => normalize(s),
        serde_json::Value::Number(n) => match n.as_i64().and_then(DateTime::from_timestamp_millis)
        {
            Some(dt) => format_dmy(dt.date_naive()),
            None => n.to_string(),
        },
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Rearrange a (normalizable) date into a lexicographically sortable
/// `YYYYMMDD` key. Unparseable input maps to [`UNPARSEABLE_KEY`].
pub fn sortable_key(raw: &str) -> String {
    let dmy = normalize(raw);
    if is_dmy_shape(&dmy) {
        format!("{}{}{}", &dmy[6..10], &dmy[3..5], &dmy[0..2])
    } else {
        UNPARSEABLE_KEY.to_string()
    }
}

/// Strict key for already-canonical `DD/MM/YYYY` strings; `None` otherwise.
/// Used where malformed dates should sort first (baseline ordering) rather
/// than last.
pub fn strict_key(dmy: &str) -> Option<String> {
    if is_dmy_shape(dmy) {
        Some(format!("{}{}{}", &dmy[6..10], &dmy[3..5], &dmy[0..2]))
    } else {
        None
    }
}

/// Chronological key for a rollup event: ISO input keeps its own date,
/// anything else goes through the normalizer. Empty when neither works.
pub fn event_key(raw: &str) -> String {
    let s = raw.trim();
    if let Some((d, m, y)) = iso_date_prefix(s) {
        return format!("{y:04}{m:02}{d:02}");
    }
    strict_key(&normalize(s)).unwrap_or_default()
}

pub fn sortable_key_for(date: NaiveDate) -> String {
    format!("{:04}{:02}{:02}", date.year(), date.month(), date.day())
}

/// Key of the Saturday ending the week of `today` (Sunday rolls forward to
/// the next Saturday, reproducing the original weekday arithmetic).
pub fn end_of_week_key(today: NaiveDate) -> String {
    let to_saturday = 6 - today.weekday().num_days_from_sunday() as i64;
    sortable_key_for(today + Duration::days(to_saturday))
}

/// `YYYY-MM` bucket of a canonical `DD/MM/YYYY` date.
pub fn month_key(dmy: &str) -> Option<String> {
    strict_key(dmy).map(|k| format!("{}-{}", &k[0..4], &k[4..6]))
}

/// `YYYY` of a canonical `DD/MM/YYYY` date.
pub fn year_key(dmy: &str) -> Option<String> {
    strict_key(dmy).map(|k| k[0..4].to_string())
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Where a follow-up due date falls relative to a reference day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueBucket {
    None,
    Overdue,
    Today,
    Week,
    Later,
}

impl DueBucket {
    pub fn label(self) -> &'static str {
        match self {
            DueBucket::None => "none",
            DueBucket::Overdue => "overdue",
            DueBucket::Today => "today",
            DueBucket::Week => "this week",
            DueBucket::Later => "later",
        }
    }
}

pub fn classify_due(due: &str, today: NaiveDate) -> DueBucket {
    if due.trim().is_empty() {
        return DueBucket::None;
    }
    let key = sortable_key(due);
    let today_key = sortable_key_for(today);
    if key == today_key {
        DueBucket::Today
    } else if key < today_key {
        DueBucket::Overdue
    } else if key <= end_of_week_key(today) {
        DueBucket::Week
    } else {
        DueBucket::Later
    }
}
