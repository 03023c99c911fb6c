use chrono::{Datelike, NaiveDate};

use crate::dates::{self, DueBucket};
use crate::models::{max_grade, Assessment, Grade, PhoneLog};

/// Headline numbers for the dashboard view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Kpis {
    pub total_patients: usize,
    pub saved_assessments: usize,
    pub phone_followups: usize,
    pub due_today: usize,
    pub due_week: usize,
    pub overdue: usize,
    pub next7: usize,
    pub tox_yes: usize,
    pub tox_pct: i64,
    pub most_common: &'static str,
    pub hospitalized: usize,
}

pub fn compute_kpis(assessments: &[Assessment], phone_logs: &[PhoneLog], today: NaiveDate) -> Kpis {
    let mut ids: Vec<&str> = assessments
        .iter()
        .map(|r| r.id.trimmed())
        .filter(|id| !id.is_empty())
        .collect();
    ids.sort_unstable();
    ids.dedup();

    let today_key = dates::sortable_key_for(today);
    let eow_key = dates::end_of_week_key(today);
    let next7_key = dates::sortable_key_for(today + chrono::Duration::days(7));

    let mut due_today = 0;
    let mut overdue = 0;
    let mut due_week = 0;
    let mut next7 = 0;
    for r in assessments {
        if r.followup_due.is_empty() {
            continue;
        }
        let key = dates::sortable_key(r.followup_due.trimmed());
        if key == dates::UNPARSEABLE_KEY {
            continue;
        }
        if key < today_key {
            overdue += 1;
        } else if key == today_key {
            due_today += 1;
        }
        if key > today_key && key <= eow_key {
            due_week += 1;
        }
        if key > today_key && key <= next7_key {
            next7 += 1;
        }
    }

    let tox_yes = assessments
        .iter()
        .filter(|r| r.toxicity_found.trimmed().eq_ignore_ascii_case("yes"))
        .count();
    let tox_pct = if assessments.is_empty() {
        0
    } else {
        (tox_yes as f64 * 100.0 / assessments.len() as f64).round() as i64
    };

    let symptomatic = |cell: &crate::models::Cell| {
        Grade::parse(cell.trimmed()).is_some_and(|g| g > Grade::G0)
    };
    let counts = [
        (
            "Mucositis",
            assessments.iter().filter(|r| symptomatic(&r.mucositis_grade)).count(),
        ),
        (
            "Diarrhea",
            assessments.iter().filter(|r| symptomatic(&r.diarrhea_grade)).count(),
        ),
        (
            "Neutropenia",
            assessments.iter().filter(|r| symptomatic(&r.neutropenia_grade)).count(),
        ),
        (
            "Other",
            assessments.iter().filter(|r| !r.other_tox_name.is_empty()).count(),
        ),
    ];
    // First entry wins ties, matching the fixed display order.
    let most_common = counts
        .iter()
        .fold(counts[0], |best, item| if item.1 > best.1 { *item } else { best })
        .0;

    let hospitalized = assessments
        .iter()
        .filter(|r| {
            r.hospitalization_due_tox
                .trimmed()
                .eq_ignore_ascii_case("yes")
        })
        .count();

    Kpis {
        total_patients: ids.len(),
        saved_assessments: assessments.len(),
        phone_followups: phone_logs.len(),
        due_today,
        due_week,
        overdue,
        next7,
        tox_yes,
        tox_pct,
        most_common,
        hospitalized,
    }
}

/// Follow-up due counts per bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DueCounts {
    pub overdue: usize,
    pub today: usize,
    pub week: usize,
    pub later: usize,
    pub none: usize,
}

pub fn due_counts(assessments: &[Assessment], today: NaiveDate) -> DueCounts {
    let mut counts = DueCounts::default();
    for r in assessments {
        match dates::classify_due(r.followup_due.trimmed(), today) {
            DueBucket::None => counts.none += 1,
            DueBucket::Overdue => counts.overdue += 1,
            DueBucket::Today => counts.today += 1,
            DueBucket::Week => counts.week += 1,
            DueBucket::Later => counts.later += 1,
        }
    }
    counts
}

pub fn due_in_bucket<'a>(
    assessments: &'a [Assessment],
    bucket: DueBucket,
    today: NaiveDate,
) -> Vec<&'a Assessment> {
    let mut rows: Vec<&Assessment> = assessments
        .iter()
        .filter(|r| dates::classify_due(r.followup_due.trimmed(), today) == bucket)
        .collect();
    rows.sort_by_key(|r| {
        (
            dates::sortable_key(r.followup_due.trimmed()),
            r.name.trimmed().to_string(),
        )
    });
    rows
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonthRange {
    /// Trailing 12 calendar months ending with the current one.
    Trailing12,
    /// January through December of the current year.
    ThisYear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthlySeries {
    pub axis: Vec<String>,
    pub values: Vec<usize>,
}

fn shift_month(year: i32, month: u32, back: u32) -> (i32, u32) {
    let total = year * 12 + month as i32 - 1 - back as i32;
    (total.div_euclid(12), total.rem_euclid(12) as u32 + 1)
}

/// Assessments per `YYYY-MM` bucket over a fixed axis; dates after `today`
/// are excluded as data-entry noise.
pub fn monthly_counts(assessments: &[Assessment], range: MonthRange, today: NaiveDate) -> MonthlySeries {
    let today_key = dates::sortable_key_for(today);
    let mut by_month: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();
    for r in assessments {
        let dmy = r.assessment_date.trimmed();
        let Some(strict) = dates::strict_key(dmy) else {
            continue;
        };
        if strict > today_key {
            continue;
        }
        if let Some(ym) = dates::month_key(dmy) {
            *by_month.entry(ym).or_default() += 1;
        }
    }

    let axis: Vec<String> = match range {
        MonthRange::ThisYear => (1..=12)
            .map(|m| format!("{}-{m:02}", today.year()))
            .collect(),
        MonthRange::Trailing12 => (0..12)
            .rev()
            .map(|back| {
                let (y, m) = shift_month(today.year(), today.month(), back);
                format!("{y}-{m:02}")
            })
            .collect(),
    };
    let values = axis
        .iter()
        .map(|k| by_month.get(k).copied().unwrap_or(0))
        .collect();
    MonthlySeries { axis, values }
}

/// Distribution of each record's worst grade across the three tracked
/// symptoms. `none` counts records with no valid grade at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GradeDistribution {
    pub grades: [usize; 5],
    pub none: usize,
}

pub fn grade_distribution(assessments: &[Assessment]) -> GradeDistribution {
    let mut dist = GradeDistribution::default();
    for r in assessments {
        let worst = max_grade([
            r.mucositis_grade.as_str(),
            r.diarrhea_grade.as_str(),
            r.neutropenia_grade.as_str(),
        ]);
        match worst {
            Some(grade) => dist.grades[grade.ordinal() as usize] += 1,
            None => dist.none += 1,
        }
    }
    dist
}

/// Regimen usage, most used first, capped at the top 12.
pub fn regimen_usage(assessments: &[Assessment]) -> Vec<(String, usize)> {
    let mut by_regimen: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
    for r in assessments {
        let regimen = r.regimen.trimmed();
        if regimen.is_empty() {
            continue;
        }
        *by_regimen.entry(regimen).or_default() += 1;
    }
    let mut entries: Vec<(String, usize)> = by_regimen
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(12);
    entries
}

/// Stage breakdown split by whether toxicity was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageBreakdown {
    pub stages: [&'static str; 5],
    pub yes: [usize; 5],
    pub no: [usize; 5],
}

pub fn stage_breakdown(assessments: &[Assessment]) -> StageBreakdown {
    let stages = ["1", "2", "3", "4", "—"];
    let mut yes = [0usize; 5];
    let mut no = [0usize; 5];
    for r in assessments {
        let stage = r.stage.trimmed();
        let idx = stages.iter().position(|s| *s == stage).unwrap_or(4);
        let found = r.toxicity_found.trimmed().eq_ignore_ascii_case("yes");
        if found {
            yes[idx] += 1;
        } else {
            no[idx] += 1;
        }
    }
    StageBreakdown { stages, yes, no }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cell;

    fn assessment(id: &str, due: &str, date: &str) -> Assessment {
        let mut row = Assessment::default();
        row.id = Cell::from(id);
        row.name = Cell::from(format!("Patient {id}"));
        row.followup_due = Cell::from(due);
        row.assessment_date = Cell::from(date);
        row
    }

    fn today() -> NaiveDate {
        // A Wednesday; the week ends Saturday 2024-03-09.
        NaiveDate::from_ymd_opt(2024, 3, 6).unwrap()
    }

    #[test]
    fn kpis_count_due_windows() {
        let rows = vec![
            assessment("1", "06/03/2024", "01/03/2024"),
            assessment("2", "05/03/2024", "01/03/2024"),
            assessment("3", "09/03/2024", "01/03/2024"),
            assessment("4", "12/03/2024", "01/03/2024"),
            assessment("5", "", "01/03/2024"),
            assessment("1", "20/03/2024", "02/03/2024"),
        ];
        let kpis = compute_kpis(&rows, &[], today());
        assert_eq!(kpis.total_patients, 5);
        assert_eq!(kpis.saved_assessments, 6);
        assert_eq!(kpis.due_today, 1);
        assert_eq!(kpis.overdue, 1);
        assert_eq!(kpis.due_week, 1);
        // Due-week and next-7 overlap but are counted independently.
        assert_eq!(kpis.next7, 2);
    }

    #[test]
    fn kpis_toxicity_percentage() {
        let mut with_tox = assessment("1", "", "01/03/2024");
        with_tox.toxicity_found = Cell::from("Yes");
        let rows = vec![
            with_tox,
            assessment("2", "", "01/03/2024"),
            assessment("3", "", "01/03/2024"),
        ];
        let kpis = compute_kpis(&rows, &[], today());
        assert_eq!(kpis.tox_yes, 1);
        assert_eq!(kpis.tox_pct, 33);
    }

    #[test]
    fn most_common_symptom_prefers_display_order_on_ties() {
        let kpis = compute_kpis(&[], &[], today());
        assert_eq!(kpis.most_common, "Mucositis");

        let mut row = assessment("1", "", "01/03/2024");
        row.diarrhea_grade = Cell::from("G2");
        let kpis = compute_kpis(&[row], &[], today());
        assert_eq!(kpis.most_common, "Diarrhea");
    }

    #[test]
    fn due_counts_cover_every_bucket() {
        let rows = vec![
            assessment("1", "", "01/03/2024"),
            assessment("2", "01/03/2024", "01/03/2024"),
            assessment("3", "06/03/2024", "01/03/2024"),
            assessment("4", "08/03/2024", "01/03/2024"),
            assessment("5", "11/03/2024", "01/03/2024"),
        ];
        let counts = due_counts(&rows, today());
        assert_eq!(
            counts,
            DueCounts {
                overdue: 1,
                today: 1,
                week: 1,
                later: 1,
                none: 1,
            }
        );
    }

    #[test]
    fn due_in_bucket_sorts_by_date_then_name() {
        let rows = vec![
            assessment("b", "02/03/2024", "01/02/2024"),
            assessment("a", "01/03/2024", "01/02/2024"),
        ];
        let overdue = due_in_bucket(&rows, DueBucket::Overdue, today());
        let names: Vec<&str> = overdue.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn monthly_counts_trailing_12() {
        let rows = vec![
            assessment("1", "", "05/03/2024"),
            assessment("2", "", "15/02/2024"),
            assessment("3", "", "20/02/2024"),
            // Future-dated entries are excluded.
            assessment("4", "", "10/04/2024"),
            // Older than the window: off the axis.
            assessment("5", "", "10/01/2023"),
        ];
        let series = monthly_counts(&rows, MonthRange::Trailing12, today());
        assert_eq!(series.axis.len(), 12);
        assert_eq!(series.axis.first().map(String::as_str), Some("2023-04"));
        assert_eq!(series.axis.last().map(String::as_str), Some("2024-03"));
        assert_eq!(series.values[11], 1);
        assert_eq!(series.values[10], 2);
    }

    #[test]
    fn monthly_counts_this_year_axis() {
        let series = monthly_counts(&[], MonthRange::ThisYear, today());
        assert_eq!(series.axis.first().map(String::as_str), Some("2024-01"));
        assert_eq!(series.axis.last().map(String::as_str), Some("2024-12"));
        assert!(series.values.iter().all(|v| *v == 0));
    }

    #[test]
    fn shift_month_wraps_across_years() {
        assert_eq!(shift_month(2024, 3, 0), (2024, 3));
        assert_eq!(shift_month(2024, 3, 3), (2023, 12));
        assert_eq!(shift_month(2024, 1, 13), (2022, 12));
    }

    #[test]
    fn grade_distribution_uses_worst_symptom() {
        let mut a = assessment("1", "", "01/03/2024");
        a.mucositis_grade = Cell::from("G1");
        a.diarrhea_grade = Cell::from("G3");
        let b = assessment("2", "", "01/03/2024");
        let dist = grade_distribution(&[a, b]);
        assert_eq!(dist.grades, [0, 0, 0, 1, 0]);
        assert_eq!(dist.none, 1);
    }

    #[test]
    fn regimen_usage_sorts_by_count() {
        let mut rows = Vec::new();
        for (regimen, n) in [("FOLFOX", 3), ("FOLFIRI", 1), ("CAPOX", 2)] {
            for i in 0..n {
                let mut r = assessment(&format!("{regimen}{i}"), "", "01/03/2024");
                r.regimen = Cell::from(regimen);
                rows.push(r);
            }
        }
        let usage = regimen_usage(&rows);
        assert_eq!(
            usage,
            vec![
                ("FOLFOX".to_string(), 3),
                ("CAPOX".to_string(), 2),
                ("FOLFIRI".to_string(), 1),
            ]
        );
    }

    #[test]
    fn stage_breakdown_buckets_unknown_stages() {
        let mut a = assessment("1", "", "01/03/2024");
        a.stage = Cell::from("2");
        a.toxicity_found = Cell::from("Yes");
        let mut b = assessment("2", "", "01/03/2024");
        b.stage = Cell::from("weird");
        let breakdown = stage_breakdown(&[a, b]);
        assert_eq!(breakdown.yes[1], 1);
        assert_eq!(breakdown.no[4], 1);
    }
}
