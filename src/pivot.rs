use std::collections::BTreeMap;

use crate::dates;
use crate::models::{Assessment, Grade};
use crate::whole::WholeRow;

pub const EMPTY_LABEL: &str = "—";

/// How a field's values aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Grade,
    Bool,
    Number,
}

/// A record type the pivot engine can group. Field access goes through a
/// validated key type rather than unchecked indexing by name.
pub trait PivotRecord {
    type Field: Clone;

    fn field_kind(field: &Self::Field) -> FieldKind;

    /// Bucket label for this record under `field`; [`EMPTY_LABEL`] when the
    /// value is missing.
    fn label(&self, field: &Self::Field) -> String;

    /// Numeric view of the value for max/average aggregation: grade ordinal,
    /// yes/no as 1/0, or a parsed number.
    fn numeric(&self, field: &Self::Field) -> Option<f64>;

    /// What a drill-down lists for this record.
    fn display_name(&self) -> String;

    /// Year of the record's reference date, for year filters.
    fn reference_year(&self) -> Option<String>;
}

#[derive(Debug, Clone)]
pub enum PivotFilter<F> {
    /// Exact match on the reference date's year.
    Year(String),
    /// Exact match on a field's label text.
    Equals(F, String),
    /// Case-insensitive substring match.
    Contains(F, String),
}

impl<F: Clone> PivotFilter<F> {
    fn passes<R: PivotRecord<Field = F>>(&self, record: &R) -> bool {
        match self {
            PivotFilter::Year(year) => record.reference_year().as_deref() == Some(year.as_str()),
            PivotFilter::Equals(field, value) => record.label(field) == *value,
            PivotFilter::Contains(field, needle) => record
                .label(field)
                .to_lowercase()
                .contains(&needle.to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Count,
    /// Mean grade ordinal, rounded, rendered `G<n>`; empty without valid grades.
    AverageGrade,
    /// Highest value; `G<n>` for grade fields, plain number otherwise.
    Max,
    /// Share of the row total. Needs the row totals first, so rendering is a
    /// second pass rather than streaming.
    PercentOfRow,
}

#[derive(Debug, Default)]
struct CellBucket {
    count: usize,
    values: Vec<f64>,
    names: Vec<String>,
}

/// A computed pivot. `matrix[r][c]` is the rendered cell, `drill[r][c]` the
/// display names behind it. Labels are the lexicographically sorted union of
/// observed keys, so output is byte-identical regardless of input order.
#[derive(Debug, Clone, PartialEq)]
pub struct PivotTable {
    pub row_labels: Vec<String>,
    pub col_labels: Vec<String>,
    pub matrix: Vec<Vec<String>>,
    pub drill: Vec<Vec<Vec<String>>>,
    pub row_totals: Vec<usize>,
}

impl PivotTable {
    pub fn drill_cell(&self, row: usize, col: usize) -> &[String] {
        static NONE: Vec<String> = Vec::new();
        self.drill
            .get(row)
            .and_then(|cols| cols.get(col))
            .map(Vec::as_slice)
            .unwrap_or(&NONE)
    }
}

fn render_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value:.2}")
    }
}

fn render_cell(bucket: &CellBucket, agg: Aggregation, value_kind: FieldKind) -> String {
    match agg {
        Aggregation::Count => {
            if bucket.count == 0 {
                String::new()
            } else {
                bucket.count.to_string()
            }
        }
        Aggregation::PercentOfRow => String::new(), // filled by the second pass
        Aggregation::Max => {
            let Some(max) = bucket.values.iter().copied().reduce(f64::max) else {
                return String::new();
            };
            match value_kind {
                FieldKind::Grade => format!("G{}", max as u8),
                _ => render_number(max),
            }
        }
        Aggregation::AverageGrade => {
            if bucket.values.is_empty() {
                return String::new();
            }
            let mean = bucket.values.iter().sum::<f64>() / bucket.values.len() as f64;
            match value_kind {
                FieldKind::Grade => format!("G{}", mean.round() as u8),
                _ => format!("{mean:.2}"),
            }
        }
    }
}

/// Group `records` by row/col field, aggregate each bucket, and keep the
/// contributing names for drill-down. Filters apply before grouping.
pub fn build_pivot<R: PivotRecord>(
    records: &[R],
    row_field: &R::Field,
    col_field: &R::Field,
    agg: Aggregation,
    value_field: &R::Field,
    filters: &[PivotFilter<R::Field>],
) -> PivotTable {
    let mut buckets: BTreeMap<String, BTreeMap<String, CellBucket>> = BTreeMap::new();

    for record in records {
        if !filters.iter().all(|f| f.passes(record)) {
            continue;
        }
        let cell = buckets
            .entry(record.label(row_field))
            .or_default()
            .entry(record.label(col_field))
            .or_default();
        cell.count += 1;
        if let Some(value) = record.numeric(value_field) {
            cell.values.push(value);
        }
        cell.names.push(record.display_name());
    }

    let row_labels: Vec<String> = buckets.keys().cloned().collect();
    let col_labels: Vec<String> = buckets
        .values()
        .flat_map(|row| row.keys().cloned())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    let value_kind = R::field_kind(value_field);
    let empty = CellBucket::default();
    let mut matrix = Vec::with_capacity(row_labels.len());
    let mut drill = Vec::with_capacity(row_labels.len());
    let mut row_totals = Vec::with_capacity(row_labels.len());

    for row_label in &row_labels {
        let row = &buckets[row_label];
        let counts: Vec<usize> = col_labels
            .iter()
            .map(|c| row.get(c).map_or(0, |b| b.count))
            .collect();
        let total: usize = counts.iter().sum();

        let mut rendered = Vec::with_capacity(col_labels.len());
        let mut names = Vec::with_capacity(col_labels.len());
        for (col_label, count) in col_labels.iter().zip(&counts) {
            let bucket = row.get(col_label).unwrap_or(&empty);
            let cell = if agg == Aggregation::PercentOfRow {
                if total == 0 {
                    String::new()
                } else {
                    format!("{}%", (*count as f64 * 100.0 / total as f64).round() as i64)
                }
            } else {
                render_cell(bucket, agg, value_kind)
            };
            rendered.push(cell);
            names.push(bucket.names.clone());
        }
        matrix.push(rendered);
        drill.push(names);
        row_totals.push(total);
    }

    PivotTable {
        row_labels,
        col_labels,
        matrix,
        drill,
        row_totals,
    }
}

fn text_label(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        EMPTY_LABEL.to_string()
    } else {
        trimmed.to_string()
    }
}

fn numeric_view(kind: FieldKind, raw: &str) -> Option<f64> {
    match kind {
        FieldKind::Grade => Grade::parse(raw).map(|g| g.ordinal() as f64),
        FieldKind::Bool => match raw.trim() {
            "Yes" => Some(1.0),
            "No" => Some(0.0),
            _ => None,
        },
        _ => raw.trim().parse().ok(),
    }
}

/// Pivot axis over saved assessments: a sheet column, or the month/year
/// derived from the assessment date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssessmentField {
    Column(&'static str),
    Extra(String),
    AssessmentMonth,
    AssessmentYear,
}

impl AssessmentField {
    const GRADE_COLUMNS: [&'static str; 5] = [
        "toxicity",
        "mucositis_grade",
        "diarrhea_grade",
        "neutropenia_grade",
        "other_tox_grade",
    ];
    const BOOL_COLUMNS: [&'static str; 6] = [
        "toxicity_found",
        "hospitalization_due_tox",
        "delay",
        "stop",
        "dose_modification",
        "dpyd_present",
    ];
    const COLUMNS: [&'static str; 25] = [
        "id",
        "name",
        "phone",
        "age",
        "sex",
        "diagnosis",
        "regimen",
        "stage",
        "assessment_date",
        "followup_due",
        "first_date_5fu",
        "toxicity_found",
        "toxicity",
        "mucositis_grade",
        "diarrhea_grade",
        "neutropenia_grade",
        "other_tox_name",
        "other_tox_grade",
        "hospitalization_due_tox",
        "delay",
        "stop",
        "dose_modification",
        "dpyd_present",
        "dpyd_type",
        "notes",
    ];

    /// Resolve a user-supplied field name. Unrecognized names address extra
    /// sheet columns.
    pub fn parse(name: &str) -> AssessmentField {
        let lower = name.trim().to_lowercase();
        match lower.as_str() {
            "month" | "assessment_month" => return AssessmentField::AssessmentMonth,
            "year" | "assessment_year" => return AssessmentField::AssessmentYear,
            _ => {}
        }
        match Self::COLUMNS.iter().copied().find(|c| *c == lower) {
            Some(column) => AssessmentField::Column(column),
            None => AssessmentField::Extra(name.trim().to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            AssessmentField::Column(c) => c,
            AssessmentField::Extra(name) => name,
            AssessmentField::AssessmentMonth => "assessment month",
            AssessmentField::AssessmentYear => "assessment year",
        }
    }
}

impl PivotRecord for Assessment {
    type Field = AssessmentField;

    fn field_kind(field: &AssessmentField) -> FieldKind {
        match field {
            AssessmentField::Column(c) if AssessmentField::GRADE_COLUMNS.contains(c) => {
                FieldKind::Grade
            }
            AssessmentField::Column(c) if AssessmentField::BOOL_COLUMNS.contains(c) => {
                FieldKind::Bool
            }
            AssessmentField::Column("age") => FieldKind::Number,
            _ => FieldKind::Text,
        }
    }

    fn label(&self, field: &AssessmentField) -> String {
        match field {
            AssessmentField::Column(c) => text_label(&self.get_field(c).unwrap_or_default()),
            AssessmentField::Extra(name) => text_label(&self.get_field(name).unwrap_or_default()),
            AssessmentField::AssessmentMonth => dates::month_key(self.assessment_date.trimmed())
                .unwrap_or_else(|| EMPTY_LABEL.to_string()),
            AssessmentField::AssessmentYear => dates::year_key(self.assessment_date.trimmed())
                .unwrap_or_else(|| EMPTY_LABEL.to_string()),
        }
    }

    fn numeric(&self, field: &AssessmentField) -> Option<f64> {
        let raw = match field {
            AssessmentField::Column(c) => self.get_field(c)?,
            AssessmentField::Extra(name) => self.get_field(name)?,
            _ => return None,
        };
        numeric_view(Self::field_kind(field), &raw)
    }

    fn display_name(&self) -> String {
        text_label(&self.name)
    }

    fn reference_year(&self) -> Option<String> {
        dates::year_key(self.assessment_date.trimmed())
    }
}

/// Pivot axis over whole-result rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WholeField {
    Name,
    Id,
    Age,
    Sex,
    Cancer,
    Regimen,
    BaselineDate,
    BaselineMonth,
    BaselineYear,
    HospDueTox,
    AnyDelay,
    AnyStop,
    AnyDoseMod,
    ToxEver,
    HighestMucositis,
    HighestNeutropenia,
    HighestDiarrhea,
    HighestOverall,
    DpydPresent,
    DpydMutation,
}

impl WholeField {
    const ALL: [(WholeField, &'static str); 20] = [
        (WholeField::Name, "name"),
        (WholeField::Id, "id"),
        (WholeField::Age, "age"),
        (WholeField::Sex, "sex"),
        (WholeField::Cancer, "cancer"),
        (WholeField::Regimen, "regimen"),
        (WholeField::BaselineDate, "baseline_date"),
        (WholeField::BaselineMonth, "month"),
        (WholeField::BaselineYear, "year"),
        (WholeField::HospDueTox, "hosp_due_tox"),
        (WholeField::AnyDelay, "any_delay"),
        (WholeField::AnyStop, "any_stop"),
        (WholeField::AnyDoseMod, "any_dose_mod"),
        (WholeField::ToxEver, "tox_ever"),
        (WholeField::HighestMucositis, "highest_mucositis"),
        (WholeField::HighestNeutropenia, "highest_neutropenia"),
        (WholeField::HighestDiarrhea, "highest_diarrhea"),
        (WholeField::HighestOverall, "highest_overall"),
        (WholeField::DpydPresent, "dpyd_present"),
        (WholeField::DpydMutation, "dpyd_mutation"),
    ];

    pub fn parse(name: &str) -> Option<WholeField> {
        let lower = name.trim().to_lowercase();
        Self::ALL
            .iter()
            .find(|(_, n)| *n == lower)
            .map(|(f, _)| *f)
    }

    pub fn name(self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(f, _)| *f == self)
            .map(|(_, n)| *n)
            .unwrap_or("")
    }

    fn raw<'a>(self, row: &'a WholeRow) -> &'a str {
        match self {
            WholeField::Name => &row.name,
            WholeField::Id => &row.id,
            WholeField::Age => &row.age,
            WholeField::Sex => &row.sex,
            WholeField::Cancer => &row.cancer,
            WholeField::Regimen => &row.regimen,
            WholeField::BaselineDate | WholeField::BaselineMonth | WholeField::BaselineYear => {
                &row.baseline_date
            }
            WholeField::HospDueTox => &row.hosp_due_tox,
            WholeField::AnyDelay => &row.any_delay,
            WholeField::AnyStop => &row.any_stop,
            WholeField::AnyDoseMod => &row.any_dose_mod,
            WholeField::ToxEver => &row.tox_ever,
            WholeField::HighestMucositis => &row.highest_mucositis,
            WholeField::HighestNeutropenia => &row.highest_neutropenia,
            WholeField::HighestDiarrhea => &row.highest_diarrhea,
            WholeField::HighestOverall => &row.highest_overall,
            WholeField::DpydPresent => &row.dpyd_present,
            WholeField::DpydMutation => &row.dpyd_mutation,
        }
    }
}

impl PivotRecord for WholeRow {
    type Field = WholeField;

    fn field_kind(field: &WholeField) -> FieldKind {
        match field {
            WholeField::HighestMucositis
            | WholeField::HighestNeutropenia
            | WholeField::HighestDiarrhea
            | WholeField::HighestOverall => FieldKind::Grade,
            WholeField::HospDueTox
            | WholeField::AnyDelay
            | WholeField::AnyStop
            | WholeField::AnyDoseMod
            | WholeField::ToxEver
            | WholeField::DpydPresent => FieldKind::Bool,
            WholeField::Age => FieldKind::Number,
            _ => FieldKind::Text,
        }
    }

    fn label(&self, field: &WholeField) -> String {
        match field {
            WholeField::BaselineMonth => dates::month_key(self.baseline_date.trim())
                .unwrap_or_else(|| EMPTY_LABEL.to_string()),
            WholeField::BaselineYear => dates::year_key(self.baseline_date.trim())
                .unwrap_or_else(|| EMPTY_LABEL.to_string()),
            other => text_label(other.raw(self)),
        }
    }

    fn numeric(&self, field: &WholeField) -> Option<f64> {
        numeric_view(Self::field_kind(field), field.raw(self))
    }

    fn display_name(&self) -> String {
        format!("{} — {}", text_label(&self.name), text_label(&self.id))
    }

    fn reference_year(&self) -> Option<String> {
        dates::year_key(self.baseline_date.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cell;

    fn assessment(name: &str, regimen: &str, stage: &str, toxicity: &str, date: &str) -> Assessment {
        let mut row = Assessment::default();
        row.name = Cell::from(name);
        row.regimen = Cell::from(regimen);
        row.stage = Cell::from(stage);
        row.toxicity = Cell::from(toxicity);
        row.assessment_date = Cell::from(date);
        row
    }

    fn sample() -> Vec<Assessment> {
        vec![
            assessment("Avery", "FOLFOX", "2", "G1", "05/01/2024"),
            assessment("Blake", "FOLFOX", "2", "G3", "12/01/2024"),
            assessment("Casey", "FOLFOX", "3", "G2", "03/02/2024"),
            assessment("Drew", "FOLFIRI", "3", "", "20/02/2024"),
        ]
    }

    fn count_pivot(rows: &[Assessment]) -> PivotTable {
        build_pivot(
            rows,
            &AssessmentField::parse("regimen"),
            &AssessmentField::parse("stage"),
            Aggregation::Count,
            &AssessmentField::parse("toxicity"),
            &[],
        )
    }

    #[test]
    fn counts_group_by_row_and_column() {
        let table = count_pivot(&sample());
        assert_eq!(table.row_labels, ["FOLFIRI", "FOLFOX"]);
        assert_eq!(table.col_labels, ["2", "3"]);
        assert_eq!(table.matrix, [["", "1"], ["2", "1"]]);
        assert_eq!(table.row_totals, [1, 3]);
    }

    #[test]
    fn output_is_independent_of_record_order() {
        let rows = sample();
        let mut reversed = rows.clone();
        reversed.reverse();
        let a = count_pivot(&rows);
        let b = count_pivot(&reversed);
        assert_eq!(a.row_labels, b.row_labels);
        assert_eq!(a.col_labels, b.col_labels);
        assert_eq!(a.matrix, b.matrix);
    }

    #[test]
    fn percent_of_row_needs_two_passes() {
        // One row split 3/7 across two columns must render 30%/70%.
        let mut rows = Vec::new();
        for i in 0..10 {
            let stage = if i < 3 { "2" } else { "3" };
            rows.push(assessment(&format!("P{i}"), "FOLFOX", stage, "", "05/01/2024"));
        }
        let table = build_pivot(
            &rows,
            &AssessmentField::parse("regimen"),
            &AssessmentField::parse("stage"),
            Aggregation::PercentOfRow,
            &AssessmentField::parse("toxicity"),
            &[],
        );
        assert_eq!(table.matrix, [["30%", "70%"]]);
    }

    #[test]
    fn average_grade_rounds_and_skips_invalid() {
        let rows = vec![
            assessment("A", "FOLFOX", "2", "G1", "05/01/2024"),
            assessment("B", "FOLFOX", "2", "G2", "05/01/2024"),
            assessment("C", "FOLFOX", "2", "bogus", "05/01/2024"),
            assessment("D", "FOLFIRI", "2", "", "05/01/2024"),
        ];
        let table = build_pivot(
            &rows,
            &AssessmentField::parse("regimen"),
            &AssessmentField::parse("stage"),
            Aggregation::AverageGrade,
            &AssessmentField::parse("toxicity"),
            &[],
        );
        // (1+2)/2 rounds to G2; the FOLFIRI bucket has no valid grades.
        assert_eq!(table.matrix, [[""], ["G2"]]);
        assert_eq!(table.row_labels, ["FOLFIRI", "FOLFOX"]);
    }

    #[test]
    fn max_renders_grades_as_labels() {
        let rows = sample();
        let table = build_pivot(
            &rows,
            &AssessmentField::parse("regimen"),
            &AssessmentField::parse("stage"),
            Aggregation::Max,
            &AssessmentField::parse("toxicity"),
            &[],
        );
        assert_eq!(table.matrix, [["", ""], ["G3", "G2"]]);
    }

    #[test]
    fn drill_down_lists_contributing_names() {
        let table = count_pivot(&sample());
        // FOLFOX / stage 2.
        assert_eq!(table.drill_cell(1, 0), ["Avery", "Blake"]);
        assert_eq!(table.drill_cell(0, 0), [] as [&str; 0]);
        assert_eq!(table.drill_cell(9, 9), [] as [&str; 0]);
    }

    #[test]
    fn synthetic_month_and_year_fields() {
        let rows = sample();
        let table = build_pivot(
            &rows,
            &AssessmentField::parse("month"),
            &AssessmentField::parse("year"),
            Aggregation::Count,
            &AssessmentField::parse("toxicity"),
            &[],
        );
        assert_eq!(table.row_labels, ["2024-01", "2024-02"]);
        assert_eq!(table.col_labels, ["2024"]);
        assert_eq!(table.matrix, [["2"], ["2"]]);
    }

    #[test]
    fn filters_apply_before_grouping() {
        let mut rows = sample();
        rows.push(assessment("Elio", "FOLFOX", "2", "G4", "05/01/2023"));
        let table = build_pivot(
            &rows,
            &AssessmentField::parse("regimen"),
            &AssessmentField::parse("stage"),
            Aggregation::Count,
            &AssessmentField::parse("toxicity"),
            &[PivotFilter::Year("2024".to_string())],
        );
        assert_eq!(table.row_totals.iter().sum::<usize>(), 4);

        let table = build_pivot(
            &rows,
            &AssessmentField::parse("regimen"),
            &AssessmentField::parse("stage"),
            Aggregation::Count,
            &AssessmentField::parse("toxicity"),
            &[PivotFilter::Equals(
                AssessmentField::parse("regimen"),
                "FOLFIRI".to_string(),
            )],
        );
        assert_eq!(table.row_labels, ["FOLFIRI"]);
    }

    #[test]
    fn empty_values_bucket_under_placeholder() {
        let rows = vec![
            assessment("A", "", "2", "", "05/01/2024"),
            assessment("B", "FOLFOX", "2", "", "05/01/2024"),
        ];
        let table = count_pivot(&rows);
        assert_eq!(table.row_labels, [EMPTY_LABEL, "FOLFOX"]);
    }

    #[test]
    fn whole_rows_pivot_on_bool_and_grade_fields() {
        let rows = vec![
            WholeRow {
                name: "Avery".into(),
                id: "1".into(),
                cancer: "CRC".into(),
                baseline_date: "05/01/2024".into(),
                tox_ever: "Yes".into(),
                highest_overall: "G3".into(),
                ..WholeRow::default()
            },
            WholeRow {
                name: "Blake".into(),
                id: "2".into(),
                cancer: "CRC".into(),
                baseline_date: "09/02/2024".into(),
                tox_ever: "No".into(),
                highest_overall: "G1".into(),
                ..WholeRow::default()
            },
        ];
        let table = build_pivot(
            &rows,
            &WholeField::Cancer,
            &WholeField::ToxEver,
            Aggregation::Max,
            &WholeField::HighestOverall,
            &[],
        );
        assert_eq!(table.row_labels, ["CRC"]);
        assert_eq!(table.col_labels, ["No", "Yes"]);
        assert_eq!(table.matrix, [["G1", "G3"]]);
        assert_eq!(table.drill_cell(0, 1), ["Avery — 1"]);
    }
}
