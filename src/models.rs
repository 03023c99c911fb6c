use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Deserializer, Serialize};

use crate::dates;

/// One spreadsheet cell. The remote store is loosely typed: a field may
/// arrive as a string, a number, a bool, or nothing at all. Everything is
/// kept as trimmed-on-demand text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Cell(pub String);

impl Cell {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn trimmed(&self) -> &str {
        self.0.trim()
    }

    pub fn is_empty(&self) -> bool {
        self.trimmed().is_empty()
    }
}

impl Deref for Cell {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell(s)
    }
}

impl<'de> Deserialize<'de> for Cell {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Cell(match value {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            other => other.to_string(),
        }))
    }
}

/// Ordinal toxicity severity, G0 (none) through G4 (most severe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Grade {
    G0,
    G1,
    G2,
    G3,
    G4,
}

impl Grade {
    /// Accepts `G<n>` or a bare digit, case-insensitively. Anything else is
    /// "no grade", which is distinct from G0.
    pub fn parse(raw: &str) -> Option<Grade> {
        let s = raw.trim();
        let digit = match s.len() {
            1 => s.as_bytes()[0],
            2 if s.as_bytes()[0].eq_ignore_ascii_case(&b'G') => s.as_bytes()[1],
            _ => return None,
        };
        Grade::from_ordinal(digit.checked_sub(b'0')?)
    }

    pub fn from_ordinal(n: u8) -> Option<Grade> {
        match n {
            0 => Some(Grade::G0),
            1 => Some(Grade::G1),
            2 => Some(Grade::G2),
            3 => Some(Grade::G3),
            4 => Some(Grade::G4),
            _ => None,
        }
    }

    pub fn ordinal(self) -> u8 {
        match self {
            Grade::G0 => 0,
            Grade::G1 => 1,
            Grade::G2 => 2,
            Grade::G3 => 3,
            Grade::G4 => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Grade::G0 => "G0",
            Grade::G1 => "G1",
            Grade::G2 => "G2",
            Grade::G3 => "G3",
            Grade::G4 => "G4",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Highest valid grade among the inputs, or `None` when nothing parses.
pub fn max_grade<'a, I>(grades: I) -> Option<Grade>
where
    I: IntoIterator<Item = &'a str>,
{
    grades.into_iter().filter_map(Grade::parse).max()
}

/// One observation feeding a tri-state fold. `Empty` is a missing value,
/// `Ambiguous` is a value that parses as neither yes nor no; the two render
/// the same but combine differently (an ambiguous source blocks a `No`
/// verdict, a missing one does not).
///
/// `or` is a commutative, associative fold with identity `Empty` and
/// absorbing element `Yes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Evidence {
    Empty,
    No,
    Ambiguous,
    Yes,
}

impl Evidence {
    pub fn of(raw: &str) -> Evidence {
        let s = raw.trim();
        if s.is_empty() {
            return Evidence::Empty;
        }
        match s.to_ascii_lowercase().as_str() {
            "yes" | "y" | "true" | "1" => Evidence::Yes,
            "no" | "n" | "false" | "0" => Evidence::No,
            _ => Evidence::Ambiguous,
        }
    }

    pub fn or(self, other: Evidence) -> Evidence {
        self.max(other)
    }

    pub fn fold<'a, I>(values: I) -> Evidence
    where
        I: IntoIterator<Item = &'a str>,
    {
        values
            .into_iter()
            .map(Evidence::of)
            .fold(Evidence::Empty, Evidence::or)
    }

    /// `Yes` / `No`, or empty when the sources were absent or ambiguous.
    /// Absence of data is not a negative finding.
    pub fn render(self) -> &'static str {
        match self {
            Evidence::Yes => "Yes",
            Evidence::No => "No",
            Evidence::Empty | Evidence::Ambiguous => "",
        }
    }
}

/// A saved patient assessment as stored in the remote sheet. Unknown columns
/// are kept in `extra` so round-trips do not drop data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Assessment {
    #[serde(default)]
    pub id: Cell,
    #[serde(default)]
    pub name: Cell,
    #[serde(default)]
    pub phone: Cell,
    #[serde(default)]
    pub age: Cell,
    #[serde(default)]
    pub sex: Cell,
    #[serde(default)]
    pub diagnosis: Cell,
    #[serde(default)]
    pub regimen: Cell,
    #[serde(default)]
    pub stage: Cell,
    #[serde(default)]
    pub assessment_date: Cell,
    #[serde(default)]
    pub followup_due: Cell,
    #[serde(default)]
    pub first_date_5fu: Cell,
    #[serde(default)]
    pub toxicity_found: Cell,
    #[serde(default)]
    pub toxicity: Cell,
    #[serde(default)]
    pub mucositis_grade: Cell,
    #[serde(default)]
    pub diarrhea_grade: Cell,
    #[serde(default)]
    pub neutropenia_grade: Cell,
    #[serde(default)]
    pub other_tox_name: Cell,
    #[serde(default)]
    pub other_tox_grade: Cell,
    #[serde(default)]
    pub hospitalization_due_tox: Cell,
    #[serde(default)]
    pub delay: Cell,
    #[serde(default)]
    pub stop: Cell,
    #[serde(default)]
    pub dose_modification: Cell,
    #[serde(default)]
    pub dpyd_present: Cell,
    #[serde(default)]
    pub dpyd_type: Cell,
    #[serde(default)]
    pub notes: Cell,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Assessment {
    /// Canonicalize the display-date columns in place, as done right after
    /// every fetch.
    pub fn normalize_dates(&mut self) {
        for cell in [
            &mut self.assessment_date,
            &mut self.followup_due,
            &mut self.first_date_5fu,
        ] {
            cell.0 = dates::normalize(&cell.0);
        }
    }

    /// Grouping key for the longitudinal rollup: the id, or the name when
    /// the sheet row has no id yet.
    pub fn patient_key(&self) -> Option<String> {
        let id = self.id.trimmed();
        if !id.is_empty() {
            return Some(id.to_string());
        }
        let name = self.name.trimmed();
        (!name.is_empty()).then(|| name.to_string())
    }

    pub fn get_field(&self, name: &str) -> Option<String> {
        let cell = match name {
            "id" => &self.id,
            "name" => &self.name,
            "phone" => &self.phone,
            "age" => &self.age,
            "sex" => &self.sex,
            "diagnosis" => &self.diagnosis,
            "regimen" => &self.regimen,
            "stage" => &self.stage,
            "assessment_date" => &self.assessment_date,
            "followup_due" => &self.followup_due,
            "first_date_5fu" => &self.first_date_5fu,
            "toxicity_found" => &self.toxicity_found,
            "toxicity" => &self.toxicity,
            "mucositis_grade" => &self.mucositis_grade,
            "diarrhea_grade" => &self.diarrhea_grade,
            "neutropenia_grade" => &self.neutropenia_grade,
            "other_tox_name" => &self.other_tox_name,
            "other_tox_grade" => &self.other_tox_grade,
            "hospitalization_due_tox" => &self.hospitalization_due_tox,
            "delay" => &self.delay,
            "stop" => &self.stop,
            "dose_modification" => &self.dose_modification,
            "dpyd_present" => &self.dpyd_present,
            "dpyd_type" => &self.dpyd_type,
            "notes" => &self.notes,
            _ => {
                return self.extra.get(name).map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                })
            }
        };
        Some(cell.0.clone())
    }

    /// Write a field by sheet column name; unknown names land in `extra`.
    /// Date columns are re-normalized so patched rows stay canonical.
    pub fn set_field(&mut self, name: &str, value: &str) {
        let value = match name {
            "assessment_date" | "followup_due" | "first_date_5fu" => dates::normalize(value),
            _ => value.to_string(),
        };
        let cell = match name {
            "id" => &mut self.id,
            "name" => &mut self.name,
            "phone" => &mut self.phone,
            "age" => &mut self.age,
            "sex" => &mut self.sex,
            "diagnosis" => &mut self.diagnosis,
            "regimen" => &mut self.regimen,
            "stage" => &mut self.stage,
            "assessment_date" => &mut self.assessment_date,
            "followup_due" => &mut self.followup_due,
            "first_date_5fu" => &mut self.first_date_5fu,
            "toxicity_found" => &mut self.toxicity_found,
            "toxicity" => &mut self.toxicity,
            "mucositis_grade" => &mut self.mucositis_grade,
            "diarrhea_grade" => &mut self.diarrhea_grade,
            "neutropenia_grade" => &mut self.neutropenia_grade,
            "other_tox_name" => &mut self.other_tox_name,
            "other_tox_grade" => &mut self.other_tox_grade,
            "hospitalization_due_tox" => &mut self.hospitalization_due_tox,
            "delay" => &mut self.delay,
            "stop" => &mut self.stop,
            "dose_modification" => &mut self.dose_modification,
            "dpyd_present" => &mut self.dpyd_present,
            "dpyd_type" => &mut self.dpyd_type,
            "notes" => &mut self.notes,
            _ => {
                self.extra
                    .insert(name.to_string(), serde_json::Value::String(value));
                return;
            }
        };
        cell.0 = value;
    }
}

/// One phone follow-up call, keyed by patient `id` and a unique `log_id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhoneLog {
    #[serde(default)]
    pub id: Cell,
    #[serde(default)]
    pub name: Cell,
    #[serde(default)]
    pub log_id: Cell,
    #[serde(default)]
    pub call_time: Cell,
    #[serde(default)]
    pub next_due: Cell,
    #[serde(default)]
    pub diarrhea: Cell,
    #[serde(default)]
    pub mucositis: Cell,
    #[serde(default)]
    pub neutropenia: Cell,
    #[serde(default)]
    pub fever: Cell,
    #[serde(default)]
    pub hospitalization: Cell,
    #[serde(default)]
    pub hospitalization_due_tox: Cell,
    #[serde(default)]
    pub delay: Cell,
    #[serde(default)]
    pub stop: Cell,
    #[serde(default)]
    pub dose_modification: Cell,
    #[serde(default)]
    pub dose_reduction_pct: Cell,
    #[serde(default)]
    pub other_tox_name: Cell,
    #[serde(default)]
    pub other_tox_grade: Cell,
    #[serde(default)]
    pub dpyd_present: Cell,
    #[serde(default)]
    pub dpyd_type: Cell,
    #[serde(default)]
    pub notes: Cell,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl PhoneLog {
    pub fn patient_key(&self) -> Option<String> {
        let id = self.id.trimmed();
        if !id.is_empty() {
            return Some(id.to_string());
        }
        let name = self.name.trimmed();
        (!name.is_empty()).then(|| name.to_string())
    }

    /// Ever-hospitalized evidence: the dedicated column when filled,
    /// otherwise the generic hospitalization answer.
    pub fn hospitalization_evidence(&self) -> &str {
        if self.hospitalization_due_tox.is_empty() {
            self.hospitalization.trimmed()
        } else {
            self.hospitalization_due_tox.trimmed()
        }
    }

    /// Worst grade reported on this call across all symptom columns.
    pub fn overall_grade(&self) -> Option<Grade> {
        max_grade([
            self.mucositis.as_str(),
            self.neutropenia.as_str(),
            self.diarrhea.as_str(),
            self.other_tox_grade.as_str(),
        ])
    }

    /// Whether this call reported any toxicity at all (any grade >= G1).
    pub fn has_toxicity(&self) -> bool {
        self.overall_grade().is_some_and(|g| g >= Grade::G1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_parsing_is_case_insensitive_and_total() {
        assert_eq!(Grade::parse("g3"), Some(Grade::G3));
        assert_eq!(Grade::parse(" G0 "), Some(Grade::G0));
        assert_eq!(Grade::parse("2"), Some(Grade::G2));
        assert_eq!(Grade::parse("G5"), None);
        assert_eq!(Grade::parse("bogus"), None);
        assert_eq!(Grade::parse(""), None);
    }

    #[test]
    fn max_grade_ignores_invalid_entries() {
        assert_eq!(max_grade(["g3", "bogus", "g1"]), Some(Grade::G3));
        assert_eq!(max_grade(["", "nope"]), None);
        assert_eq!(max_grade([]), None);
    }

    #[test]
    fn no_grade_is_distinct_from_g0() {
        assert_eq!(max_grade(["G0"]), Some(Grade::G0));
        assert_eq!(max_grade([""]), None);
    }

    #[test]
    fn evidence_fold_is_tristate() {
        assert_eq!(Evidence::fold(["No", ""]).render(), "No");
        // All-empty is unknown, not an implicit No.
        assert_eq!(Evidence::fold(["", ""]).render(), "");
        assert_eq!(Evidence::fold([]).render(), "");
        assert_eq!(Evidence::fold(["no", "YES"]).render(), "Yes");
        // An unparseable answer blocks a No verdict.
        assert_eq!(Evidence::fold(["No", "maybe"]).render(), "");
        assert_eq!(Evidence::fold(["maybe", "yes"]).render(), "Yes");
    }

    #[test]
    fn evidence_fold_is_order_independent() {
        let forwards = Evidence::fold(["", "no", "maybe", "yes"]);
        let backwards = Evidence::fold(["yes", "maybe", "no", ""]);
        assert_eq!(forwards, backwards);
    }

    #[test]
    fn cells_accept_numbers_and_nulls() {
        let row: Assessment =
            serde_json::from_str(r#"{"id": 1042, "name": "Test", "age": 61, "stage": null}"#)
                .unwrap();
        assert_eq!(row.id.as_str(), "1042");
        assert_eq!(row.age.as_str(), "61");
        assert!(row.stage.is_empty());
    }

    #[test]
    fn unknown_columns_survive_in_extra() {
        let row: Assessment =
            serde_json::from_str(r#"{"id": "7", "clinic_site": "North"}"#).unwrap();
        assert_eq!(row.get_field("clinic_site").as_deref(), Some("North"));
        let back = serde_json::to_value(&row).unwrap();
        assert_eq!(back["clinic_site"], "North");
    }

    #[test]
    fn set_field_normalizes_date_columns() {
        let mut row = Assessment::default();
        row.set_field("assessment_date", "2024-03-05");
        assert_eq!(row.assessment_date.as_str(), "05/03/2024");
        row.set_field("regimen", "FOLFOX");
        assert_eq!(row.regimen.as_str(), "FOLFOX");
    }

    #[test]
    fn patient_key_falls_back_to_name() {
        let mut row = Assessment::default();
        row.name = Cell::from("Lina Haddad");
        assert_eq!(row.patient_key().as_deref(), Some("Lina Haddad"));
        row.id = Cell::from(" 33 ");
        assert_eq!(row.patient_key().as_deref(), Some("33"));
        assert_eq!(Assessment::default().patient_key(), None);
    }

    #[test]
    fn phone_log_overall_grade_spans_symptoms() {
        let mut log = PhoneLog::default();
        assert_eq!(log.overall_grade(), None);
        assert!(!log.has_toxicity());
        log.mucositis = Cell::from("G1");
        log.other_tox_grade = Cell::from("3");
        assert_eq!(log.overall_grade(), Some(Grade::G3));
        assert!(log.has_toxicity());
    }
}
