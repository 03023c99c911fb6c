use std::collections::BTreeMap;

use crate::dates;
use crate::models::{max_grade, Assessment, Evidence, Grade, PhoneLog};

/// One summary row per patient, folded across every assessment and phone
/// follow-up on record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WholeRow {
    pub name: String,
    pub id: String,
    pub age: String,
    pub sex: String,
    pub cancer: String,
    pub regimen: String,
    pub baseline_date: String,
    pub hosp_due_tox: String,
    pub any_delay: String,
    pub any_stop: String,
    pub any_dose_mod: String,
    pub tox_ever: String,
    pub highest_mucositis: String,
    pub highest_neutropenia: String,
    pub highest_diarrhea: String,
    pub highest_overall: String,
    pub dpyd_present: String,
    pub dpyd_mutation: String,
}

impl WholeRow {
    pub const HEADERS: [&'static str; 18] = [
        "Name",
        "ID",
        "Age",
        "Sex",
        "Cancer (baseline)",
        "Regimen (baseline)",
        "Baseline date",
        "Ever hospitalized",
        "Any delay",
        "Any stop",
        "Any dose mod.",
        "Toxicity ever?",
        "Highest Mucositis",
        "Highest Neutropenia",
        "Highest Diarrhea",
        "Highest Overall",
        "DPYD present",
        "DPYD mutation",
    ];

    pub fn values(&self) -> [&str; 18] {
        [
            &self.name,
            &self.id,
            &self.age,
            &self.sex,
            &self.cancer,
            &self.regimen,
            &self.baseline_date,
            &self.hosp_due_tox,
            &self.any_delay,
            &self.any_stop,
            &self.any_dose_mod,
            &self.tox_ever,
            &self.highest_mucositis,
            &self.highest_neutropenia,
            &self.highest_diarrhea,
            &self.highest_overall,
            &self.dpyd_present,
            &self.dpyd_mutation,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct PatientGroup {
    pub key: String,
    pub id: String,
    pub name: String,
    pub rows: Vec<Assessment>,
}

/// Bucket assessments by patient key. BTreeMap keeps the grouping (and
/// therefore every downstream table) independent of fetch order.
pub fn group_patients(assessments: &[Assessment]) -> Vec<PatientGroup> {
    let mut groups: BTreeMap<String, PatientGroup> = BTreeMap::new();
    for row in assessments {
        let Some(key) = row.patient_key() else {
            continue;
        };
        let group = groups.entry(key.clone()).or_insert_with(|| PatientGroup {
            key,
            id: row.id.trimmed().to_string(),
            name: row.name.trimmed().to_string(),
            rows: Vec::new(),
        });
        group.rows.push(row.clone());
    }
    groups.into_values().collect()
}

/// Index phone logs by patient key (id, or name when the log has no id).
pub fn phone_logs_by_patient(logs: &[PhoneLog]) -> BTreeMap<String, Vec<PhoneLog>> {
    let mut map: BTreeMap<String, Vec<PhoneLog>> = BTreeMap::new();
    for log in logs {
        let Some(key) = log.patient_key() else {
            continue;
        };
        map.entry(key).or_default().push(log.clone());
    }
    map
}

fn grade_label(grade: Option<Grade>) -> String {
    // Display convention: an empty fold reads as G0 on the summary row.
    grade.unwrap_or(Grade::G0).label().to_string()
}

/// Fold one patient's assessments and phone logs into a single summary row.
pub fn compute_whole_row(group: &PatientGroup, logs_by_patient: &BTreeMap<String, Vec<PhoneLog>>) -> WholeRow {
    let mut rows = group.rows.clone();
    rows.sort_by_key(|r| dates::strict_key(r.assessment_date.trimmed()).unwrap_or_default());
    let baseline = rows.first().cloned().unwrap_or_default();

    static EMPTY: Vec<PhoneLog> = Vec::new();
    let logs = logs_by_patient
        .get(&group.id)
        .or_else(|| logs_by_patient.get(&group.name))
        .unwrap_or(&EMPTY);

    let mut mucositis: Vec<String> = Vec::new();
    let mut neutropenia: Vec<String> = Vec::new();
    let mut diarrhea: Vec<String> = Vec::new();
    let mut overall: Vec<String> = Vec::new();
    for r in &rows {
        mucositis.push(r.mucositis_grade.0.clone());
        neutropenia.push(r.neutropenia_grade.0.clone());
        diarrhea.push(r.diarrhea_grade.0.clone());
        overall.push(r.toxicity.0.clone());
    }
    for l in logs {
        mucositis.push(l.mucositis.0.clone());
        neutropenia.push(l.neutropenia.0.clone());
        diarrhea.push(l.diarrhea.0.clone());
        overall.push(l.overall_grade().map(|g| g.label().to_string()).unwrap_or_default());
    }

    let ever = |from_rows: &dyn Fn(&Assessment) -> String, from_logs: &dyn Fn(&PhoneLog) -> String| {
        let values: Vec<String> = rows
            .iter()
            .map(|r| from_rows(r))
            .chain(logs.iter().map(|l| from_logs(l)))
            .collect();
        Evidence::fold(values.iter().map(String::as_str))
            .render()
            .to_string()
    };

    let hosp_due_tox = ever(
        &|r| r.hospitalization_due_tox.0.clone(),
        &|l| l.hospitalization_evidence().to_string(),
    );
    let any_delay = ever(&|r| r.delay.0.clone(), &|l| l.delay.0.clone());
    let any_stop = ever(&|r| r.stop.0.clone(), &|l| l.stop.0.clone());
    let any_dose_mod = ever(
        &|r| r.dose_modification.0.clone(),
        &|l| l.dose_modification.0.clone(),
    );

    // Toxicity-ever mixes two sources: the assessments' explicit yes/no
    // answer and any graded symptom on a phone call.
    let tox_found = Evidence::fold(rows.iter().map(|r| r.toxicity_found.as_str()));
    let phone_has_tox = logs.iter().any(PhoneLog::has_toxicity);
    let tox_ever = if tox_found == Evidence::Yes || phone_has_tox {
        "Yes"
    } else if tox_found == Evidence::No && !phone_has_tox {
        "No"
    } else {
        ""
    };

    // DPYD events in chronological order. Presence is the tri-state fold;
    // the mutation type is last-write-wins by event date, not entry order.
    let mut dpyd_events: Vec<(String, String, String)> = Vec::new();
    for r in &rows {
        dpyd_events.push((
            dates::strict_key(r.assessment_date.trimmed()).unwrap_or_default(),
            r.dpyd_present.trimmed().to_string(),
            r.dpyd_type.trimmed().to_string(),
        ));
    }
    for l in logs {
        dpyd_events.push((
            dates::event_key(l.call_time.trimmed()),
            l.dpyd_present.trimmed().to_string(),
            l.dpyd_type.trimmed().to_string(),
        ));
    }
    dpyd_events.sort_by(|a, b| a.0.cmp(&b.0));
    let dpyd_present = Evidence::fold(dpyd_events.iter().map(|(_, present, _)| present.as_str()))
        .render()
        .to_string();
    let dpyd_mutation = dpyd_events
        .iter()
        .rev()
        .find(|(_, _, mutation)| !mutation.is_empty())
        .map(|(_, _, mutation)| mutation.clone())
        .unwrap_or_default();

    WholeRow {
        name: group.name.clone(),
        id: group.id.clone(),
        age: baseline.age.trimmed().to_string(),
        sex: baseline.sex.trimmed().to_string(),
        cancer: baseline.diagnosis.trimmed().to_string(),
        regimen: baseline.regimen.trimmed().to_string(),
        baseline_date: dates::normalize(baseline.assessment_date.trimmed()),
        hosp_due_tox,
        any_delay,
        any_stop,
        any_dose_mod,
        tox_ever: tox_ever.to_string(),
        highest_mucositis: grade_label(max_grade(mucositis.iter().map(String::as_str))),
        highest_neutropenia: grade_label(max_grade(neutropenia.iter().map(String::as_str))),
        highest_diarrhea: grade_label(max_grade(diarrhea.iter().map(String::as_str))),
        highest_overall: grade_label(max_grade(overall.iter().map(String::as_str))),
        dpyd_present,
        dpyd_mutation,
    }
}

pub fn build_whole_dataset(assessments: &[Assessment], logs: &[PhoneLog]) -> Vec<WholeRow> {
    let by_patient = phone_logs_by_patient(logs);
    group_patients(assessments)
        .iter()
        .map(|group| compute_whole_row(group, &by_patient))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cell;

    fn assessment(id: &str, date: &str) -> Assessment {
        let mut row = Assessment::default();
        row.id = Cell::from(id);
        row.name = Cell::from("Avery Lee");
        row.assessment_date = Cell::from(date);
        row
    }

    fn phone_log(id: &str, call_time: &str) -> PhoneLog {
        let mut log = PhoneLog::default();
        log.id = Cell::from(id);
        log.call_time = Cell::from(call_time);
        log
    }

    #[test]
    fn baseline_comes_from_earliest_assessment() {
        let mut later = assessment("p1", "10/04/2024");
        later.regimen = Cell::from("FOLFIRI");
        let mut earlier = assessment("p1", "02/01/2024");
        earlier.regimen = Cell::from("FOLFOX");

        let rows = build_whole_dataset(&[later, earlier], &[]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].regimen, "FOLFOX");
        assert_eq!(rows[0].baseline_date, "02/01/2024");
    }

    #[test]
    fn highest_mucositis_spans_all_assessments() {
        let mut a = assessment("p1", "01/01/2024");
        a.mucositis_grade = Cell::from("G1");
        let mut b = assessment("p1", "02/01/2024");
        b.mucositis_grade = Cell::from("G3");
        let mut c = assessment("p1", "03/01/2024");
        c.mucositis_grade = Cell::from("G2");

        let rows = build_whole_dataset(&[a, b, c], &[]);
        assert_eq!(rows[0].highest_mucositis, "G3");
    }

    #[test]
    fn phone_logs_feed_the_grade_fold() {
        let mut a = assessment("p1", "01/01/2024");
        a.diarrhea_grade = Cell::from("G1");
        let mut log = phone_log("p1", "2024-02-01T10:00:00Z");
        log.diarrhea = Cell::from("G4");

        let rows = build_whole_dataset(&[a], &[log]);
        assert_eq!(rows[0].highest_diarrhea, "G4");
        // Any graded phone symptom makes toxicity-ever a Yes.
        assert_eq!(rows[0].tox_ever, "Yes");
    }

    #[test]
    fn ever_fields_use_tristate_semantics() {
        let mut a = assessment("p1", "01/01/2024");
        a.delay = Cell::from("No");
        let b = assessment("p1", "02/01/2024");

        let rows = build_whole_dataset(&[a, b], &[]);
        // [No, empty] folds to No.
        assert_eq!(rows[0].any_delay, "No");
        // [empty, empty] stays unknown.
        assert_eq!(rows[0].any_stop, "");
    }

    #[test]
    fn hospitalization_falls_back_to_generic_answer() {
        let a = assessment("p1", "01/01/2024");
        let mut log = phone_log("p1", "2024-02-01T10:00:00Z");
        log.hospitalization = Cell::from("Yes");

        let rows = build_whole_dataset(&[a], &[log]);
        assert_eq!(rows[0].hosp_due_tox, "Yes");
    }

    #[test]
    fn dpyd_mutation_is_last_write_wins_by_date() {
        let mut a = assessment("p1", "05/03/2024");
        a.dpyd_present = Cell::from("Yes");
        a.dpyd_type = Cell::from("c.1905+1G>A");
        // Inserted first but dated later: must win.
        let mut log = phone_log("p1", "2024-04-20T09:00:00Z");
        log.dpyd_type = Cell::from("c.2846A>T");

        let rows = build_whole_dataset(&[a], &[log]);
        assert_eq!(rows[0].dpyd_present, "Yes");
        assert_eq!(rows[0].dpyd_mutation, "c.2846A>T");
    }

    #[test]
    fn dpyd_present_stays_unknown_without_answers() {
        let a = assessment("p1", "01/01/2024");
        let rows = build_whole_dataset(&[a], &[]);
        assert_eq!(rows[0].dpyd_present, "");
    }

    #[test]
    fn grades_default_to_g0_on_the_summary_row() {
        let a = assessment("p1", "01/01/2024");
        let rows = build_whole_dataset(&[a], &[]);
        assert_eq!(rows[0].highest_overall, "G0");
        assert_eq!(rows[0].tox_ever, "");
    }

    #[test]
    fn logs_join_on_name_when_id_is_missing() {
        let mut a = Assessment::default();
        a.name = Cell::from("Avery Lee");
        a.assessment_date = Cell::from("01/01/2024");
        let mut log = PhoneLog::default();
        log.name = Cell::from("Avery Lee");
        log.mucositis = Cell::from("G2");

        let rows = build_whole_dataset(&[a], &[log]);
        assert_eq!(rows[0].highest_mucositis, "G2");
    }
}
