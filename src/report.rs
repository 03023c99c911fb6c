use std::fmt::Write;

use chrono::NaiveDate;

use crate::dashboard::{self, MonthRange};
use crate::dates::{self, DueBucket};
use crate::models::{Assessment, PhoneLog};
use crate::whole::WholeRow;

fn dash(value: &str) -> &str {
    if value.trim().is_empty() {
        "—"
    } else {
        value
    }
}

/// Build the full markdown report: KPIs, due buckets, monthly volume, grade
/// mix, regimen usage, and the whole-result summary.
pub fn build_report(
    assessments: &[Assessment],
    phone_logs: &[PhoneLog],
    whole: &[WholeRow],
    today: NaiveDate,
) -> String {
    let kpis = dashboard::compute_kpis(assessments, phone_logs, today);
    let due = dashboard::due_counts(assessments, today);
    let monthly = dashboard::monthly_counts(assessments, MonthRange::Trailing12, today);
    let dist = dashboard::grade_distribution(assessments);
    let regimens = dashboard::regimen_usage(assessments);

    let mut output = String::new();
    let _ = writeln!(output, "# Follow-up Tracker Report");
    let _ = writeln!(output, "Generated for {}", dates::format_dmy(today));
    let _ = writeln!(output);

    let _ = writeln!(output, "## Key Figures");
    let _ = writeln!(output, "- Patients: {}", kpis.total_patients);
    let _ = writeln!(output, "- Saved assessments: {}", kpis.saved_assessments);
    let _ = writeln!(output, "- Phone follow-ups: {}", kpis.phone_followups);
    let _ = writeln!(
        output,
        "- Toxicity found: {} ({}%)",
        kpis.tox_yes, kpis.tox_pct
    );
    let _ = writeln!(output, "- Most common symptom: {}", kpis.most_common);
    let _ = writeln!(
        output,
        "- Hospitalized due to toxicity: {}",
        kpis.hospitalized
    );
    let _ = writeln!(output);

    let _ = writeln!(output, "## Follow-up Due");
    let _ = writeln!(output, "- Overdue: {}", due.overdue);
    let _ = writeln!(output, "- Due today: {}", due.today);
    let _ = writeln!(output, "- Due this week: {}", due.week);
    let _ = writeln!(output, "- Later: {}", due.later);
    let _ = writeln!(output, "- No date set: {}", due.none);
    let _ = writeln!(output);

    let _ = writeln!(output, "## Assessments per Month (last 12 months)");
    for (month, count) in monthly.axis.iter().zip(&monthly.values) {
        let _ = writeln!(output, "- {month}: {count}");
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Worst-grade Distribution");
    for (i, count) in dist.grades.iter().enumerate() {
        let _ = writeln!(output, "- G{i}: {count}");
    }
    let _ = writeln!(output, "- No grade: {}", dist.none);
    let _ = writeln!(output);

    let _ = writeln!(output, "## Regimen Usage");
    if regimens.is_empty() {
        let _ = writeln!(output, "No regimens recorded.");
    } else {
        for (regimen, count) in &regimens {
            let _ = writeln!(output, "- {regimen}: {count}");
        }
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Stage Breakdown (toxicity found yes/no)");
    let stages = dashboard::stage_breakdown(assessments);
    for (i, stage) in stages.stages.iter().enumerate() {
        let _ = writeln!(
            output,
            "- Stage {stage}: {} yes / {} no",
            stages.yes[i], stages.no[i]
        );
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Overdue Follow-ups");
    let overdue = dashboard::due_in_bucket(assessments, DueBucket::Overdue, today);
    if overdue.is_empty() {
        let _ = writeln!(output, "No overdue follow-ups.");
    } else {
        for r in overdue.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} ({}) due {}",
                dash(r.name.trimmed()),
                dash(r.id.trimmed()),
                dash(r.followup_due.trimmed())
            );
        }
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Whole Result");
    if whole.is_empty() {
        let _ = writeln!(output, "No patients on record.");
    } else {
        let count = |f: &dyn Fn(&WholeRow) -> &str| whole.iter().filter(|r| f(r) == "Yes").count();
        let tox_yes = count(&|r| &r.tox_ever);
        let tox_pct = (tox_yes as f64 * 100.0 / whole.len() as f64).round() as i64;
        let _ = writeln!(output, "- Total patients: {}", whole.len());
        let _ = writeln!(output, "- Toxicity ever: {tox_yes} ({tox_pct}%)");
        let _ = writeln!(
            output,
            "- Hospitalized due to tox: {}",
            count(&|r| &r.hosp_due_tox)
        );
        let _ = writeln!(output, "- Any delay: {}", count(&|r| &r.any_delay));
        let _ = writeln!(output, "- Any stop: {}", count(&|r| &r.any_stop));
        let _ = writeln!(
            output,
            "- Dose modification: {}",
            count(&|r| &r.any_dose_mod)
        );
        let _ = writeln!(output, "- DPYD present: {}", count(&|r| &r.dpyd_present));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cell;
    use crate::whole;

    #[test]
    fn report_covers_all_sections() {
        let mut row = Assessment::default();
        row.id = Cell::from("p1");
        row.name = Cell::from("Avery Lee");
        row.assessment_date = Cell::from("01/03/2024");
        row.followup_due = Cell::from("01/02/2024");
        row.regimen = Cell::from("FOLFOX");
        row.toxicity_found = Cell::from("Yes");
        row.mucositis_grade = Cell::from("G2");

        let today = NaiveDate::from_ymd_opt(2024, 3, 6).unwrap();
        let whole_rows = whole::build_whole_dataset(std::slice::from_ref(&row), &[]);
        let report = build_report(&[row], &[], &whole_rows, today);

        assert!(report.contains("# Follow-up Tracker Report"));
        assert!(report.contains("- Patients: 1"));
        assert!(report.contains("- Overdue: 1"));
        assert!(report.contains("- FOLFOX: 1"));
        assert!(report.contains("- G2: 1"));
        assert!(report.contains("Avery Lee (p1) due 01/02/2024"));
        assert!(report.contains("- Toxicity ever: 1 (100%)"));
        // No stage recorded: the row lands in the unknown bucket as a yes.
        assert!(report.contains("- Stage —: 1 yes / 0 no"));
    }

    #[test]
    fn empty_report_renders_placeholders() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 6).unwrap();
        let report = build_report(&[], &[], &[], today);
        assert!(report.contains("No overdue follow-ups."));
        assert!(report.contains("No regimens recorded."));
        assert!(report.contains("No patients on record."));
    }
}
