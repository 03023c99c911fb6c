use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod api;
mod cache;
mod dashboard;
mod dates;
mod export;
mod models;
mod pivot;
mod report;
mod store;
mod whole;

use api::{ApiError, DeletePhoneLog, SheetsClient, Transport};
use cache::FetchCache;
use dashboard::MonthRange;
use dates::DueBucket;
use models::PhoneLog;
use pivot::{Aggregation, AssessmentField, PivotFilter, PivotTable, WholeField};
use store::AssessmentStore;

#[derive(Parser)]
#[command(name = "followup-tracker")]
#[command(about = "Chemotherapy toxicity follow-up tracker", long_about = None)]
struct Cli {
    /// Web app endpoint; defaults to the WEBAPP_URL environment variable
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Use the GET-only callback transport (restricted deployments)
    #[arg(long, global = true)]
    callback: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print KPIs, due buckets and monthly assessment counts
    Dashboard {
        /// Calendar-year axis instead of the trailing 12 months
        #[arg(long)]
        this_year: bool,
    },
    /// Write the full markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// List follow-ups in one due bucket
    Due {
        #[arg(long, default_value = "overdue")]
        bucket: String,
    },
    /// Whole-result summary, one row per patient
    Whole {
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long)]
        xls: Option<PathBuf>,
    },
    /// Pivot table over assessments (or whole-result rows with --whole)
    Pivot {
        #[arg(long)]
        rows: String,
        #[arg(long)]
        cols: String,
        /// count, avg-grade, max, or percent-row
        #[arg(long, default_value = "count")]
        agg: String,
        /// Value field for avg-grade/max
        #[arg(long)]
        value: Option<String>,
        #[arg(long)]
        whole: bool,
        #[arg(long)]
        year: Option<String>,
        #[arg(long)]
        regimen: Option<String>,
        /// Extra exact-match filters, FIELD=VALUE
        #[arg(long, value_name = "FIELD=VALUE")]
        filter: Vec<String>,
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long)]
        xls: Option<PathBuf>,
        /// Show the patients behind one cell, ROW:COL (zero-based)
        #[arg(long, value_name = "ROW:COL")]
        drill: Option<String>,
    },
    /// Save a full assessment record from a JSON file (the web app merges
    /// by id)
    SaveAssessment {
        #[arg(long)]
        file: PathBuf,
    },
    /// Patch fields on a saved assessment; rolls back if the save fails
    UpdateAssessment {
        #[arg(long)]
        id: String,
        #[arg(long = "set", value_name = "FIELD=VALUE", required = true)]
        set: Vec<String>,
    },
    /// Delete an assessment together with its phone logs
    DeleteAssessment {
        #[arg(long)]
        id: String,
    },
    /// List phone follow-ups for one patient
    PhoneLogs {
        #[arg(long)]
        id: String,
    },
    /// Save a phone follow-up from a JSON file
    SavePhoneLog {
        #[arg(long)]
        file: PathBuf,
    },
    /// Delete one phone follow-up
    DeletePhoneLog {
        #[arg(long)]
        log_id: String,
        #[arg(long, default_value = "")]
        id: String,
        #[arg(long, default_value = "")]
        call_time: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    let base_url = match cli.base_url {
        Some(url) => url,
        None => std::env::var("WEBAPP_URL")
            .context("WEBAPP_URL must be set to the follow-up web app endpoint")?,
    };
    let transport = if cli.callback {
        Transport::Callback
    } else {
        Transport::Direct
    };
    let client = SheetsClient::new(base_url, transport)?;
    let cache = FetchCache::new();
    let today = dates::today();

    match cli.command {
        Commands::Dashboard { this_year } => {
            let (assessments, logs) = fetch_both(&cache, &client).await?;
            let kpis = dashboard::compute_kpis(&assessments, &logs, today);
            println!("Patients: {}", kpis.total_patients);
            println!("Saved assessments: {}", kpis.saved_assessments);
            println!("Phone follow-ups: {}", kpis.phone_followups);
            println!("Toxicity found: {} ({}%)", kpis.tox_yes, kpis.tox_pct);
            println!("Most common symptom: {}", kpis.most_common);
            println!("Hospitalized due to toxicity: {}", kpis.hospitalized);
            println!("Due today: {}", kpis.due_today);
            println!("Overdue: {}", kpis.overdue);
            println!("Due this week: {}", kpis.due_week);
            println!("Due within 7 days: {}", kpis.next7);
            println!();

            let due = dashboard::due_counts(&assessments, today);
            println!("Follow-up due:");
            println!("- overdue {}", due.overdue);
            println!("- today {}", due.today);
            println!("- this week {}", due.week);
            println!("- later {}", due.later);
            println!("- none {}", due.none);
            println!();

            let range = if this_year {
                MonthRange::ThisYear
            } else {
                MonthRange::Trailing12
            };
            let monthly = dashboard::monthly_counts(&assessments, range, today);
            println!("Assessments per month:");
            for (month, count) in monthly.axis.iter().zip(&monthly.values) {
                println!("- {month}: {count}");
            }
        }
        Commands::Report { out } => {
            let (assessments, logs) = fetch_both(&cache, &client).await?;
            let whole_rows = whole::build_whole_dataset(&assessments, &logs);
            let report = report::build_report(&assessments, &logs, &whole_rows, today);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Due { bucket } => {
            let bucket = parse_bucket(&bucket)?;
            let assessments = fetch_assessments(&cache, &client).await?;
            let rows = dashboard::due_in_bucket(&assessments, bucket, today);
            if rows.is_empty() {
                println!("No follow-ups in the {} bucket.", bucket.label());
                return Ok(());
            }
            for r in rows {
                println!(
                    "- {} ({}) due {}",
                    placeholder(r.name.trimmed()),
                    placeholder(r.id.trimmed()),
                    placeholder(r.followup_due.trimmed())
                );
            }
        }
        Commands::Whole { csv, xls } => {
            let (assessments, logs) = fetch_both(&cache, &client).await?;
            let whole_rows = whole::build_whole_dataset(&assessments, &logs);
            let table = export::Table::from_whole(&whole_rows);
            print!("{}", render_table(&table));
            println!("{} patients", whole_rows.len());
            write_exports(&table, "WholeResult", csv.as_deref(), xls.as_deref())?;
        }
        Commands::Pivot {
            rows,
            cols,
            agg,
            value,
            whole: over_whole,
            year,
            regimen,
            filter,
            csv,
            xls,
            drill,
        } => {
            let agg = parse_agg(&agg)?;
            let drill = drill.map(|d| parse_drill(&d)).transpose()?;
            if over_whole {
                let (assessments, logs) = fetch_both(&cache, &client).await?;
                let whole_rows = whole::build_whole_dataset(&assessments, &logs);
                let row_field = parse_whole_field(&rows)?;
                let col_field = parse_whole_field(&cols)?;
                let value_field = match value {
                    Some(name) => parse_whole_field(&name)?,
                    None => WholeField::HighestOverall,
                };
                let mut filters = Vec::new();
                if let Some(year) = year {
                    filters.push(PivotFilter::Year(year));
                }
                if let Some(regimen) = regimen {
                    filters.push(PivotFilter::Contains(WholeField::Regimen, regimen));
                }
                for spec in &filter {
                    let (field, value) = split_pair(spec)?;
                    filters.push(PivotFilter::Equals(parse_whole_field(field)?, value.to_string()));
                }
                let table = pivot::build_pivot(
                    &whole_rows,
                    &row_field,
                    &col_field,
                    agg,
                    &value_field,
                    &filters,
                );
                print_pivot(&table, row_field.name(), drill, "WholePivot", csv, xls)?;
            } else {
                let assessments = fetch_assessments(&cache, &client).await?;
                let row_field = AssessmentField::parse(&rows);
                let col_field = AssessmentField::parse(&cols);
                let value_field = value
                    .map(|name| AssessmentField::parse(&name))
                    .unwrap_or_else(|| AssessmentField::parse("toxicity"));
                let mut filters = Vec::new();
                if let Some(year) = year {
                    filters.push(PivotFilter::Year(year));
                }
                if let Some(regimen) = regimen {
                    filters.push(PivotFilter::Equals(
                        AssessmentField::parse("regimen"),
                        regimen,
                    ));
                }
                for spec in &filter {
                    let (field, value) = split_pair(spec)?;
                    filters.push(PivotFilter::Equals(
                        AssessmentField::parse(field),
                        value.to_string(),
                    ));
                }
                let table = pivot::build_pivot(
                    &assessments,
                    &row_field,
                    &col_field,
                    agg,
                    &value_field,
                    &filters,
                );
                print_pivot(&table, row_field.name(), drill, "Pivot", csv, xls)?;
            }
        }
        Commands::SaveAssessment { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let record: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not valid JSON", file.display()))?;
            if let Err(error) = client.save_assessment(&record).await {
                eprintln!("{}", api::save_failure_message(&error));
                return Err(error.into());
            }
            cache.invalidate().await;
            println!("Saved.");
        }
        Commands::UpdateAssessment { id, set } => {
            let patch: Vec<(String, String)> = set
                .iter()
                .map(|spec| split_pair(spec).map(|(k, v)| (k.to_string(), v.to_string())))
                .collect::<anyhow::Result<_>>()?;
            let assessments = fetch_assessments(&cache, &client).await?;
            let mut local = AssessmentStore::new(assessments);
            let result = local
                .update_fields(&id, &patch, || client.update_assessment_fields(&id, &patch))
                .await;
            match result {
                Ok(()) => {
                    cache.invalidate().await;
                    println!("Saved.");
                }
                Err(error) => {
                    eprintln!("{}", api::save_failure_message(&error));
                    return Err(error.into());
                }
            }
        }
        Commands::DeleteAssessment { id } => {
            let assessments = fetch_assessments(&cache, &client).await?;
            let mut local = AssessmentStore::new(assessments);
            let result = local
                .delete(&id, || client.delete_assessment_cascade(&id))
                .await;
            match result {
                Ok(deleted) => {
                    cache.invalidate().await;
                    if deleted {
                        println!("Record deleted successfully.");
                    } else {
                        println!("Record no longer exists.");
                    }
                }
                Err(error) => {
                    eprintln!("{}", api::delete_failure_message(&error));
                    return Err(error.into());
                }
            }
        }
        Commands::PhoneLogs { id } => {
            let logs = cache
                .phone_logs(&id, || client.list_phone_logs(&id))
                .await?;
            if logs.is_empty() {
                println!("No phone follow-ups yet.");
                return Ok(());
            }
            for log in &logs {
                println!(
                    "- {} | diarrhea {} | mucositis {} | neutropenia {} | fever {} | next due {}",
                    placeholder(&dates::normalize(log.call_time.trimmed())),
                    placeholder(log.diarrhea.trimmed()),
                    placeholder(log.mucositis.trimmed()),
                    placeholder(log.neutropenia.trimmed()),
                    placeholder(log.fever.trimmed()),
                    placeholder(&dates::normalize(log.next_due.trimmed())),
                );
            }
            println!("{} follow-ups", logs.len());
        }
        Commands::SavePhoneLog { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let mut log: PhoneLog = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a valid phone log", file.display()))?;
            if log.log_id.is_empty() {
                log.log_id = SheetsClient::new_log_id().into();
            }
            if log.call_time.is_empty() {
                log.call_time = chrono::Utc::now().to_rfc3339().into();
            }
            if let Err(error) = client.save_phone_log(&log).await {
                eprintln!("{}", api::save_failure_message(&error));
                return Err(error.into());
            }

            // A rescheduled call moves the patient's next due date, and any
            // DPYD answer is promoted onto the assessment record.
            let patient_id = log.id.trimmed();
            if !patient_id.is_empty() {
                if !log.next_due.is_empty() {
                    let patch = vec![(
                        "followup_due".to_string(),
                        log.next_due.trimmed().to_string(),
                    )];
                    client.update_assessment_fields(patient_id, &patch).await?;
                }
                if !log.dpyd_present.is_empty() || !log.dpyd_type.is_empty() {
                    let patch = vec![
                        ("dpyd_present".to_string(), log.dpyd_present.trimmed().to_string()),
                        ("dpyd_type".to_string(), log.dpyd_type.trimmed().to_string()),
                    ];
                    client.update_assessment_fields(patient_id, &patch).await?;
                }
            }
            cache.invalidate().await;
            println!("Saved.");
        }
        Commands::DeletePhoneLog {
            log_id,
            id,
            call_time,
        } => {
            let request = DeletePhoneLog {
                id,
                log_id,
                call_time,
            };
            match client.delete_phone_log(&request).await {
                Ok(()) | Err(ApiError::NotFound) => {
                    cache.invalidate().await;
                    println!("Record deleted successfully.");
                }
                Err(error) => {
                    eprintln!("{}", api::delete_failure_message(&error));
                    return Err(error.into());
                }
            }
        }
    }

    Ok(())
}

async fn fetch_assessments(
    cache: &FetchCache,
    client: &SheetsClient,
) -> Result<Vec<models::Assessment>, ApiError> {
    cache.assessments(|| client.list_assessments()).await
}

/// Fetch assessments and phone logs concurrently. A failed phone-log fetch
/// degrades to an empty list rather than blocking the view.
async fn fetch_both(
    cache: &FetchCache,
    client: &SheetsClient,
) -> Result<(Vec<models::Assessment>, Vec<PhoneLog>), ApiError> {
    let (assessments, logs) = tokio::join!(
        fetch_assessments(cache, client),
        cache.all_phone_logs(|| client.list_phone_logs_all()),
    );
    let logs = match logs {
        Ok(logs) => logs,
        Err(error) => {
            tracing::warn!(%error, "phone log fetch failed, continuing without phone logs");
            Vec::new()
        }
    };
    Ok((assessments?, logs))
}

fn placeholder(value: &str) -> &str {
    if value.is_empty() {
        "—"
    } else {
        value
    }
}

fn parse_bucket(name: &str) -> anyhow::Result<DueBucket> {
    match name.trim().to_lowercase().as_str() {
        "none" => Ok(DueBucket::None),
        "overdue" => Ok(DueBucket::Overdue),
        "today" => Ok(DueBucket::Today),
        "week" => Ok(DueBucket::Week),
        "later" => Ok(DueBucket::Later),
        other => anyhow::bail!("unknown bucket '{other}' (overdue, today, week, later, none)"),
    }
}

fn parse_agg(name: &str) -> anyhow::Result<Aggregation> {
    match name.trim().to_lowercase().as_str() {
        "count" => Ok(Aggregation::Count),
        "avg-grade" | "avg" => Ok(Aggregation::AverageGrade),
        "max" => Ok(Aggregation::Max),
        "percent-row" | "%row" => Ok(Aggregation::PercentOfRow),
        other => anyhow::bail!("unknown aggregation '{other}' (count, avg-grade, max, percent-row)"),
    }
}

fn parse_whole_field(name: &str) -> anyhow::Result<WholeField> {
    WholeField::parse(name)
        .with_context(|| format!("'{name}' is not a whole-result field"))
}

fn split_pair(spec: &str) -> anyhow::Result<(&str, &str)> {
    spec.split_once('=')
        .with_context(|| format!("'{spec}' is not FIELD=VALUE"))
}

fn parse_drill(spec: &str) -> anyhow::Result<(usize, usize)> {
    let (row, col) = spec
        .split_once(':')
        .with_context(|| format!("'{spec}' is not ROW:COL"))?;
    Ok((row.trim().parse()?, col.trim().parse()?))
}

fn print_pivot(
    table: &PivotTable,
    corner: &str,
    drill: Option<(usize, usize)>,
    sheet_name: &str,
    csv: Option<PathBuf>,
    xls: Option<PathBuf>,
) -> anyhow::Result<()> {
    let rendered = export::Table::from_pivot(table, corner);
    print!("{}", render_table(&rendered));

    if let Some((row, col)) = drill {
        let names = table.drill_cell(row, col);
        let row_label = table.row_labels.get(row).map(String::as_str).unwrap_or("—");
        let col_label = table.col_labels.get(col).map(String::as_str).unwrap_or("—");
        println!();
        println!("Patients in {row_label} / {col_label}:");
        if names.is_empty() {
            println!("No patients.");
        } else {
            for name in names {
                println!("- {name}");
            }
        }
    }

    write_exports(&rendered, sheet_name, csv.as_deref(), xls.as_deref())
}

fn write_exports(
    table: &export::Table,
    sheet_name: &str,
    csv: Option<&std::path::Path>,
    xls: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    if let Some(path) = csv {
        std::fs::write(path, export::to_csv(table)?)?;
        println!("CSV written to {}.", path.display());
    }
    if let Some(path) = xls {
        std::fs::write(path, export::to_excel_xml(table, sheet_name))?;
        println!("Excel XML written to {}.", path.display());
    }
    Ok(())
}

/// Plain column-aligned text rendering of a table.
fn render_table(table: &export::Table) -> String {
    let mut widths: Vec<usize> = table.header.iter().map(|h| h.chars().count()).collect();
    for row in &table.rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let render_row = |cells: &[String]| {
        let mut line = String::new();
        for (i, cell) in cells.iter().enumerate() {
            if i > 0 {
                line.push_str("  ");
            }
            line.push_str(cell);
            let pad = widths.get(i).copied().unwrap_or(0).saturating_sub(cell.chars().count());
            line.push_str(&" ".repeat(pad));
        }
        line.trim_end().to_string() + "\n"
    };

    let mut out = render_row(&table.header);
    out.push_str(&"-".repeat(widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1)));
    out.push('\n');
    for row in &table.rows {
        out.push_str(&render_row(row));
    }
    out
}
