use crate::pivot::PivotTable;
use crate::whole::WholeRow;

/// A rendered table ready for serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn from_pivot(pivot: &PivotTable, corner: &str) -> Table {
        let mut header = Vec::with_capacity(pivot.col_labels.len() + 2);
        header.push(corner.to_string());
        header.extend(pivot.col_labels.iter().cloned());
        header.push("Total".to_string());

        let rows = pivot
            .row_labels
            .iter()
            .enumerate()
            .map(|(i, row_label)| {
                let mut row = Vec::with_capacity(pivot.col_labels.len() + 2);
                row.push(row_label.clone());
                row.extend(pivot.matrix[i].iter().map(|cell| {
                    if cell.is_empty() {
                        "—".to_string()
                    } else {
                        cell.clone()
                    }
                }));
                row.push(pivot.row_totals[i].to_string());
                row
            })
            .collect();

        Table { header, rows }
    }

    pub fn from_whole(rows: &[WholeRow]) -> Table {
        Table {
            header: WholeRow::HEADERS.iter().map(|h| h.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| {
                    r.values()
                        .iter()
                        .map(|v| if v.is_empty() { "—".to_string() } else { v.to_string() })
                        .collect()
                })
                .collect(),
        }
    }
}

/// CSV with standard quoting and CRLF rows, prefixed with a UTF-8 BOM so
/// spreadsheet imports pick the right encoding.
pub fn to_csv(table: &Table) -> Result<String, anyhow::Error> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    writer.write_record(&table.header)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    let bytes = writer.into_inner()?;
    Ok(format!("\u{feff}{}", String::from_utf8(bytes)?))
}

fn xml_escape(value: &str) -> String {
    value.replace('&', "&amp;").replace('<', "&lt;")
}

/// Excel 2003 SpreadsheetML workbook with a single worksheet; every cell is
/// typed String, matching what the sheet holds.
pub fn to_excel_xml(table: &Table, sheet_name: &str) -> String {
    let mut rows = String::new();
    for record in std::iter::once(&table.header).chain(table.rows.iter()) {
        rows.push_str("<Row>");
        for cell in record {
            rows.push_str(&format!(
                "<Cell><Data ss:Type=\"String\">{}</Data></Cell>",
                xml_escape(cell)
            ));
        }
        rows.push_str("</Row>");
    }
    format!(
        r#"<?xml version="1.0"?>
<?mso-application progid="Excel.Sheet"?>
<Workbook xmlns="urn:schemas-microsoft-com:office:spreadsheet"
 xmlns:o="urn:schemas-microsoft-com:office:office"
 xmlns:x="urn:schemas-microsoft-com:office:excel"
 xmlns:ss="urn:schemas-microsoft-com:office:spreadsheet">
 <Worksheet ss:Name="{}">
  <Table>{rows}</Table>
 </Worksheet>
</Workbook>"#,
        sheet_name.replace('"', "")
    )
}
