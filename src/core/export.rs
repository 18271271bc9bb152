use std::io::Write;

use super::error::ExportError;
use super::types::ProjectionResult;

const BASE_COLUMNS: [&str; 9] = [
    "year",
    "age",
    "gross_salary",
    "coordinated_salary",
    "total_contribution",
    "occupational_capital",
    "personal_savings_capital",
    "indexed_capital",
    "total_capital",
];
const WITHDRAWAL_COLUMN: &str = "withdrawal_total";

/// Writes one row per simulated year. The `coordinated_salary` column holds the
/// insured salary, after the ceiling, on which contributions are charged. The
/// withdrawal column only exists when a withdrawal year is set, and is empty
/// outside that year.
pub fn write_yearly_csv<W: Write>(
    result: &ProjectionResult,
    writer: W,
) -> Result<W, ExportError> {
    let with_withdrawal = result.withdrawal_year.is_some();
    let mut csv = csv::Writer::from_writer(writer);

    let mut header = BASE_COLUMNS.to_vec();
    if with_withdrawal {
        header.push(WITHDRAWAL_COLUMN);
    }
    csv.write_record(&header)?;

    for row in &result.yearly {
        let mut record = vec![
            row.year.to_string(),
            row.age.to_string(),
            row.gross_salary.to_string(),
            row.insured_salary.to_string(),
            row.total_contribution.to_string(),
            row.occupational_capital.to_string(),
            row.personal_savings_capital.to_string(),
            row.indexed_capital.to_string(),
            row.total_capital.to_string(),
        ];
        if with_withdrawal {
            record.push(row.withdrawal.map(|v| v.to_string()).unwrap_or_default());
        }
        csv.write_record(&record)?;
    }

    csv.into_inner().map_err(|e| ExportError::Io(e.into_error()))
}

pub fn yearly_csv_string(result: &ProjectionResult) -> Result<String, ExportError> {
    let bytes = write_yearly_csv(result, Vec::new())?;
    Ok(String::from_utf8(bytes)?)
}
