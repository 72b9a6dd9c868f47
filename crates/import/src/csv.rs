use chrono::NaiveDate;
use fatura_core::{Money, StatementLine};
use serde::{Deserialize, Serialize};
use std::io::Read;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatementColumns {
    pub date_column: usize,
    pub description_column: usize,
    pub amount_column: usize,
    pub date_format: String,
}

impl Default for StatementColumns {
    fn default() -> Self {
        Self {
            date_column: 0,
            description_column: 1,
            amount_column: 2,
            date_format: "%d/%m/%Y".to_string(),
        }
    }
}

/// Describes how a card issuer lays out its CSV export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatementProfile {
    pub name: String,
    pub columns: StatementColumns,
    pub has_header: bool,
    pub delimiter: String,
    /// Some issuers print purchases as negative numbers; flip them to the
    /// purchases-positive convention.
    pub purchases_negative: bool,
}

impl Default for StatementProfile {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            columns: StatementColumns::default(),
            has_header: true,
            delimiter: ",".to_string(),
            purchases_negative: false,
        }
    }
}

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Row {row}: missing column {column}")]
    MissingColumn { row: usize, column: usize },
    #[error("Row {row}: invalid date '{value}'")]
    InvalidDate { row: usize, value: String },
    #[error("Row {row}: invalid amount '{value}'")]
    InvalidAmount { row: usize, value: String },
    #[error("No data rows")]
    NoDataRows,
}

pub fn parse_statement<R: Read>(data: R, profile: &StatementProfile) -> Result<Vec<StatementLine>, CsvError> {
    let delimiter = profile
        .delimiter
        .as_bytes()
        .first()
        .copied()
        .unwrap_or(b',');
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(profile.has_header)
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(data);

    let cols = &profile.columns;
    let mut lines = Vec::new();

    for (idx, result) in reader.records().enumerate() {
        let record = result?;
        let row = idx + 1;

        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }

        let field = |column: usize| {
            record
                .get(column)
                .map(str::trim)
                .ok_or(CsvError::MissingColumn { row, column })
        };

        let date_raw = field(cols.date_column)?;
        let date = parse_date(date_raw, &cols.date_format).ok_or_else(|| CsvError::InvalidDate {
            row,
            value: date_raw.to_string(),
        })?;

        let description = field(cols.description_column)?;

        let amount_raw = field(cols.amount_column)?;
        let mut amount: Money = amount_raw.parse().map_err(|_| CsvError::InvalidAmount {
            row,
            value: amount_raw.to_string(),
        })?;
        if profile.purchases_negative {
            amount = -amount;
        }

        lines.push(StatementLine::new(date, description, amount));
    }

    if lines.is_empty() {
        return Err(CsvError::NoDataRows);
    }

    Ok(lines)
}

fn parse_date(s: &str, format: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(s, format) {
        return Some(date);
    }

    ["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y", "%Y/%m/%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}
