//! Bank statement CSV parsing.
//!
//! Accepts the exports banks and the office spreadsheet produce: optional
//! UTF-8 BOM, `;` or `,` delimiter (picked from the header line), quoted
//! fields with `""` escapes, Russian or English column names. Records are
//! read with the `csv` crate in flexible mode, so short rows are allowed.

use crate::models::{ImportRow, MAX_AMOUNT};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

const BOM: char = '\u{feff}';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("invalid date '{0}'")]
    Date(String),
    #[error("invalid amount '{0}'")]
    Amount(String),
    #[error("amount '{0}' exceeds the supported maximum")]
    AmountTooLarge(String),
    #[error("invalid plot_id '{0}'")]
    PlotId(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedStatement {
    pub delimiter: char,
    pub rows: Vec<ImportRow>,
    pub errors: Vec<LineError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Date,
    Amount,
    Purpose,
    Payer,
    Label,
    Reference,
    Category,
    PlotId,
}

fn column_for(header: &str) -> Option<Column> {
    let name = header
        .trim_matches(|c: char| c == BOM || c.is_whitespace())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let column = match name.as_str() {
        "date" | "paid_at" | "дата" | "дата платежа" | "дата операции" => Column::Date,
        "amount" | "sum" | "сумма" | "сумма платежа" => Column::Amount,
        "purpose" | "comment" | "description" | "назначение" | "назначение платежа"
        | "комментарий" => Column::Purpose,
        "payer" | "плательщик" | "фио" => Column::Payer,
        "label" | "plot" | "участок" | "адрес" => Column::Label,
        "reference" | "ref" | "bank_reference" | "референс" | "номер документа" => {
            Column::Reference
        }
        "category" | "категория" => Column::Category,
        "plot_id" => Column::PlotId,
        _ => return None,
    };
    Some(column)
}

/// `;` unless the header clearly uses `,`.
fn detect_delimiter(header_line: &str) -> char {
    let semicolons = header_line.matches(';').count();
    let commas = header_line.matches(',').count();
    if commas > semicolons {
        ','
    } else {
        ';'
    }
}

/// Line a record starts on. The reader reports where it began reading,
/// which is before any blank lines it skipped on the way.
fn record_line(text: &str, position: &csv::Position) -> usize {
    let skipped = usize::try_from(position.byte())
        .ok()
        .and_then(|offset| text.as_bytes().get(offset..))
        .unwrap_or_default()
        .iter()
        .take_while(|b| matches!(b, b'\r' | b'\n'))
        .filter(|b| **b == b'\n')
        .count();
    usize::try_from(position.line()).unwrap_or(usize::MAX) + skipped
}

/// Records tagged with their starting line. Quoted fields may span lines;
/// whitespace-only records are dropped.
fn read_records(text: &str, delimiter: char) -> Vec<(usize, Result<Vec<String>, String>)> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter as u8)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    let mut record = csv::StringRecord::new();
    loop {
        let start = reader.position().clone();
        match reader.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                if record.iter().all(|f| f.trim().is_empty()) {
                    continue;
                }
                let fields = record.iter().map(str::to_string).collect();
                records.push((record_line(text, &start), Ok(fields)));
            }
            Err(e) => {
                let line = e
                    .position()
                    .map_or_else(|| record_line(text, &start), |p| record_line(text, p));
                records.push((line, Err(format!("malformed record: {}", e))));
            }
        }
    }
    records
}

pub fn parse_amount(raw: &str) -> Result<Decimal, FieldError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}' && *c != '\u{202f}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    let amount =
        Decimal::from_str(&cleaned).map_err(|_| FieldError::Amount(raw.trim().to_string()))?;
    if amount > MAX_AMOUNT {
        return Err(FieldError::AmountTooLarge(raw.trim().to_string()));
    }
    Ok(amount)
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, FieldError> {
    let value = raw.trim();
    for format in ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Ok(date);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.date_naive());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%d.%m.%Y %H:%M:%S", "%d.%m.%Y %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(dt.date());
        }
    }
    Err(FieldError::Date(value.to_string()))
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn row_from_fields(
    line: usize,
    columns: &[Option<Column>],
    fields: &[String],
) -> Result<ImportRow, FieldError> {
    let mut row = ImportRow {
        line,
        ..ImportRow::default()
    };

    for (column, value) in columns.iter().zip(fields.iter()) {
        let Some(column) = column else { continue };
        match column {
            Column::Date => row.paid_at = Some(parse_date(value)?),
            Column::Amount => row.amount = Some(parse_amount(value)?),
            Column::Purpose => row.purpose = value.trim().to_string(),
            Column::Payer => row.payer = non_empty(value),
            Column::Label => row.label = non_empty(value),
            Column::Reference => row.reference = non_empty(value),
            Column::Category => row.category = non_empty(value),
            Column::PlotId => {
                row.plot_id = match non_empty(value) {
                    Some(v) => Some(Uuid::from_str(&v).map_err(|_| FieldError::PlotId(v))?),
                    None => None,
                }
            }
        }
    }

    Ok(row)
}

/// Parse a statement. Structural problems (no header, no date/amount
/// column, too many rows) fail the whole statement; bad values only fail
/// their own line.
pub fn parse_statement(text: &str, max_rows: usize) -> Result<ParsedStatement, AppError> {
    let text = text.trim_start_matches(BOM);
    let header_line = text.lines().find(|l| !l.trim().is_empty()).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("Statement is empty"))
    })?;
    let delimiter = detect_delimiter(header_line);

    let mut records = read_records(text, delimiter).into_iter();
    let header = match records.next() {
        Some((_, Ok(header))) => header,
        Some((line, Err(message))) => {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Header on line {}: {}",
                line,
                message
            )))
        }
        None => return Err(AppError::BadRequest(anyhow::anyhow!("Statement is empty"))),
    };
    let columns: Vec<Option<Column>> = header.iter().map(|h| column_for(h)).collect();

    for (required, name) in [(Column::Date, "date"), (Column::Amount, "amount")] {
        if !columns.contains(&Some(required)) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Statement has no '{}' column",
                name
            )));
        }
    }

    let mut parsed = ParsedStatement {
        delimiter,
        ..ParsedStatement::default()
    };
    for (line, fields) in records {
        if parsed.rows.len() + parsed.errors.len() >= max_rows {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Statement exceeds {} rows",
                max_rows
            )));
        }
        let row = fields.and_then(|fields| {
            row_from_fields(line, &columns, &fields).map_err(|e| e.to_string())
        });
        match row {
            Ok(row) => parsed.rows.push(row),
            Err(message) => parsed.errors.push(LineError { line, message }),
        }
    }

    tracing::debug!(
        rows = parsed.rows.len(),
        errors = parsed.errors.len(),
        delimiter = %parsed.delimiter,
        "Statement parsed"
    );

    Ok(parsed)
}
