//! CSV exports for the office: payments register and debtor list.
//!
//! Excel-friendly: UTF-8 BOM, `;` delimiter, fixed column order.

use crate::models::{money, DebtorRow, Payment};
use crate::services::directory::PlotDirectory;
use service_core::error::AppError;

pub const BOM: &str = "\u{feff}";
pub const DELIMITER: u8 = b';';

pub const PAYMENT_COLUMNS: [&str; 9] = [
    "id",
    "paid_at",
    "plot",
    "category",
    "amount",
    "reference",
    "purpose",
    "match_status",
    "voided",
];

pub const DEBTOR_COLUMNS: [&str; 5] = ["plot", "owner", "accrued", "paid", "debt"];

fn csv_error(err: csv::Error) -> AppError {
    AppError::InternalError(anyhow::Error::new(err).context("CSV export failed"))
}

/// Writer over a buffer that already holds the BOM.
fn writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .delimiter(DELIMITER)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(BOM.as_bytes().to_vec())
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String, AppError> {
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("CSV export failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| AppError::InternalError(anyhow::Error::new(e)))
}

pub fn payments_csv(payments: &[Payment], directory: &PlotDirectory) -> Result<String, AppError> {
    let mut out = writer();
    out.write_record(PAYMENT_COLUMNS).map_err(csv_error)?;
    for p in payments {
        out.write_record([
            p.payment_id.to_string(),
            p.paid_at.format("%Y-%m-%d").to_string(),
            directory.label_of(&p.plot_id),
            p.category.clone(),
            money(p.amount).to_string(),
            p.reference.clone().unwrap_or_default(),
            p.purpose.clone(),
            p.match_status.as_str().to_string(),
            if p.is_voided { "1" } else { "0" }.to_string(),
        ])
        .map_err(csv_error)?;
    }
    finish(out)
}

pub fn debtors_csv(debtors: &[DebtorRow]) -> Result<String, AppError> {
    let mut out = writer();
    out.write_record(DEBTOR_COLUMNS).map_err(csv_error)?;
    for d in debtors {
        out.write_record([
            d.label.clone(),
            d.owner_name.clone().unwrap_or_default(),
            d.accrued.to_string(),
            d.paid.to_string(),
            d.debt.to_string(),
        ])
        .map_err(csv_error)?;
    }
    finish(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatchStatus;
    use crate::services::statement::parse_statement;
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    #[test]
    fn test_debtors_csv_layout() {
        let debtors = vec![DebtorRow {
            plot_id: Uuid::new_v4(),
            label: "Лесная, 12".to_string(),
            owner_name: Some("Иванов \"старший\"".to_string()),
            accrued: Decimal::new(100000, 2),
            paid: Decimal::new(40000, 2),
            debt: Decimal::new(60000, 2),
        }];

        let csv = debtors_csv(&debtors).unwrap();
        assert!(csv.starts_with(BOM));
        let lines: Vec<&str> = csv.trim_start_matches(BOM).lines().collect();
        assert_eq!(lines[0], "plot;owner;accrued;paid;debt");
        assert_eq!(
            lines[1],
            "Лесная, 12;\"Иванов \"\"старший\"\"\";1000.00;400.00;600.00"
        );
    }

    #[test]
    fn test_payments_csv_reads_back_as_statement() {
        let plot_id = Uuid::new_v4();
        let payment = Payment {
            payment_id: Uuid::new_v4(),
            plot_id,
            category: "membership".to_string(),
            amount: Decimal::new(40000, 2),
            paid_at: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            purpose: "Взнос;\rЛесная 12\nянварь".to_string(),
            payer: None,
            reference: Some("row-1".to_string()),
            fingerprint: None,
            matched_plot_id: Some(plot_id),
            match_status: MatchStatus::Matched,
            match_confidence: 1.0,
            match_reason: None,
            auto_allocate_disabled: false,
            is_voided: false,
            voided_utc: None,
            import_batch_id: None,
            created_by: "test".to_string(),
            created_utc: Utc::now(),
        };

        let csv = payments_csv(&[payment.clone()], &PlotDirectory::new()).unwrap();
        assert!(!csv.contains("\r\n"));

        let parsed = parse_statement(&csv, 10).unwrap();
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.rows.len(), 1);
        let row = &parsed.rows[0];
        assert_eq!(row.purpose, payment.purpose);
        assert_eq!(row.amount, Some(payment.amount));
        assert_eq!(row.reference.as_deref(), Some("row-1"));
        assert_eq!(row.category.as_deref(), Some("membership"));
    }
}
