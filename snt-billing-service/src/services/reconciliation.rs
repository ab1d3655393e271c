//! Balance aggregation: per-period reconciliation and cross-period debtors.
//!
//! Both are pure functions of their inputs. Sums are exact decimals and rows
//! come out of ordered maps, so input order never changes the result. A sum
//! that leaves the decimal range is a request error, never a panic.

use crate::models::{
    money, Accrual, BalanceRow, DebtorRow, Payment, Period, ReconciliationReport,
};
use crate::services::directory::PlotDirectory;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::BTreeMap;
use uuid::Uuid;

fn overflow() -> AppError {
    AppError::BadRequest(anyhow::anyhow!("Balance exceeds the supported amount range"))
}

fn add(a: Decimal, b: Decimal) -> Result<Decimal, AppError> {
    a.checked_add(b).ok_or_else(overflow)
}

fn sub(a: Decimal, b: Decimal) -> Result<Decimal, AppError> {
    a.checked_sub(b).ok_or_else(overflow)
}

fn total(mut values: impl Iterator<Item = Decimal>) -> Result<Decimal, AppError> {
    values.try_fold(Decimal::ZERO, add)
}

#[derive(Default)]
struct Totals {
    accrued: Decimal,
    paid: Decimal,
    payment_count: usize,
}

/// Accrued vs. paid for every plot touched by `period`.
///
/// A plot is included when it has an accrual in the period or a live
/// payment dated inside `[from, to]`. Voided payments never count.
pub fn build_reconciliation(
    period: &Period,
    accruals: &[Accrual],
    payments: &[Payment],
    directory: &PlotDirectory,
) -> Result<ReconciliationReport, AppError> {
    let mut per_plot: BTreeMap<Uuid, Totals> = BTreeMap::new();

    for accrual in accruals.iter().filter(|a| a.period_id == period.period_id) {
        let totals = per_plot.entry(accrual.plot_id).or_default();
        totals.accrued = add(totals.accrued, accrual.amount_accrued)?;
    }

    for payment in payments
        .iter()
        .filter(|p| !p.is_voided && period.contains(p.paid_at))
    {
        let totals = per_plot.entry(payment.plot_id).or_default();
        totals.paid = add(totals.paid, payment.amount)?;
        totals.payment_count += 1;
    }

    let mut rows = per_plot
        .into_iter()
        .map(|(plot_id, t)| {
            Ok(BalanceRow {
                plot_id,
                label: directory.label_of(&plot_id),
                accrued: money(t.accrued),
                paid: money(t.paid),
                balance: money(sub(t.paid, t.accrued)?),
                payment_count: t.payment_count,
            })
        })
        .collect::<Result<Vec<BalanceRow>, AppError>>()?;
    rows.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.plot_id.cmp(&b.plot_id)));

    let total_accrued = total(rows.iter().map(|r| r.accrued))?;
    let total_paid = total(rows.iter().map(|r| r.paid))?;

    Ok(ReconciliationReport {
        period_id: period.period_id,
        rows,
        total_accrued: money(total_accrued),
        total_paid: money(total_paid),
        total_balance: money(sub(total_paid, total_accrued)?),
    })
}

/// Plots whose total accrued across all periods exceeds their total live
/// payments by more than `min_debt`, largest debt first.
pub fn build_debtors(
    accruals: &[Accrual],
    payments: &[Payment],
    directory: &PlotDirectory,
    min_debt: Decimal,
) -> Result<Vec<DebtorRow>, AppError> {
    let mut per_plot: BTreeMap<Uuid, Totals> = BTreeMap::new();

    for accrual in accruals {
        let totals = per_plot.entry(accrual.plot_id).or_default();
        totals.accrued = add(totals.accrued, accrual.amount_accrued)?;
    }
    for payment in payments.iter().filter(|p| !p.is_voided) {
        let totals = per_plot.entry(payment.plot_id).or_default();
        totals.paid = add(totals.paid, payment.amount)?;
    }

    let mut debtors = Vec::new();
    for (plot_id, t) in per_plot {
        let debt = sub(t.accrued, t.paid)?;
        if debt <= min_debt || debt <= Decimal::ZERO {
            continue;
        }
        debtors.push(DebtorRow {
            plot_id,
            label: directory.label_of(&plot_id),
            owner_name: directory.get(&plot_id).and_then(|p| p.owner_name.clone()),
            accrued: money(t.accrued),
            paid: money(t.paid),
            debt: money(debt),
        });
    }
    debtors.sort_by(|a, b| {
        b.debt
            .cmp(&a.debt)
            .then_with(|| a.label.cmp(&b.label))
            .then_with(|| a.plot_id.cmp(&b.plot_id))
    });
    Ok(debtors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchStatus, PeriodStatus, Plot};
    use chrono::{NaiveDate, Utc};
    use std::str::FromStr;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn january() -> Period {
        Period {
            period_id: Uuid::new_v4(),
            title: "Январь 2025".to_string(),
            from: date("2025-01-01"),
            to: date("2025-01-31"),
            status: PeriodStatus::Approved,
            created_utc: Utc::now(),
            closed_utc: None,
        }
    }

    fn directory_with(numbers: &[&str]) -> (PlotDirectory, Vec<Uuid>) {
        let mut dir = PlotDirectory::new();
        let mut ids = Vec::new();
        for n in numbers {
            let plot = Plot {
                plot_id: Uuid::new_v4(),
                street: "Лесная".to_string(),
                number: n.to_string(),
                owner_name: Some(format!("Owner {}", n)),
                area: None,
                account_number: None,
                created_utc: Utc::now(),
            };
            ids.push(plot.plot_id);
            dir.insert(plot).unwrap();
        }
        (dir, ids)
    }

    fn accrual(period: &Period, plot_id: Uuid, category: &str, amount: &str) -> Accrual {
        Accrual {
            accrual_id: Uuid::new_v4(),
            period_id: period.period_id,
            plot_id,
            category: category.to_string(),
            amount_accrued: dec(amount),
            amount_paid: Decimal::ZERO,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    fn payment(plot_id: Uuid, amount: &str, paid_at: &str, voided: bool) -> Payment {
        Payment {
            payment_id: Uuid::new_v4(),
            plot_id,
            category: "membership".to_string(),
            amount: dec(amount),
            paid_at: date(paid_at),
            purpose: String::new(),
            payer: None,
            reference: None,
            fingerprint: None,
            matched_plot_id: Some(plot_id),
            match_status: MatchStatus::Matched,
            match_confidence: 1.0,
            match_reason: None,
            auto_allocate_disabled: false,
            is_voided: voided,
            voided_utc: None,
            import_batch_id: None,
            created_by: "test".to_string(),
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn test_balance_per_plot() {
        let period = january();
        let (dir, ids) = directory_with(&["1", "2"]);
        let accruals = vec![
            accrual(&period, ids[0], "membership", "1000"),
            accrual(&period, ids[0], "target", "500"),
            accrual(&period, ids[1], "membership", "1000"),
        ];
        let payments = vec![
            payment(ids[0], "400", "2025-01-10", false),
            payment(ids[1], "1000", "2025-01-31", false),
        ];

        let report = build_reconciliation(&period, &accruals, &payments, &dir).unwrap();
        assert_eq!(report.rows.len(), 2);

        let first = &report.rows[0];
        assert_eq!(first.plot_id, ids[0]);
        assert_eq!(first.accrued, dec("1500.00"));
        assert_eq!(first.paid, dec("400.00"));
        assert_eq!(first.balance, dec("-1100.00"));
        assert_eq!(first.accrued.to_string(), "1500.00");

        assert_eq!(report.rows[1].balance, Decimal::ZERO);
        assert_eq!(report.total_accrued, dec("2500"));
        assert_eq!(report.total_paid, dec("1400"));
        assert_eq!(report.total_balance, dec("-1100"));
    }

    #[test]
    fn test_voided_and_out_of_window_payments_excluded() {
        let period = january();
        let (dir, ids) = directory_with(&["1"]);
        let accruals = vec![accrual(&period, ids[0], "membership", "1000")];
        let payments = vec![
            payment(ids[0], "400", "2025-01-10", true),
            payment(ids[0], "300", "2024-12-31", false),
            payment(ids[0], "200", "2025-02-01", false),
        ];

        let report = build_reconciliation(&period, &accruals, &payments, &dir).unwrap();
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].paid, Decimal::ZERO);
        assert_eq!(report.rows[0].payment_count, 0);
    }

    #[test]
    fn test_payment_without_accrual_creates_row() {
        let period = january();
        let (dir, ids) = directory_with(&["1"]);
        let payments = vec![payment(ids[0], "250", "2025-01-05", false)];

        let report = build_reconciliation(&period, &[], &payments, &dir).unwrap();
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].balance, dec("250"));
    }

    #[test]
    fn test_rebuild_is_identical() {
        let period = january();
        let (dir, ids) = directory_with(&["1", "2", "3"]);
        let accruals: Vec<_> = ids
            .iter()
            .map(|id| accrual(&period, *id, "membership", "1000"))
            .collect();
        let mut payments = vec![
            payment(ids[2], "10.10", "2025-01-03", false),
            payment(ids[0], "20.20", "2025-01-04", false),
            payment(ids[1], "30.30", "2025-01-05", false),
        ];

        let first = build_reconciliation(&period, &accruals, &payments, &dir).unwrap();
        payments.reverse();
        let second = build_reconciliation(&period, &accruals, &payments, &dir).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_overflowing_sums_are_errors() {
        let period = january();
        let (dir, ids) = directory_with(&["1"]);
        let mut first = payment(ids[0], "1", "2025-01-10", false);
        first.amount = Decimal::MAX;
        let mut second = payment(ids[0], "1", "2025-01-11", false);
        second.amount = Decimal::MAX;
        let payments = vec![first, second];

        assert!(matches!(
            build_reconciliation(&period, &[], &payments, &dir),
            Err(AppError::BadRequest(_))
        ));

        let mut huge = accrual(&period, ids[0], "membership", "1");
        huge.amount_accrued = Decimal::MAX;
        let accruals = vec![huge.clone(), huge];
        assert!(matches!(
            build_debtors(&accruals, &[], &dir, Decimal::ZERO),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_debtors_sorted_by_debt() {
        let period = january();
        let (dir, ids) = directory_with(&["1", "2", "3"]);
        let accruals = vec![
            accrual(&period, ids[0], "membership", "1000"),
            accrual(&period, ids[1], "membership", "3000"),
            accrual(&period, ids[2], "membership", "500"),
        ];
        let payments = vec![
            payment(ids[0], "900", "2025-01-10", false),
            payment(ids[2], "500", "2025-01-10", false),
            payment(ids[1], "3000", "2025-01-10", true),
        ];

        let debtors = build_debtors(&accruals, &payments, &dir, Decimal::ZERO).unwrap();
        assert_eq!(debtors.len(), 2);
        assert_eq!(debtors[0].plot_id, ids[1]);
        assert_eq!(debtors[0].debt, dec("3000"));
        assert_eq!(debtors[0].owner_name.as_deref(), Some("Owner 2"));
        assert_eq!(debtors[1].debt, dec("100"));

        let big_only = build_debtors(&accruals, &payments, &dir, dec("100")).unwrap();
        assert_eq!(big_only.len(), 1);
    }
}
