use super::{not_found, timer, Ledger};
use crate::models::{
    normalize_category, ImportBatch, ImportBatchStatus, ImportReport, ImportRow, MatchStatus,
    Payment, RollbackResult, RowOutcome, RowReport,
};
use crate::services::fingerprint::{payment_fingerprint, FingerprintInput};
use crate::services::matcher::{match_label, MatchResult};
use crate::services::metrics::{record_import_row, record_payment_match};
use crate::services::statement::ParsedStatement;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::error::AppError;
use std::collections::HashSet;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct ImportOptions {
    #[serde(default = "default_source_name")]
    pub source_name: String,
    /// Used for rows without a category column.
    #[serde(default = "default_category")]
    pub default_category: String,
}

fn default_source_name() -> String {
    "statement.csv".to_string()
}

fn default_category() -> String {
    "membership".to_string()
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            source_name: default_source_name(),
            default_category: default_category(),
        }
    }
}

struct NewImported {
    plot_id: Uuid,
    category: String,
    amount: Decimal,
    paid_at: NaiveDate,
    fingerprint: Option<String>,
    matched: MatchResult,
}

/// What a row turns into, decided before anything is written.
enum Planned {
    Create(NewImported),
    Skip(RowOutcome),
}

fn outcome_label(outcome: &RowOutcome) -> &'static str {
    match outcome {
        RowOutcome::Created { .. } => "created",
        RowOutcome::Duplicate { .. } => "duplicate",
        RowOutcome::Unmatched { .. } => "unmatched",
        RowOutcome::PeriodClosed { .. } => "period_closed",
        RowOutcome::Invalid { .. } => "invalid",
    }
}

fn invalid(message: impl Into<String>) -> Planned {
    Planned::Skip(RowOutcome::Invalid {
        message: message.into(),
    })
}

impl Ledger {
    fn plan_row(
        &self,
        row: &ImportRow,
        options: &ImportOptions,
        seen: &mut HashSet<String>,
    ) -> Planned {
        let Some(paid_at) = row.paid_at else {
            return invalid("date is required");
        };
        let amount = match row.amount {
            Some(amount) if amount > Decimal::ZERO => amount,
            Some(_) => return invalid("amount must be positive"),
            None => return invalid("amount is required"),
        };
        let category = normalize_category(
            row.category
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or(&options.default_category),
        );
        if category.is_empty() {
            return invalid("category is required");
        }

        let label = row
            .label
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(&row.purpose);
        let matched = match_label(&self.directory, label, row.plot_id, &self.matcher);
        let Some(plot_id) = matched.plot_id.filter(|_| matched.is_matched()) else {
            return Planned::Skip(RowOutcome::Unmatched {
                candidates: matched.candidates,
            });
        };

        if let Some(period) = self.period_for_date(paid_at).filter(|p| p.is_closed()) {
            return Planned::Skip(RowOutcome::PeriodClosed {
                period_id: period.period_id,
            });
        }

        // Plot, date and a positive amount are all known here, so the key is
        // always built.
        let fingerprint = payment_fingerprint(&FingerprintInput {
            plot_id: Some(plot_id),
            category: &category,
            paid_at: Some(paid_at),
            amount: Some(amount),
            purpose: &row.purpose,
            reference: row.reference.as_deref(),
        });
        if let Some(ref fp) = fingerprint {
            if let Some(existing) = self.fingerprints.get(fp) {
                return Planned::Skip(RowOutcome::Duplicate {
                    existing_payment_id: Some(*existing),
                    fingerprint: fp.clone(),
                });
            }
            if !seen.insert(fp.clone()) {
                return Planned::Skip(RowOutcome::Duplicate {
                    existing_payment_id: None,
                    fingerprint: fp.clone(),
                });
            }
        }

        Planned::Create(NewImported {
            plot_id,
            category,
            amount,
            paid_at,
            fingerprint,
            matched,
        })
    }

    /// One plan entry per statement line, parse failures included, in line
    /// order.
    fn plan_statement<'a>(
        &self,
        statement: &'a ParsedStatement,
        options: &ImportOptions,
    ) -> Vec<(usize, Option<&'a ImportRow>, Planned)> {
        let mut seen = HashSet::new();
        let mut plan: Vec<(usize, Option<&ImportRow>, Planned)> = statement
            .errors
            .iter()
            .map(|e| (e.line, None, invalid(e.message.clone())))
            .collect();
        for row in &statement.rows {
            let planned = self.plan_row(row, options, &mut seen);
            plan.push((row.line, Some(row), planned));
        }
        plan.sort_by_key(|(line, _, _)| *line);
        plan
    }

    /// Classify every row without changing anything.
    #[instrument(skip(self, statement), fields(rows = statement.rows.len()))]
    pub fn preview_import(
        &self,
        statement: &ParsedStatement,
        options: &ImportOptions,
    ) -> ImportReport {
        let _timer = timer("preview_import");

        let rows = self
            .plan_statement(statement, options)
            .into_iter()
            .map(|(line, _, planned)| RowReport {
                line,
                outcome: match planned {
                    Planned::Create(new) => RowOutcome::Created {
                        plot_id: new.plot_id,
                        payment_id: None,
                        fingerprint: new.fingerprint,
                    },
                    Planned::Skip(outcome) => outcome,
                },
            })
            .collect();

        ImportReport { batch: None, rows }
    }

    /// Turn a parsed statement into payments under a new import batch.
    /// Bad rows are skipped and counted; the batch itself never fails.
    #[instrument(skip(self, statement), fields(rows = statement.rows.len()))]
    pub fn apply_import(
        &mut self,
        statement: &ParsedStatement,
        options: &ImportOptions,
        actor: &str,
    ) -> ImportReport {
        let _timer = timer("apply_import");

        let plan = self.plan_statement(statement, options);
        let mut batch = ImportBatch {
            batch_id: Uuid::new_v4(),
            source_name: options.source_name.clone(),
            created_by: actor.to_string(),
            created_utc: Utc::now(),
            status: ImportBatchStatus::Applied,
            total_rows: plan.len(),
            created: 0,
            duplicates: 0,
            unmatched: 0,
            rejected: 0,
            payment_ids: Vec::new(),
            rolled_back_utc: None,
        };

        let mut reports = Vec::with_capacity(plan.len());
        for (line, row, planned) in plan {
            let outcome = match (planned, row) {
                (Planned::Create(new), Some(row)) => {
                    let plot_id = new.plot_id;
                    let fingerprint = new.fingerprint.clone();
                    let payment_id = self.create_imported_payment(row, new, batch.batch_id, actor);
                    batch.created += 1;
                    batch.payment_ids.push(payment_id);
                    RowOutcome::Created {
                        plot_id,
                        payment_id: Some(payment_id),
                        fingerprint,
                    }
                }
                (Planned::Create(_), None) => RowOutcome::Invalid {
                    message: "row could not be parsed".to_string(),
                },
                (Planned::Skip(outcome), _) => {
                    match outcome {
                        RowOutcome::Duplicate { .. } => batch.duplicates += 1,
                        RowOutcome::Unmatched { .. } => {
                            record_payment_match(MatchStatus::Unmatched.as_str(), "none");
                            batch.unmatched += 1;
                        }
                        _ => batch.rejected += 1,
                    }
                    outcome
                }
            };
            record_import_row(outcome_label(&outcome));
            reports.push(RowReport { line, outcome });
        }

        let auto_allocate: Vec<Uuid> = batch.payment_ids.clone();
        for payment_id in auto_allocate {
            self.auto_allocate(payment_id, actor);
        }

        self.record_audit(
            actor,
            "import.applied",
            batch.batch_id,
            serde_json::json!({
                "source_name": batch.source_name,
                "total_rows": batch.total_rows,
                "created": batch.created,
                "duplicates": batch.duplicates,
                "unmatched": batch.unmatched,
                "rejected": batch.rejected,
            }),
        );
        info!(
            batch_id = %batch.batch_id,
            created = batch.created,
            duplicates = batch.duplicates,
            unmatched = batch.unmatched,
            rejected = batch.rejected,
            "Import applied"
        );

        self.batches.push(batch.clone());
        ImportReport {
            batch: Some(batch),
            rows: reports,
        }
    }

    fn create_imported_payment(
        &mut self,
        row: &ImportRow,
        new: NewImported,
        batch_id: Uuid,
        actor: &str,
    ) -> Uuid {
        let matched = new.matched;
        record_payment_match(
            matched.status.as_str(),
            matched.reason.map(|r| r.as_str()).unwrap_or("none"),
        );

        self.insert_payment(Payment {
            payment_id: Uuid::new_v4(),
            plot_id: new.plot_id,
            category: new.category,
            amount: new.amount,
            paid_at: new.paid_at,
            purpose: row.purpose.clone(),
            payer: row.payer.clone(),
            reference: row.reference.clone().filter(|r| !r.trim().is_empty()),
            fingerprint: new.fingerprint,
            matched_plot_id: Some(new.plot_id),
            match_status: matched.status,
            match_confidence: matched.confidence,
            match_reason: matched.reason,
            auto_allocate_disabled: false,
            is_voided: false,
            voided_utc: None,
            import_batch_id: Some(batch_id),
            created_by: actor.to_string(),
            created_utc: Utc::now(),
        })
    }

    /// Void every live payment of a batch. Rolling back again voids nothing.
    #[instrument(skip(self))]
    pub fn rollback_import(
        &mut self,
        batch_id: Uuid,
        actor: &str,
    ) -> Result<RollbackResult, AppError> {
        let _timer = timer("rollback_import");

        let index = self
            .batches
            .iter()
            .position(|b| b.batch_id == batch_id)
            .ok_or_else(|| not_found("Import batch", &batch_id))?;

        let live: Vec<Uuid> = self
            .payments
            .iter()
            .filter(|p| p.import_batch_id == Some(batch_id) && !p.is_voided)
            .map(|p| p.payment_id)
            .collect();
        for payment_id in &live {
            let paid_at = self.get_payment(payment_id)?.paid_at;
            self.ensure_date_editable(paid_at)?;
            self.ensure_allocations_editable(payment_id)?;
        }
        for payment_id in &live {
            self.void_unchecked(payment_id)?;
        }

        let batch = &mut self.batches[index];
        if batch.status != ImportBatchStatus::RolledBack {
            batch.status = ImportBatchStatus::RolledBack;
            batch.rolled_back_utc = Some(Utc::now());
        }
        self.record_audit(
            actor,
            "import.rolled_back",
            batch_id,
            serde_json::json!({ "voided": live.len() }),
        );
        info!(batch_id = %batch_id, voided = live.len(), "Import rolled back");

        Ok(RollbackResult {
            batch_id,
            voided: live.len(),
        })
    }

    /// Import batches, newest first.
    pub fn list_batches(&self) -> Vec<ImportBatch> {
        self.batches.iter().rev().cloned().collect()
    }

    pub fn get_batch(&self, batch_id: &Uuid) -> Result<&ImportBatch, AppError> {
        self.batches
            .iter()
            .find(|b| b.batch_id == *batch_id)
            .ok_or_else(|| not_found("Import batch", batch_id))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{date, dec, january, plot};
    use super::*;
    use crate::services::statement::parse_statement;
    use proptest::prelude::*;

    const STATEMENT: &str = "date;amount;purpose;reference\n\
        2025-01-15;400,00;Членский взнос ул. Лесная уч. 12;row-1\n";

    fn ledger_with_accrual() -> (Ledger, Uuid, Uuid) {
        let mut ledger = Ledger::default();
        let plot_id = plot(&mut ledger, "Лесная", "12");
        let period_id = january(&mut ledger);
        ledger
            .set_accrual(period_id, plot_id, "membership", dec("1000"), "test")
            .unwrap();
        (ledger, plot_id, period_id)
    }

    fn import(ledger: &mut Ledger, text: &str) -> ImportReport {
        let statement = parse_statement(text, 1000).unwrap();
        ledger.apply_import(&statement, &ImportOptions::default(), "test")
    }

    #[test]
    fn test_reimport_is_idempotent() {
        let (mut ledger, plot_id, period_id) = ledger_with_accrual();

        let first = import(&mut ledger, STATEMENT);
        assert_eq!(first.batch.as_ref().unwrap().created, 1);
        let second = import(&mut ledger, STATEMENT);
        let batch = second.batch.unwrap();
        assert_eq!(batch.created, 0);
        assert_eq!(batch.duplicates, 1);
        assert!(matches!(
            second.rows[0].outcome,
            RowOutcome::Duplicate {
                existing_payment_id: Some(_),
                ..
            }
        ));

        let report = ledger.reconciliation(&period_id).unwrap();
        let row = report.rows.iter().find(|r| r.plot_id == plot_id).unwrap();
        assert_eq!(row.paid, dec("400"));
        assert_eq!(row.balance, dec("-600"));
    }

    #[test]
    fn test_duplicate_rows_within_one_statement() {
        let (mut ledger, _, _) = ledger_with_accrual();
        let text = "date;amount;purpose;label\n\
            15.01.2025;100;взнос;Лесная 12\n\
            15.01.2025;100;Взнос ;Лесная 12\n";
        let report = import(&mut ledger, text);
        let batch = report.batch.unwrap();
        assert_eq!(batch.created, 1);
        assert_eq!(batch.duplicates, 1);
        assert!(matches!(
            report.rows[1].outcome,
            RowOutcome::Duplicate {
                existing_payment_id: None,
                ..
            }
        ));
    }

    #[test]
    fn test_rollback_voids_and_is_idempotent() {
        let (mut ledger, _, period_id) = ledger_with_accrual();
        let batch_id = import(&mut ledger, STATEMENT).batch.unwrap().batch_id;

        let first = ledger.rollback_import(batch_id, "test").unwrap();
        assert_eq!(first.voided, 1);
        let second = ledger.rollback_import(batch_id, "test").unwrap();
        assert_eq!(second.voided, 0);

        let batch = ledger.get_batch(&batch_id).unwrap();
        assert_eq!(batch.status, ImportBatchStatus::RolledBack);
        let report = ledger.reconciliation(&period_id).unwrap();
        assert_eq!(report.total_paid, Decimal::ZERO);
        assert_eq!(ledger.list_accruals(&period_id).unwrap()[0].amount_paid, Decimal::ZERO);

        // The fingerprint is free again.
        let again = import(&mut ledger, STATEMENT);
        assert_eq!(again.batch.unwrap().created, 1);
    }

    #[test]
    fn test_rollback_touching_closed_period_fails() {
        let (mut ledger, _, period_id) = ledger_with_accrual();
        let batch_id = import(&mut ledger, STATEMENT).batch.unwrap().batch_id;
        ledger.close_period(period_id, "test").unwrap();

        assert!(matches!(
            ledger.rollback_import(batch_id, "test"),
            Err(AppError::PeriodClosed)
        ));
        assert_eq!(ledger.list_payments(&Default::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_rows_are_classified() {
        let (mut ledger, _, period_id) = ledger_with_accrual();
        let december = ledger
            .create_period("Декабрь 2024", date("2024-12-01"), date("2024-12-31"), "test")
            .unwrap();
        ledger.close_period(december.period_id, "test").unwrap();
        let text = "date;amount;purpose\n\
            2025-01-10;-5;Лесная 12\n\
            2025-01-11;100;без адреса\n\
            2024-12-20;100;Лесная 12\n\
            bad;100;Лесная 12\n\
            2025-01-12;100;Лесная 12\n";

        let statement = parse_statement(text, 100).unwrap();
        let preview = ledger.preview_import(&statement, &ImportOptions::default());
        let outcomes: Vec<&str> = preview
            .rows
            .iter()
            .map(|r| outcome_label(&r.outcome))
            .collect();
        assert_eq!(
            outcomes,
            vec!["invalid", "unmatched", "period_closed", "invalid", "created"]
        );
        assert!(ledger.list_payments(&Default::default()).unwrap().is_empty());

        let report = import(&mut ledger, text);
        let batch = report.batch.unwrap();
        assert_eq!(batch.total_rows, 5);
        assert_eq!(batch.created, 1);
        assert_eq!(batch.unmatched, 1);
        assert_eq!(batch.rejected, 3);
        assert_eq!(ledger.reconciliation(&period_id).unwrap().total_paid, dec("100"));
    }

    #[test]
    fn test_reimport_after_reassignment_is_still_a_duplicate() {
        let (mut ledger, _, _) = ledger_with_accrual();
        let sadovaya = plot(&mut ledger, "Садовая", "3");
        let text = "date;amount;label\n2025-01-15;400;Лесная 12\n";

        let first = import(&mut ledger, text);
        let payment_id = first.batch.unwrap().payment_ids[0];
        ledger
            .assign_payment_plot(payment_id, sadovaya, "accountant")
            .unwrap();

        let second = import(&mut ledger, text);
        let batch = second.batch.unwrap();
        assert_eq!(batch.created, 0);
        assert_eq!(batch.duplicates, 1);
        assert!(matches!(
            &second.rows[0].outcome,
            RowOutcome::Duplicate { existing_payment_id: Some(id), .. } if *id == payment_id
        ));
        assert_eq!(ledger.list_payments(&Default::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_oversized_amounts_are_rejected_rows() {
        let (mut ledger, _, period_id) = ledger_with_accrual();
        let text = "date;amount;label\n\
            2025-01-15;79228162514264337593543950335;Лесная 12\n\
            2025-01-16;79228162514264337593543950335;Лесная 12\n";

        let batch = import(&mut ledger, text).batch.unwrap();
        assert_eq!(batch.created, 0);
        assert_eq!(batch.rejected, 2);
        let report = ledger.reconciliation(&period_id).unwrap();
        assert_eq!(report.total_paid, Decimal::ZERO);
    }

    #[test]
    fn test_manual_plot_column_wins() {
        let (mut ledger, _, _) = ledger_with_accrual();
        let other = plot(&mut ledger, "Садовая", "3");
        let text = format!("date;amount;purpose;plot_id\n2025-01-12;100;Лесная 12;{}\n", other);
        let report = import(&mut ledger, &text);
        match &report.rows[0].outcome {
            RowOutcome::Created { plot_id, .. } => assert_eq!(*plot_id, other),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn reconciliation_is_order_independent(
            amounts in proptest::collection::vec(1u32..5000, 1..12),
            seed in any::<u64>(),
        ) {
            let lines: Vec<String> = amounts
                .iter()
                .enumerate()
                .map(|(i, a)| format!("2025-01-{:02};{};Лесная 12;ref-{}", (i % 28) + 1, a, i))
                .collect();
            let mut shuffled = lines.clone();
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            shuffled.reverse();

            let totals: Vec<_> = [lines, shuffled]
                .into_iter()
                .map(|rows| {
                    let (mut ledger, _, period_id) = ledger_with_accrual();
                    let text = format!("date;amount;purpose;reference\n{}\n", rows.join("\n"));
                    import(&mut ledger, &text);
                    let report = ledger.reconciliation(&period_id).unwrap();
                    (report.total_accrued, report.total_paid, report.total_balance)
                })
                .collect();

            let expected: u32 = amounts.iter().sum();
            prop_assert_eq!(totals[0], totals[1]);
            prop_assert_eq!(totals[0].1, Decimal::from(expected));
        }
    }
}
