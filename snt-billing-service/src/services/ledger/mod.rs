//! In-memory billing ledger: plots, periods, accruals, payments, import
//! batches, allocations and the audit trail.
//!
//! The ledger is a plain struct; the HTTP layer shares it behind a single
//! `RwLock`, so every method runs atomically with respect to the others.
//! Payments are append-only: voiding flips a flag and reverses allocations.

mod allocation;
mod import;

pub use import::ImportOptions;

use crate::models::{
    normalize_category, Accrual, Allocation, AuditEntry, DebtorRow, ImportBatch, MatchReason,
    MatchStatus, Payment, Period, PeriodStatus, Plot, ReconciliationReport, Tariff, MAX_AMOUNT,
};
use crate::services::directory::PlotDirectory;
use crate::services::fingerprint::{payment_fingerprint, FingerprintInput};
use crate::services::matcher::MatcherConfig;
use crate::services::metrics::LEDGER_OPERATION_DURATION;
use crate::services::reconciliation::{build_debtors, build_reconciliation};
use chrono::{NaiveDate, Utc};
use prometheus::HistogramTimer;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub(crate) const DUPLICATE_PAYMENT: &str = "duplicate_payment";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPlot {
    pub street: String,
    pub number: String,
    pub owner_name: Option<String>,
    pub area: Option<Decimal>,
    pub account_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPayment {
    pub plot_id: Uuid,
    pub category: String,
    pub amount: Decimal,
    pub paid_at: NaiveDate,
    #[serde(default)]
    pub purpose: String,
    pub payer: Option<String>,
    pub reference: Option<String>,
    #[serde(default)]
    pub auto_allocate_disabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentFilter {
    pub plot_id: Option<Uuid>,
    pub period_id: Option<Uuid>,
    pub batch_id: Option<Uuid>,
    #[serde(default)]
    pub include_voided: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccrualSummary {
    pub created: usize,
    pub updated: usize,
    /// Plots a per-area tariff could not price.
    pub skipped: usize,
}

/// Closed periods accept no accrual or payment mutation.
pub fn assert_period_editable(period: &Period) -> Result<(), AppError> {
    if period.is_closed() {
        return Err(AppError::PeriodClosed);
    }
    Ok(())
}

fn timer(operation: &str) -> HistogramTimer {
    LEDGER_OPERATION_DURATION
        .with_label_values(&[operation])
        .start_timer()
}

fn not_found(what: &str, id: &Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("{} {} not found", what, id))
}

fn ensure_within_limit(value: Decimal, what: &str) -> Result<(), AppError> {
    if value > MAX_AMOUNT {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "{} exceeds {}",
            what,
            MAX_AMOUNT
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct Ledger {
    matcher: MatcherConfig,
    directory: PlotDirectory,
    periods: BTreeMap<Uuid, Period>,
    accruals: Vec<Accrual>,
    accrual_index: HashMap<Uuid, usize>,
    payments: Vec<Payment>,
    payment_index: HashMap<Uuid, usize>,
    /// Fingerprint of every live payment.
    fingerprints: HashMap<String, Uuid>,
    batches: Vec<ImportBatch>,
    allocations: Vec<Allocation>,
    audit: Vec<AuditEntry>,
}

impl Ledger {
    pub fn new(matcher: MatcherConfig) -> Self {
        Self {
            matcher,
            ..Self::default()
        }
    }

    pub fn directory(&self) -> &PlotDirectory {
        &self.directory
    }

    // =========================================================================
    // Plot Operations
    // =========================================================================

    #[instrument(skip(self, input), fields(street = %input.street, number = %input.number))]
    pub fn register_plot(&mut self, input: NewPlot, actor: &str) -> Result<Plot, AppError> {
        let _timer = timer("register_plot");

        if let Some(area) = input.area {
            if area < Decimal::ZERO {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Plot area cannot be negative"
                )));
            }
            ensure_within_limit(area, "Plot area")?;
        }

        let plot = Plot {
            plot_id: Uuid::new_v4(),
            street: input.street.trim().to_string(),
            number: input.number.trim().to_string(),
            owner_name: input.owner_name.filter(|o| !o.trim().is_empty()),
            area: input.area,
            account_number: input.account_number.filter(|a| !a.trim().is_empty()),
            created_utc: Utc::now(),
        };
        self.directory.insert(plot.clone())?;
        self.record_audit(
            actor,
            "plot.registered",
            plot.plot_id,
            serde_json::json!({ "label": plot.label() }),
        );
        info!(plot_id = %plot.plot_id, label = %plot.label(), "Plot registered");

        Ok(plot)
    }

    pub fn list_plots(&self) -> Vec<Plot> {
        let mut plots: Vec<Plot> = self.directory.plots().cloned().collect();
        plots.sort_by(|a, b| a.label().cmp(&b.label()));
        plots
    }

    fn require_plot(&self, plot_id: &Uuid) -> Result<&Plot, AppError> {
        self.directory
            .get(plot_id)
            .ok_or_else(|| not_found("Plot", plot_id))
    }

    // =========================================================================
    // Period Operations
    // =========================================================================

    #[instrument(skip(self))]
    pub fn create_period(
        &mut self,
        title: &str,
        from: NaiveDate,
        to: NaiveDate,
        actor: &str,
    ) -> Result<Period, AppError> {
        let _timer = timer("create_period");

        if title.trim().is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Period title is required"
            )));
        }
        if from > to {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Period start {} is after its end {}",
                from,
                to
            )));
        }
        if let Some(existing) = self.periods.values().find(|p| p.overlaps(from, to)) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Period overlaps '{}' ({} - {})",
                existing.title,
                existing.from,
                existing.to
            )));
        }

        let period = Period {
            period_id: Uuid::new_v4(),
            title: title.trim().to_string(),
            from,
            to,
            status: PeriodStatus::Draft,
            created_utc: Utc::now(),
            closed_utc: None,
        };
        self.periods.insert(period.period_id, period.clone());
        self.record_audit(
            actor,
            "period.created",
            period.period_id,
            serde_json::json!({ "from": from, "to": to }),
        );
        info!(period_id = %period.period_id, "Period created");

        Ok(period)
    }

    /// Periods ordered by start date.
    pub fn list_periods(&self) -> Vec<Period> {
        let mut periods: Vec<Period> = self.periods.values().cloned().collect();
        periods.sort_by_key(|p| p.from);
        periods
    }

    pub fn get_period(&self, period_id: &Uuid) -> Result<&Period, AppError> {
        self.periods
            .get(period_id)
            .ok_or_else(|| not_found("Period", period_id))
    }

    #[instrument(skip(self))]
    pub fn approve_period(&mut self, period_id: Uuid, actor: &str) -> Result<Period, AppError> {
        let period = self
            .periods
            .get_mut(&period_id)
            .ok_or_else(|| not_found("Period", &period_id))?;
        match period.status {
            PeriodStatus::Closed => return Err(AppError::PeriodClosed),
            PeriodStatus::Approved => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Period is already approved"
                )))
            }
            PeriodStatus::Draft => period.status = PeriodStatus::Approved,
        }
        let period = period.clone();
        self.record_audit(actor, "period.approved", period_id, serde_json::Value::Null);
        info!(period_id = %period_id, "Period approved");
        Ok(period)
    }

    #[instrument(skip(self))]
    pub fn close_period(&mut self, period_id: Uuid, actor: &str) -> Result<Period, AppError> {
        let period = self
            .periods
            .get_mut(&period_id)
            .ok_or_else(|| not_found("Period", &period_id))?;
        assert_period_editable(period)?;
        period.status = PeriodStatus::Closed;
        period.closed_utc = Some(Utc::now());
        let period = period.clone();
        self.record_audit(actor, "period.closed", period_id, serde_json::Value::Null);
        info!(period_id = %period_id, "Period closed");
        Ok(period)
    }

    /// Period whose window contains `date`, if any.
    pub fn period_for_date(&self, date: NaiveDate) -> Option<&Period> {
        self.periods.values().find(|p| p.contains(date))
    }

    /// Payments dated outside every period are unrestricted.
    fn ensure_date_editable(&self, date: NaiveDate) -> Result<(), AppError> {
        match self.period_for_date(date) {
            Some(period) => assert_period_editable(period),
            None => Ok(()),
        }
    }

    fn editable_period(&self, period_id: &Uuid) -> Result<&Period, AppError> {
        let period = self.get_period(period_id)?;
        assert_period_editable(period)?;
        Ok(period)
    }

    // =========================================================================
    // Accrual Operations
    // =========================================================================

    /// Set the accrued amount for (period, plot, category), creating the row
    /// on first use.
    #[instrument(skip(self))]
    pub fn set_accrual(
        &mut self,
        period_id: Uuid,
        plot_id: Uuid,
        category: &str,
        amount: Decimal,
        actor: &str,
    ) -> Result<Accrual, AppError> {
        let _timer = timer("set_accrual");

        self.editable_period(&period_id)?;
        self.require_plot(&plot_id)?;
        let category = normalize_category(category);
        if category.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Accrual category is required"
            )));
        }
        if amount < Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Accrued amount cannot be negative"
            )));
        }
        ensure_within_limit(amount, "Accrued amount")?;

        let (accrual, _) = self.upsert_accrual(period_id, plot_id, &category, amount);
        self.record_audit(
            actor,
            "accrual.set",
            accrual.accrual_id,
            serde_json::json!({ "amount": amount, "category": category }),
        );
        Ok(accrual)
    }

    /// Returns the accrual and whether it was created.
    fn upsert_accrual(
        &mut self,
        period_id: Uuid,
        plot_id: Uuid,
        category: &str,
        amount: Decimal,
    ) -> (Accrual, bool) {
        let now = Utc::now();
        if let Some(existing) = self.accruals.iter_mut().find(|a| {
            a.period_id == period_id && a.plot_id == plot_id && a.category == category
        }) {
            existing.amount_accrued = amount;
            existing.updated_utc = now;
            return (existing.clone(), false);
        }

        let accrual = Accrual {
            accrual_id: Uuid::new_v4(),
            period_id,
            plot_id,
            category: category.to_string(),
            amount_accrued: amount,
            amount_paid: Decimal::ZERO,
            created_utc: now,
            updated_utc: now,
        };
        self.accrual_index
            .insert(accrual.accrual_id, self.accruals.len());
        self.accruals.push(accrual.clone());
        (accrual, true)
    }

    /// Accrue `category` for every registered plot according to `tariff`.
    #[instrument(skip(self))]
    pub fn accrue_period(
        &mut self,
        period_id: Uuid,
        category: &str,
        tariff: Tariff,
        actor: &str,
    ) -> Result<AccrualSummary, AppError> {
        let _timer = timer("accrue_period");

        self.editable_period(&period_id)?;
        let category = normalize_category(category);
        if category.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Accrual category is required"
            )));
        }
        let rate = match tariff {
            Tariff::Fixed(amount) | Tariff::PerArea(amount) => amount,
        };
        if rate < Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Tariff cannot be negative"
            )));
        }
        ensure_within_limit(rate, "Tariff")?;

        let priced = self
            .directory
            .plots()
            .map(|plot| {
                let amount = match (tariff, plot.area) {
                    (Tariff::Fixed(amount), _) => Some(amount),
                    (Tariff::PerArea(rate), Some(area)) => {
                        let amount = rate
                            .checked_mul(area)
                            .ok_or_else(|| {
                                AppError::BadRequest(anyhow::anyhow!(
                                    "Accrual for plot {} overflows",
                                    plot.label()
                                ))
                            })?
                            .round_dp(2);
                        ensure_within_limit(amount, "Accrued amount")?;
                        Some(amount)
                    }
                    (Tariff::PerArea(_), None) => None,
                };
                Ok((plot.plot_id, amount))
            })
            .collect::<Result<Vec<(Uuid, Option<Decimal>)>, AppError>>()?;

        let mut summary = AccrualSummary::default();
        for (plot_id, amount) in priced {
            match amount {
                Some(amount) => {
                    let (_, created) = self.upsert_accrual(period_id, plot_id, &category, amount);
                    if created {
                        summary.created += 1;
                    } else {
                        summary.updated += 1;
                    }
                }
                None => summary.skipped += 1,
            }
        }

        self.record_audit(
            actor,
            "accrual.generated",
            period_id,
            serde_json::json!({
                "category": category,
                "tariff": tariff,
                "created": summary.created,
                "updated": summary.updated,
                "skipped": summary.skipped,
            }),
        );
        info!(
            period_id = %period_id,
            created = summary.created,
            updated = summary.updated,
            skipped = summary.skipped,
            "Accruals generated"
        );

        Ok(summary)
    }

    pub fn list_accruals(&self, period_id: &Uuid) -> Result<Vec<Accrual>, AppError> {
        self.get_period(period_id)?;
        let mut accruals: Vec<Accrual> = self
            .accruals
            .iter()
            .filter(|a| a.period_id == *period_id)
            .cloned()
            .collect();
        accruals.sort_by(|a, b| {
            self.directory
                .label_of(&a.plot_id)
                .cmp(&self.directory.label_of(&b.plot_id))
                .then_with(|| a.category.cmp(&b.category))
        });
        Ok(accruals)
    }

    // =========================================================================
    // Payment Operations
    // =========================================================================

    /// Manually entered payment (cash desk, corrections).
    #[instrument(skip(self, input), fields(plot_id = %input.plot_id, amount = %input.amount))]
    pub fn record_payment(&mut self, input: NewPayment, actor: &str) -> Result<Payment, AppError> {
        let _timer = timer("record_payment");

        self.require_plot(&input.plot_id)?;
        let category = normalize_category(&input.category);
        if category.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Payment category is required"
            )));
        }
        if input.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Payment amount must be positive"
            )));
        }
        ensure_within_limit(input.amount, "Payment amount")?;
        self.ensure_date_editable(input.paid_at)?;

        let reference = input.reference.filter(|r| !r.trim().is_empty());
        let fingerprint = payment_fingerprint(&FingerprintInput {
            plot_id: Some(input.plot_id),
            category: &category,
            paid_at: Some(input.paid_at),
            amount: Some(input.amount),
            purpose: &input.purpose,
            reference: reference.as_deref(),
        });
        if let Some(ref fp) = fingerprint {
            if let Some(existing) = self.fingerprints.get(fp) {
                warn!(existing_payment_id = %existing, "Duplicate payment rejected");
                return Err(AppError::Conflict(anyhow::anyhow!(DUPLICATE_PAYMENT)));
            }
        }

        let payment = Payment {
            payment_id: Uuid::new_v4(),
            plot_id: input.plot_id,
            category,
            amount: input.amount,
            paid_at: input.paid_at,
            purpose: input.purpose,
            payer: input.payer,
            reference,
            fingerprint,
            matched_plot_id: Some(input.plot_id),
            match_status: MatchStatus::Matched,
            match_confidence: 1.0,
            match_reason: Some(MatchReason::Manual),
            auto_allocate_disabled: input.auto_allocate_disabled,
            is_voided: false,
            voided_utc: None,
            import_batch_id: None,
            created_by: actor.to_string(),
            created_utc: Utc::now(),
        };
        let payment_id = self.insert_payment(payment);
        self.record_audit(
            actor,
            "payment.recorded",
            payment_id,
            serde_json::json!({ "source": "manual" }),
        );
        self.auto_allocate(payment_id, actor);
        info!(payment_id = %payment_id, "Payment recorded");

        self.get_payment(&payment_id).cloned()
    }

    fn insert_payment(&mut self, payment: Payment) -> Uuid {
        let payment_id = payment.payment_id;
        if let Some(ref fp) = payment.fingerprint {
            self.fingerprints.insert(fp.clone(), payment_id);
        }
        self.payment_index.insert(payment_id, self.payments.len());
        self.payments.push(payment);
        payment_id
    }

    pub fn get_payment(&self, payment_id: &Uuid) -> Result<&Payment, AppError> {
        self.payment_index
            .get(payment_id)
            .map(|&i| &self.payments[i])
            .ok_or_else(|| not_found("Payment", payment_id))
    }

    fn payment_mut(&mut self, payment_id: &Uuid) -> Result<&mut Payment, AppError> {
        match self.payment_index.get(payment_id) {
            Some(&i) => Ok(&mut self.payments[i]),
            None => Err(not_found("Payment", payment_id)),
        }
    }

    /// Payments ordered by date, then entry time.
    pub fn list_payments(&self, filter: &PaymentFilter) -> Result<Vec<Payment>, AppError> {
        let window = match filter.period_id {
            Some(ref id) => Some(self.get_period(id)?),
            None => None,
        };

        let mut payments: Vec<Payment> = self
            .payments
            .iter()
            .filter(|p| filter.include_voided || !p.is_voided)
            .filter(|p| filter.plot_id.map_or(true, |id| p.plot_id == id))
            .filter(|p| filter.batch_id.map_or(true, |id| p.import_batch_id == Some(id)))
            .filter(|p| window.map_or(true, |w| w.contains(p.paid_at)))
            .cloned()
            .collect();
        payments.sort_by(|a, b| {
            a.paid_at
                .cmp(&b.paid_at)
                .then_with(|| a.created_utc.cmp(&b.created_utc))
        });
        Ok(payments)
    }

    /// Manual override: move a payment to another plot.
    #[instrument(skip(self))]
    pub fn assign_payment_plot(
        &mut self,
        payment_id: Uuid,
        plot_id: Uuid,
        actor: &str,
    ) -> Result<Payment, AppError> {
        let _timer = timer("assign_payment_plot");

        self.require_plot(&plot_id)?;
        let payment = self.get_payment(&payment_id)?.clone();
        if payment.is_voided {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Payment {} is voided",
                payment_id
            )));
        }
        self.ensure_date_editable(payment.paid_at)?;
        self.ensure_allocations_editable(&payment_id)?;

        // The fingerprint names the source row, not the plot, so it stays
        // as recorded and a re-import of the same row is still a duplicate.
        self.reverse_allocations(&payment_id);
        {
            let p = self.payment_mut(&payment_id)?;
            p.plot_id = plot_id;
            p.matched_plot_id = Some(plot_id);
            p.match_status = MatchStatus::Matched;
            p.match_confidence = 1.0;
            p.match_reason = Some(MatchReason::Manual);
        }
        self.record_audit(
            actor,
            "payment.assigned",
            payment_id,
            serde_json::json!({ "from_plot_id": payment.plot_id, "to_plot_id": plot_id }),
        );
        self.auto_allocate(payment_id, actor);
        info!(payment_id = %payment_id, plot_id = %plot_id, "Payment assigned manually");

        self.get_payment(&payment_id).cloned()
    }

    #[instrument(skip(self))]
    pub fn set_auto_allocate(
        &mut self,
        payment_id: Uuid,
        disabled: bool,
        actor: &str,
    ) -> Result<Payment, AppError> {
        let payment = self.get_payment(&payment_id)?;
        if payment.is_voided {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Payment {} is voided",
                payment_id
            )));
        }
        self.ensure_date_editable(payment.paid_at)?;

        self.payment_mut(&payment_id)?.auto_allocate_disabled = disabled;
        self.record_audit(
            actor,
            "payment.auto_allocate",
            payment_id,
            serde_json::json!({ "disabled": disabled }),
        );
        if !disabled {
            self.auto_allocate(payment_id, actor);
        }
        self.get_payment(&payment_id).cloned()
    }

    /// Soft-delete a payment. Voiding an already voided payment is a no-op.
    #[instrument(skip(self))]
    pub fn void_payment(&mut self, payment_id: Uuid, actor: &str) -> Result<Payment, AppError> {
        let payment = self.get_payment(&payment_id)?;
        if payment.is_voided {
            return Ok(payment.clone());
        }
        self.ensure_date_editable(payment.paid_at)?;
        self.ensure_allocations_editable(&payment_id)?;

        self.void_unchecked(&payment_id)?;
        self.record_audit(actor, "payment.voided", payment_id, serde_json::Value::Null);
        info!(payment_id = %payment_id, "Payment voided");
        self.get_payment(&payment_id).cloned()
    }

    /// Void without editability checks; callers check first.
    fn void_unchecked(&mut self, payment_id: &Uuid) -> Result<(), AppError> {
        self.reverse_allocations(payment_id);
        let payment = self.payment_mut(payment_id)?;
        payment.is_voided = true;
        payment.voided_utc = Some(Utc::now());
        let fingerprint = payment.fingerprint.clone();
        if let Some(fp) = fingerprint {
            if self.fingerprints.get(&fp) == Some(payment_id) {
                self.fingerprints.remove(&fp);
            }
        }
        Ok(())
    }

    // =========================================================================
    // Reports
    // =========================================================================

    #[instrument(skip(self))]
    pub fn reconciliation(&self, period_id: &Uuid) -> Result<ReconciliationReport, AppError> {
        let _timer = timer("reconciliation");
        let period = self.get_period(period_id)?;
        build_reconciliation(period, &self.accruals, &self.payments, &self.directory)
    }

    pub fn debtors(&self, min_debt: Decimal) -> Result<Vec<DebtorRow>, AppError> {
        let _timer = timer("debtors");
        build_debtors(&self.accruals, &self.payments, &self.directory, min_debt)
    }

    // =========================================================================
    // Audit Trail
    // =========================================================================

    fn record_audit(
        &mut self,
        actor: &str,
        action: &str,
        entity_id: Uuid,
        details: serde_json::Value,
    ) {
        self.audit.push(AuditEntry {
            audit_id: Uuid::new_v4(),
            at: Utc::now(),
            actor: actor.to_string(),
            action: action.to_string(),
            entity_id,
            details,
        });
    }

    /// Audit entries, oldest first, optionally for a single entity.
    pub fn audit_log(&self, entity_id: Option<Uuid>) -> Vec<AuditEntry> {
        self.audit
            .iter()
            .filter(|e| entity_id.map_or(true, |id| e.entity_id == id))
            .cloned()
            .collect()
    }
}
