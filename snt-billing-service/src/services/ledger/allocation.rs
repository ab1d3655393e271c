use super::{not_found, timer, Ledger};
use crate::models::{Allocation, AllocationMode};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use tracing::{debug, info, instrument};
use uuid::Uuid;

impl Ledger {
    /// Apply part of a payment to a specific accrual.
    #[instrument(skip(self))]
    pub fn allocate_payment(
        &mut self,
        payment_id: Uuid,
        accrual_id: Uuid,
        amount: Decimal,
        actor: &str,
    ) -> Result<Allocation, AppError> {
        let _timer = timer("allocate_payment");

        if amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Allocation amount must be positive"
            )));
        }
        let payment = self.get_payment(&payment_id)?;
        if payment.is_voided {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Payment {} is voided",
                payment_id
            )));
        }
        let accrual = self
            .accrual_index
            .get(&accrual_id)
            .map(|&i| &self.accruals[i])
            .ok_or_else(|| not_found("Accrual", &accrual_id))?;
        if accrual.plot_id != payment.plot_id {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Accrual belongs to another plot"
            )));
        }
        self.editable_period(&accrual.period_id)?;

        let unallocated = self.unallocated(&payment_id)?;
        if amount > unallocated {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Amount {} exceeds unallocated remainder {}",
                amount,
                unallocated
            )));
        }
        let outstanding = accrual.outstanding();
        if amount > outstanding {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Amount {} exceeds outstanding {}",
                amount,
                outstanding
            )));
        }

        let allocation =
            self.apply_allocation(payment_id, accrual_id, amount, AllocationMode::Manual, actor);
        info!(allocation_id = %allocation.allocation_id, "Manual allocation recorded");
        Ok(allocation)
    }

    /// Allocations of a payment, including reversed ones.
    pub fn allocations_for(&self, payment_id: &Uuid) -> Vec<Allocation> {
        self.allocations
            .iter()
            .filter(|a| a.payment_id == *payment_id)
            .cloned()
            .collect()
    }

    /// Part of the payment not yet applied to any accrual.
    pub fn unallocated(&self, payment_id: &Uuid) -> Result<Decimal, AppError> {
        let payment = self.get_payment(payment_id)?;
        let allocated: Decimal = self
            .allocations
            .iter()
            .filter(|a| a.payment_id == *payment_id && !a.reversed)
            .map(|a| a.amount)
            .sum();
        Ok(payment.amount - allocated)
    }

    /// Spread the unallocated remainder over outstanding accruals of the
    /// same plot and category, oldest period first. Returns the amount
    /// allocated; whatever is left stays as credit.
    pub(super) fn auto_allocate(&mut self, payment_id: Uuid, actor: &str) -> Decimal {
        let Ok(payment) = self.get_payment(&payment_id) else {
            return Decimal::ZERO;
        };
        if payment.is_voided || payment.auto_allocate_disabled {
            return Decimal::ZERO;
        }

        let mut targets: Vec<(NaiveDate, Uuid, Decimal)> = self
            .accruals
            .iter()
            .filter(|a| a.plot_id == payment.plot_id && a.category == payment.category)
            .filter(|a| a.outstanding() > Decimal::ZERO)
            .filter_map(|a| {
                let period = self.periods.get(&a.period_id)?;
                (!period.is_closed()).then(|| (period.from, a.accrual_id, a.outstanding()))
            })
            .collect();
        targets.sort();

        let mut remaining = match self.unallocated(&payment_id) {
            Ok(remaining) => remaining,
            Err(_) => return Decimal::ZERO,
        };
        let mut total = Decimal::ZERO;
        for (_, accrual_id, outstanding) in targets {
            if remaining <= Decimal::ZERO {
                break;
            }
            let amount = remaining.min(outstanding);
            self.apply_allocation(payment_id, accrual_id, amount, AllocationMode::Auto, actor);
            remaining -= amount;
            total += amount;
        }

        if total > Decimal::ZERO {
            debug!(payment_id = %payment_id, allocated = %total, credit = %remaining, "Payment auto-allocated");
        }
        total
    }

    fn apply_allocation(
        &mut self,
        payment_id: Uuid,
        accrual_id: Uuid,
        amount: Decimal,
        mode: AllocationMode,
        actor: &str,
    ) -> Allocation {
        if let Some(&i) = self.accrual_index.get(&accrual_id) {
            let accrual = &mut self.accruals[i];
            accrual.amount_paid += amount;
            accrual.updated_utc = Utc::now();
        }

        let allocation = Allocation {
            allocation_id: Uuid::new_v4(),
            payment_id,
            accrual_id,
            amount,
            mode,
            reversed: false,
            created_by: actor.to_string(),
            created_utc: Utc::now(),
        };
        self.allocations.push(allocation.clone());
        self.record_audit(
            actor,
            "allocation.created",
            payment_id,
            serde_json::json!({
                "allocation_id": allocation.allocation_id,
                "accrual_id": accrual_id,
                "amount": amount,
                "mode": mode,
            }),
        );
        allocation
    }

    /// Every accrual touched by a live allocation must still be editable.
    pub(super) fn ensure_allocations_editable(&self, payment_id: &Uuid) -> Result<(), AppError> {
        for allocation in self
            .allocations
            .iter()
            .filter(|a| a.payment_id == *payment_id && !a.reversed)
        {
            if let Some(&i) = self.accrual_index.get(&allocation.accrual_id) {
                self.editable_period(&self.accruals[i].period_id)?;
            }
        }
        Ok(())
    }

    pub(super) fn reverse_allocations(&mut self, payment_id: &Uuid) {
        let now = Utc::now();
        for allocation in self
            .allocations
            .iter_mut()
            .filter(|a| a.payment_id == *payment_id && !a.reversed)
        {
            if let Some(&i) = self.accrual_index.get(&allocation.accrual_id) {
                let accrual = &mut self.accruals[i];
                accrual.amount_paid -= allocation.amount;
                accrual.updated_utc = now;
            }
            allocation.reversed = true;
        }
    }
}
