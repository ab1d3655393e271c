//! Request and response bodies for the HTTP API.

use crate::models::{Allocation, Payment, Tariff, MAX_AMOUNT};
use crate::services::{ImportOptions, NewPayment, NewPlot};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

fn within_limit(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount > MAX_AMOUNT {
        return Err(ValidationError::new("max_amount").with_message("is too large".into()));
    }
    Ok(())
}

fn positive(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount <= Decimal::ZERO {
        return Err(ValidationError::new("positive").with_message("must be positive".into()));
    }
    within_limit(amount)
}

fn non_negative(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount < Decimal::ZERO {
        return Err(ValidationError::new("non_negative").with_message("cannot be negative".into()));
    }
    within_limit(amount)
}

fn tariff_rate(tariff: &Tariff) -> Result<(), ValidationError> {
    match tariff {
        Tariff::Fixed(amount) | Tariff::PerArea(amount) => non_negative(amount),
    }
}

// ============================================================================
// Plots
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePlotRequest {
    #[validate(length(max = 200, message = "Street is too long"))]
    #[serde(default)]
    pub street: String,
    #[validate(length(min = 1, max = 20, message = "Plot number is required"))]
    pub number: String,
    pub owner_name: Option<String>,
    #[validate(custom(function = "non_negative"))]
    pub area: Option<Decimal>,
    pub account_number: Option<String>,
}

impl From<CreatePlotRequest> for NewPlot {
    fn from(req: CreatePlotRequest) -> Self {
        Self {
            street: req.street,
            number: req.number,
            owner_name: req.owner_name,
            area: req.area,
            account_number: req.account_number,
        }
    }
}

// ============================================================================
// Periods & Accruals
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePeriodRequest {
    #[validate(length(min = 1, max = 100, message = "Title must be 1-100 characters"))]
    pub title: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetAccrualRequest {
    pub plot_id: Uuid,
    #[validate(length(min = 1, message = "Category cannot be empty"))]
    pub category: String,
    #[validate(custom(function = "non_negative"))]
    pub amount: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateAccrualsRequest {
    #[validate(length(min = 1, message = "Category cannot be empty"))]
    pub category: String,
    #[validate(custom(function = "tariff_rate"))]
    pub tariff: Tariff,
}

// ============================================================================
// Payments
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct RecordPaymentRequest {
    pub plot_id: Uuid,
    #[validate(length(min = 1, message = "Category cannot be empty"))]
    pub category: String,
    #[validate(custom(function = "positive"))]
    pub amount: Decimal,
    pub paid_at: NaiveDate,
    #[serde(default)]
    pub purpose: String,
    pub payer: Option<String>,
    pub reference: Option<String>,
    #[serde(default)]
    pub auto_allocate_disabled: bool,
}

impl From<RecordPaymentRequest> for NewPayment {
    fn from(req: RecordPaymentRequest) -> Self {
        Self {
            plot_id: req.plot_id,
            category: req.category,
            amount: req.amount,
            paid_at: req.paid_at,
            purpose: req.purpose,
            payer: req.payer,
            reference: req.reference,
            auto_allocate_disabled: req.auto_allocate_disabled,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AssignPlotRequest {
    pub plot_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AllocateRequest {
    pub accrual_id: Uuid,
    #[validate(custom(function = "positive"))]
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct AutoAllocateRequest {
    pub disabled: bool,
}

#[derive(Debug, Serialize)]
pub struct PaymentDetails {
    #[serde(flatten)]
    pub payment: Payment,
    pub allocations: Vec<Allocation>,
    pub unallocated: Decimal,
}

// ============================================================================
// Imports
// ============================================================================

/// Statement upload: CSV text plus batch options.
#[derive(Debug, Deserialize, Validate)]
pub struct ImportRequest {
    #[validate(length(min = 1, message = "Statement content cannot be empty"))]
    pub content: String,
    pub source_name: Option<String>,
    pub default_category: Option<String>,
}

impl ImportRequest {
    pub fn options(&self) -> ImportOptions {
        let defaults = ImportOptions::default();
        ImportOptions {
            source_name: self
                .source_name
                .clone()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.source_name),
            default_category: self
                .default_category
                .clone()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or(defaults.default_category),
        }
    }
}

// ============================================================================
// Queries
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct DebtorsQuery {
    pub min_debt: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub entity_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_payment_amount_must_be_positive() {
        let request: RecordPaymentRequest = serde_json::from_value(serde_json::json!({
            "plot_id": Uuid::new_v4(),
            "category": "membership",
            "amount": "0",
            "paid_at": "2025-01-15",
        }))
        .unwrap();
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("amount"));
    }

    #[test]
    fn test_amounts_above_limit_rejected() {
        let request: RecordPaymentRequest = serde_json::from_value(serde_json::json!({
            "plot_id": Uuid::new_v4(),
            "category": "membership",
            "amount": "79228162514264337593543950335",
            "paid_at": "2025-01-15",
        }))
        .unwrap();
        assert!(request.validate().unwrap_err().field_errors().contains_key("amount"));

        let request: GenerateAccrualsRequest = serde_json::from_value(serde_json::json!({
            "category": "membership",
            "tariff": { "kind": "per_area", "amount": "1000000000.01" },
        }))
        .unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_tariff_body_shape() {
        let request: GenerateAccrualsRequest = serde_json::from_value(serde_json::json!({
            "category": "membership",
            "tariff": { "kind": "per_area", "amount": "150.50" },
        }))
        .unwrap();
        assert!(request.validate().is_ok());
        assert_eq!(
            request.tariff,
            Tariff::PerArea(Decimal::from_str("150.50").unwrap())
        );
    }

    #[test]
    fn test_import_options_fall_back_to_defaults() {
        let request = ImportRequest {
            content: "date;amount".to_string(),
            source_name: Some("  ".to_string()),
            default_category: Some("target".to_string()),
        };
        let options = request.options();
        assert_eq!(options.source_name, "statement.csv");
        assert_eq!(options.default_category, "target");
    }
}
