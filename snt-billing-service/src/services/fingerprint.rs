//! Deduplication keys for payments.
//!
//! A bank reference identifies a payment on its own. Without one the key is
//! built from plot, category, day, amount and purpose text, so the same
//! statement row always produces the same key.

use crate::models::{money, normalize_category};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Attributes a fingerprint is derived from.
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintInput<'a> {
    pub plot_id: Option<Uuid>,
    pub category: &'a str,
    pub paid_at: Option<NaiveDate>,
    pub amount: Option<Decimal>,
    pub purpose: &'a str,
    pub reference: Option<&'a str>,
}

/// Derive the dedup key, or `None` when there is not enough data to build
/// one. Callers must treat `None` as "cannot dedup".
pub fn payment_fingerprint(input: &FingerprintInput<'_>) -> Option<String> {
    if let Some(reference) = input.reference.map(normalize_text) {
        if !reference.is_empty() {
            return Some(format!("ref:{}", reference));
        }
    }

    let plot_id = input.plot_id?;
    let paid_at = input.paid_at?;
    let amount = input.amount.filter(|a| *a > Decimal::ZERO)?;

    Some(format!(
        "{}|{}|{}|{}|{}",
        plot_id,
        normalize_category(input.category),
        paid_at.format("%Y-%m-%d"),
        money(amount),
        normalize_text(input.purpose)
    ))
}

/// Lowercase and collapse runs of whitespace into single spaces.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
