//! Domain models for snt-billing-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Plot Directory Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plot {
    pub plot_id: Uuid,
    pub street: String,
    pub number: String,
    pub owner_name: Option<String>,
    /// Area in sotka (100 m²), used by per-area tariffs.
    pub area: Option<Decimal>,
    /// Personal account number printed on payment slips.
    pub account_number: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl Plot {
    pub fn label(&self) -> String {
        if self.street.trim().is_empty() {
            self.number.clone()
        } else {
            format!("{}, {}", self.street.trim(), self.number.trim())
        }
    }
}

// ============================================================================
// Period Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodStatus {
    Draft,
    Approved,
    Closed,
}

impl PeriodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Approved => "approved",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Period {
    pub period_id: Uuid,
    pub title: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub status: PeriodStatus,
    pub created_utc: DateTime<Utc>,
    pub closed_utc: Option<DateTime<Utc>>,
}

impl Period {
    /// Inclusive on both ends.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }

    pub fn overlaps(&self, from: NaiveDate, to: NaiveDate) -> bool {
        self.from <= to && from <= self.to
    }

    pub fn is_closed(&self) -> bool {
        self.status == PeriodStatus::Closed
    }
}

// ============================================================================
// Accrual Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Accrual {
    pub accrual_id: Uuid,
    pub period_id: Uuid,
    pub plot_id: Uuid,
    pub category: String,
    pub amount_accrued: Decimal,
    pub amount_paid: Decimal,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Accrual {
    /// Amount still owed on this accrual, never negative.
    pub fn outstanding(&self) -> Decimal {
        (self.amount_accrued - self.amount_paid).max(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "amount", rename_all = "snake_case")]
pub enum Tariff {
    /// Same amount for every plot.
    Fixed(Decimal),
    /// Rate per sotka of plot area.
    PerArea(Decimal),
}

// ============================================================================
// Payment Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Matched,
    Unmatched,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::Unmatched => "unmatched",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    Manual,
    Auto,
}

impl MatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    pub plot_id: Uuid,
    pub category: String,
    pub amount: Decimal,
    pub paid_at: NaiveDate,
    pub purpose: String,
    pub payer: Option<String>,
    pub reference: Option<String>,
    pub fingerprint: Option<String>,
    pub matched_plot_id: Option<Uuid>,
    pub match_status: MatchStatus,
    pub match_confidence: f64,
    pub match_reason: Option<MatchReason>,
    pub auto_allocate_disabled: bool,
    pub is_voided: bool,
    pub voided_utc: Option<DateTime<Utc>>,
    pub import_batch_id: Option<Uuid>,
    pub created_by: String,
    pub created_utc: DateTime<Utc>,
}

// ============================================================================
// Allocation Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub allocation_id: Uuid,
    pub payment_id: Uuid,
    pub accrual_id: Uuid,
    pub amount: Decimal,
    pub mode: AllocationMode,
    /// Set when the payment is voided or re-assigned; the record stays.
    pub reversed: bool,
    pub created_by: String,
    pub created_utc: DateTime<Utc>,
}

// ============================================================================
// Import Batch Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportBatchStatus {
    Applied,
    RolledBack,
}

impl ImportBatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::RolledBack => "rolled_back",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportBatch {
    pub batch_id: Uuid,
    pub source_name: String,
    pub created_by: String,
    pub created_utc: DateTime<Utc>,
    pub status: ImportBatchStatus,
    pub total_rows: usize,
    pub created: usize,
    pub duplicates: usize,
    pub unmatched: usize,
    pub rejected: usize,
    pub payment_ids: Vec<Uuid>,
    pub rolled_back_utc: Option<DateTime<Utc>>,
}

/// One statement row handed to preview/apply, already parsed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportRow {
    /// Source line number, for reporting.
    pub line: usize,
    pub paid_at: Option<NaiveDate>,
    pub amount: Option<Decimal>,
    pub purpose: String,
    pub payer: Option<String>,
    /// Street/plot text; the purpose is matched when absent.
    pub label: Option<String>,
    pub reference: Option<String>,
    pub category: Option<String>,
    /// Operator-chosen plot; always wins over matching.
    pub plot_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub plot_id: Uuid,
    pub label: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RowOutcome {
    Created {
        plot_id: Uuid,
        payment_id: Option<Uuid>,
        fingerprint: Option<String>,
    },
    Duplicate {
        existing_payment_id: Option<Uuid>,
        fingerprint: String,
    },
    Unmatched {
        candidates: Vec<MatchCandidate>,
    },
    PeriodClosed {
        period_id: Uuid,
    },
    Invalid {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowReport {
    pub line: usize,
    #[serde(flatten)]
    pub outcome: RowOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    pub batch: Option<ImportBatch>,
    pub rows: Vec<RowReport>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RollbackResult {
    pub batch_id: Uuid,
    pub voided: usize,
}

// ============================================================================
// Balance Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceRow {
    pub plot_id: Uuid,
    pub label: String,
    pub accrued: Decimal,
    pub paid: Decimal,
    /// paid − accrued; negative means the plot owes.
    pub balance: Decimal,
    pub payment_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub period_id: Uuid,
    pub rows: Vec<BalanceRow>,
    pub total_accrued: Decimal,
    pub total_paid: Decimal,
    pub total_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebtorRow {
    pub plot_id: Uuid,
    pub label: String,
    pub owner_name: Option<String>,
    pub accrued: Decimal,
    pub paid: Decimal,
    pub debt: Decimal,
}

// ============================================================================
// Audit Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub audit_id: Uuid,
    pub at: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub entity_id: Uuid,
    pub details: serde_json::Value,
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Largest amount, plot area or tariff rate the ledger accepts. Sums of
/// values under this cap stay far inside the decimal range.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

/// Money as shown in reports: two decimal places.
pub fn money(amount: Decimal) -> Decimal {
    let mut value = amount.round_dp(2);
    value.rescale(2);
    value
}

/// Categories compare trimmed and lowercase.
pub fn normalize_category(category: &str) -> String {
    category.trim().to_lowercase()
}
