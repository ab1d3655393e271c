//! Services module for snt-billing-service.

pub mod directory;
pub mod export;
pub mod fingerprint;
pub mod ledger;
pub mod matcher;
pub mod metrics;
pub mod reconciliation;
pub mod statement;

pub use ledger::{ImportOptions, Ledger, NewPayment, NewPlot, PaymentFilter};
pub use matcher::MatcherConfig;
pub use metrics::{
    get_metrics, init_metrics, record_error, record_http_request, record_import_row,
    record_payment_match,
};
