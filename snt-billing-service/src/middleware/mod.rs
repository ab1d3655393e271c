pub mod actor;
pub mod extract;
pub mod metrics;

pub use actor::Actor;
pub use extract::{ApiJson, ApiPath, ApiQuery};
pub use metrics::http_metrics_middleware;
