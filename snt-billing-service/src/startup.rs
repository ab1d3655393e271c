//! Application startup and lifecycle management.

use crate::config::BillingConfig;
use crate::handlers::{health, imports, payments, periods, plots, reports};
use crate::middleware::http_metrics_middleware;
use crate::services::{init_metrics, Ledger};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::request_id_middleware;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: BillingConfig,
    pub ledger: Arc<RwLock<Ledger>>,
}

fn api_router() -> Router<AppState> {
    Router::new()
        .route("/plots", post(plots::register_plot).get(plots::list_plots))
        .route(
            "/periods",
            post(periods::create_period).get(periods::list_periods),
        )
        .route("/periods/:id/approve", post(periods::approve_period))
        .route("/periods/:id/close", post(periods::close_period))
        .route(
            "/periods/:id/accruals",
            get(periods::list_accruals).put(periods::set_accrual),
        )
        .route(
            "/periods/:id/accruals/generate",
            post(periods::generate_accruals),
        )
        .route("/periods/:id/reconciliation", get(periods::reconciliation))
        .route(
            "/payments",
            post(payments::record_payment).get(payments::list_payments),
        )
        .route("/payments/export", get(payments::export_payments))
        .route("/payments/:id", get(payments::get_payment))
        .route("/payments/:id/assign", post(payments::assign_plot))
        .route("/payments/:id/void", post(payments::void_payment))
        .route("/payments/:id/allocate", post(payments::allocate))
        .route(
            "/payments/:id/auto-allocate",
            post(payments::set_auto_allocate),
        )
        .route("/imports/preview", post(imports::preview_import))
        .route(
            "/imports",
            post(imports::apply_import).get(imports::list_batches),
        )
        .route("/imports/:id/rollback", post(imports::rollback_import))
        .route("/debtors", get(reports::debtors))
        .route("/debtors/export", get(reports::export_debtors))
        .route("/audit", get(reports::audit_log))
}

/// Full HTTP router with probes, metrics and the `/api/v1` API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics_handler))
        .nest("/api/v1", api_router())
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(http_metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        init_metrics();

        let ledger = Ledger::new(config.matching.clone());
        let state = AppState {
            config: config.clone(),
            ledger: Arc::new(RwLock::new(ledger)),
        };

        let addr = config.common.bind_address();
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "SNT billing service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Shared ledger handle, for seeding data in tests.
    pub fn ledger(&self) -> Arc<RwLock<Ledger>> {
        self.state.ledger.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let app = router(self.state.clone());

        tracing::info!(
            service = %self.state.config.service_name,
            version = %self.state.config.service_version,
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, app).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
