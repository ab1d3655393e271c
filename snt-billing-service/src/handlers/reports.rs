use super::csv_attachment;
use crate::dtos::{AuditQuery, DebtorsQuery};
use crate::middleware::ApiQuery;
use crate::models::{AuditEntry, DebtorRow};
use crate::services::export::debtors_csv;
use crate::startup::AppState;
use axum::{extract::State, response::Response};
use rust_decimal::Decimal;
use service_core::error::AppError;
use service_core::response::ApiResponse;

fn min_debt(state: &AppState, query: &DebtorsQuery) -> Decimal {
    query.min_debt.unwrap_or(state.config.debt_min_amount)
}

pub async fn debtors(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<DebtorsQuery>,
) -> Result<ApiResponse<Vec<DebtorRow>>, AppError> {
    let ledger = state.ledger.read().await;
    Ok(ApiResponse::ok(ledger.debtors(min_debt(&state, &query))?))
}

pub async fn export_debtors(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<DebtorsQuery>,
) -> Result<Response, AppError> {
    let ledger = state.ledger.read().await;
    let rows = ledger.debtors(min_debt(&state, &query))?;
    let body = debtors_csv(&rows)?;
    tracing::info!(rows = rows.len(), "Debtors exported");
    Ok(csv_attachment("debtors.csv", body))
}

pub async fn audit_log(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<AuditQuery>,
) -> ApiResponse<Vec<AuditEntry>> {
    let ledger = state.ledger.read().await;
    ApiResponse::ok(ledger.audit_log(query.entity_id))
}
