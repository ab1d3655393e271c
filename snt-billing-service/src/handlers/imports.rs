//! Statement import: preview, apply, rollback.

use crate::dtos::ImportRequest;
use crate::middleware::{Actor, ApiJson, ApiPath};
use crate::models::{ImportBatch, ImportReport, RollbackResult};
use crate::services::statement::parse_statement;
use crate::startup::AppState;
use axum::extract::State;
use service_core::error::AppError;
use service_core::response::ApiResponse;
use uuid::Uuid;
use validator::Validate;

pub async fn preview_import(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ImportRequest>,
) -> Result<ApiResponse<ImportReport>, AppError> {
    request.validate()?;
    let statement = parse_statement(&request.content, state.config.import.max_rows)?;

    let ledger = state.ledger.read().await;
    Ok(ApiResponse::ok(
        ledger.preview_import(&statement, &request.options()),
    ))
}

pub async fn apply_import(
    State(state): State<AppState>,
    actor: Actor,
    ApiJson(request): ApiJson<ImportRequest>,
) -> Result<ApiResponse<ImportReport>, AppError> {
    request.validate()?;
    let statement = parse_statement(&request.content, state.config.import.max_rows)?;
    tracing::info!(
        rows = statement.rows.len(),
        parse_errors = statement.errors.len(),
        delimiter = %statement.delimiter,
        "Statement parsed"
    );

    let mut ledger = state.ledger.write().await;
    let report = ledger.apply_import(&statement, &request.options(), actor.as_str());
    Ok(ApiResponse::created(report))
}

pub async fn list_batches(State(state): State<AppState>) -> ApiResponse<Vec<ImportBatch>> {
    let ledger = state.ledger.read().await;
    ApiResponse::ok(ledger.list_batches())
}

pub async fn rollback_import(
    State(state): State<AppState>,
    actor: Actor,
    ApiPath(batch_id): ApiPath<Uuid>,
) -> Result<ApiResponse<RollbackResult>, AppError> {
    let mut ledger = state.ledger.write().await;
    Ok(ApiResponse::ok(
        ledger.rollback_import(batch_id, actor.as_str())?,
    ))
}
