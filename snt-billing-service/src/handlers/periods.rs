//! Periods, accruals and the per-period reconciliation.

use crate::dtos::{CreatePeriodRequest, GenerateAccrualsRequest, SetAccrualRequest};
use crate::middleware::{Actor, ApiJson, ApiPath};
use crate::models::{Accrual, Period, ReconciliationReport};
use crate::services::ledger::AccrualSummary;
use crate::startup::AppState;
use axum::extract::State;
use service_core::error::AppError;
use service_core::response::ApiResponse;
use uuid::Uuid;
use validator::Validate;

pub async fn create_period(
    State(state): State<AppState>,
    actor: Actor,
    ApiJson(request): ApiJson<CreatePeriodRequest>,
) -> Result<ApiResponse<Period>, AppError> {
    request.validate()?;

    let mut ledger = state.ledger.write().await;
    let period = ledger.create_period(&request.title, request.from, request.to, actor.as_str())?;
    Ok(ApiResponse::created(period))
}

pub async fn list_periods(State(state): State<AppState>) -> ApiResponse<Vec<Period>> {
    let ledger = state.ledger.read().await;
    ApiResponse::ok(ledger.list_periods())
}

pub async fn approve_period(
    State(state): State<AppState>,
    actor: Actor,
    ApiPath(period_id): ApiPath<Uuid>,
) -> Result<ApiResponse<Period>, AppError> {
    let mut ledger = state.ledger.write().await;
    Ok(ApiResponse::ok(
        ledger.approve_period(period_id, actor.as_str())?,
    ))
}

pub async fn close_period(
    State(state): State<AppState>,
    actor: Actor,
    ApiPath(period_id): ApiPath<Uuid>,
) -> Result<ApiResponse<Period>, AppError> {
    let mut ledger = state.ledger.write().await;
    Ok(ApiResponse::ok(ledger.close_period(period_id, actor.as_str())?))
}

pub async fn set_accrual(
    State(state): State<AppState>,
    actor: Actor,
    ApiPath(period_id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<SetAccrualRequest>,
) -> Result<ApiResponse<Accrual>, AppError> {
    request.validate()?;

    let mut ledger = state.ledger.write().await;
    let accrual = ledger.set_accrual(
        period_id,
        request.plot_id,
        &request.category,
        request.amount,
        actor.as_str(),
    )?;
    Ok(ApiResponse::ok(accrual))
}

pub async fn list_accruals(
    State(state): State<AppState>,
    ApiPath(period_id): ApiPath<Uuid>,
) -> Result<ApiResponse<Vec<Accrual>>, AppError> {
    let ledger = state.ledger.read().await;
    Ok(ApiResponse::ok(ledger.list_accruals(&period_id)?))
}

pub async fn generate_accruals(
    State(state): State<AppState>,
    actor: Actor,
    ApiPath(period_id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<GenerateAccrualsRequest>,
) -> Result<ApiResponse<AccrualSummary>, AppError> {
    request.validate()?;

    let mut ledger = state.ledger.write().await;
    let summary =
        ledger.accrue_period(period_id, &request.category, request.tariff, actor.as_str())?;
    Ok(ApiResponse::ok(summary))
}

pub async fn reconciliation(
    State(state): State<AppState>,
    ApiPath(period_id): ApiPath<Uuid>,
) -> Result<ApiResponse<ReconciliationReport>, AppError> {
    let ledger = state.ledger.read().await;
    Ok(ApiResponse::ok(ledger.reconciliation(&period_id)?))
}
