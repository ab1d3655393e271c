use super::csv_attachment;
use crate::dtos::{
    AllocateRequest, AssignPlotRequest, AutoAllocateRequest, PaymentDetails, RecordPaymentRequest,
};
use crate::middleware::{Actor, ApiJson, ApiPath, ApiQuery};
use crate::models::{Allocation, Payment};
use crate::services::export::payments_csv;
use crate::services::PaymentFilter;
use crate::startup::AppState;
use axum::{extract::State, response::Response};
use service_core::error::AppError;
use service_core::response::ApiResponse;
use uuid::Uuid;
use validator::Validate;

pub async fn record_payment(
    State(state): State<AppState>,
    actor: Actor,
    ApiJson(request): ApiJson<RecordPaymentRequest>,
) -> Result<ApiResponse<Payment>, AppError> {
    request.validate()?;

    let mut ledger = state.ledger.write().await;
    let payment = ledger.record_payment(request.into(), actor.as_str())?;
    Ok(ApiResponse::created(payment))
}

pub async fn list_payments(
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<PaymentFilter>,
) -> Result<ApiResponse<Vec<Payment>>, AppError> {
    let ledger = state.ledger.read().await;
    Ok(ApiResponse::ok(ledger.list_payments(&filter)?))
}

pub async fn get_payment(
    State(state): State<AppState>,
    ApiPath(payment_id): ApiPath<Uuid>,
) -> Result<ApiResponse<PaymentDetails>, AppError> {
    let ledger = state.ledger.read().await;
    let payment = ledger.get_payment(&payment_id)?.clone();
    Ok(ApiResponse::ok(PaymentDetails {
        payment,
        allocations: ledger.allocations_for(&payment_id),
        unallocated: ledger.unallocated(&payment_id)?,
    }))
}

/// CSV of payments; accepts the same filter as the list.
pub async fn export_payments(
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<PaymentFilter>,
) -> Result<Response, AppError> {
    let ledger = state.ledger.read().await;
    let payments = ledger.list_payments(&filter)?;
    let body = payments_csv(&payments, ledger.directory())?;
    tracing::info!(rows = payments.len(), "Payments exported");
    Ok(csv_attachment("payments.csv", body))
}

pub async fn assign_plot(
    State(state): State<AppState>,
    actor: Actor,
    ApiPath(payment_id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<AssignPlotRequest>,
) -> Result<ApiResponse<Payment>, AppError> {
    let mut ledger = state.ledger.write().await;
    let payment = ledger.assign_payment_plot(payment_id, request.plot_id, actor.as_str())?;
    Ok(ApiResponse::ok(payment))
}

pub async fn void_payment(
    State(state): State<AppState>,
    actor: Actor,
    ApiPath(payment_id): ApiPath<Uuid>,
) -> Result<ApiResponse<Payment>, AppError> {
    let mut ledger = state.ledger.write().await;
    Ok(ApiResponse::ok(
        ledger.void_payment(payment_id, actor.as_str())?,
    ))
}

pub async fn allocate(
    State(state): State<AppState>,
    actor: Actor,
    ApiPath(payment_id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<AllocateRequest>,
) -> Result<ApiResponse<Allocation>, AppError> {
    request.validate()?;

    let mut ledger = state.ledger.write().await;
    let allocation = ledger.allocate_payment(
        payment_id,
        request.accrual_id,
        request.amount,
        actor.as_str(),
    )?;
    Ok(ApiResponse::created(allocation))
}

pub async fn set_auto_allocate(
    State(state): State<AppState>,
    actor: Actor,
    ApiPath(payment_id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<AutoAllocateRequest>,
) -> Result<ApiResponse<Payment>, AppError> {
    let mut ledger = state.ledger.write().await;
    let payment = ledger.set_auto_allocate(payment_id, request.disabled, actor.as_str())?;
    Ok(ApiResponse::ok(payment))
}
