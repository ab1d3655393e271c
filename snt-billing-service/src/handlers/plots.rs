use crate::dtos::CreatePlotRequest;
use crate::middleware::{Actor, ApiJson};
use crate::models::Plot;
use crate::startup::AppState;
use axum::extract::State;
use service_core::error::AppError;
use service_core::response::ApiResponse;
use validator::Validate;

pub async fn register_plot(
    State(state): State<AppState>,
    actor: Actor,
    ApiJson(request): ApiJson<CreatePlotRequest>,
) -> Result<ApiResponse<Plot>, AppError> {
    request.validate()?;

    let mut ledger = state.ledger.write().await;
    let plot = ledger.register_plot(request.into(), actor.as_str())?;
    Ok(ApiResponse::created(plot))
}

pub async fn list_plots(State(state): State<AppState>) -> ApiResponse<Vec<Plot>> {
    let ledger = state.ledger.read().await;
    ApiResponse::ok(ledger.list_plots())
}
