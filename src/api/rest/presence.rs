use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::engine::controller::QueryUpdate;
use crate::engine::projector::{self, RiderListView, RiderRow, SelectedRiderView, StatusCounts};
use crate::error::AppError;
use crate::models::rider::RiderId;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/presence/:role/riders", get(list_riders))
        .route("/presence/:role/query", put(update_query))
        .route("/presence/:role/refresh", post(refresh))
        .route("/presence/:role/online", get(online_riders))
        .route("/presence/:role/available", get(available_riders))
        .route("/presence/:role/counts", get(counts))
        .route(
            "/presence/:role/selection",
            post(select_rider).get(get_selection).delete(clear_selection),
        )
        .route("/presence/:role/selection/history", post(toggle_history))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectRequest {
    pub rider_id: String,
}

async fn list_riders(
    State(state): State<Arc<AppState>>,
    Path(role): Path<String>,
) -> Result<Json<RiderListView>, AppError> {
    let controller = state.controller(&role)?;
    Ok(Json(controller.list_view()))
}

/// Snapshot failures are part of the returned view rather than the status.
async fn update_query(
    State(state): State<Arc<AppState>>,
    Path(role): Path<String>,
    Json(update): Json<QueryUpdate>,
) -> Result<Json<RiderListView>, AppError> {
    let controller = state.controller(&role)?;

    match controller.update_query(&update).await {
        Ok(()) => {}
        Err(err @ AppError::BadRequest(_)) => return Err(err),
        Err(_) => {}
    }

    Ok(Json(controller.list_view()))
}

async fn refresh(
    State(state): State<Arc<AppState>>,
    Path(role): Path<String>,
) -> Result<Json<RiderListView>, AppError> {
    let controller = state.controller(&role)?;

    match controller.refresh().await {
        Ok(()) => {}
        Err(err @ AppError::BadRequest(_)) => return Err(err),
        Err(_) => {}
    }

    Ok(Json(controller.list_view()))
}

async fn online_riders(
    State(state): State<Arc<AppState>>,
    Path(role): Path<String>,
) -> Result<Json<Vec<RiderRow>>, AppError> {
    let controller = state.controller(&role)?;
    let now = controller.store().now();
    Ok(Json(projector::rows(&controller.online_riders(), now)))
}

async fn available_riders(
    State(state): State<Arc<AppState>>,
    Path(role): Path<String>,
) -> Result<Json<Vec<RiderRow>>, AppError> {
    let controller = state.controller(&role)?;
    let now = controller.store().now();
    Ok(Json(projector::rows(&controller.available_riders(), now)))
}

async fn counts(
    State(state): State<Arc<AppState>>,
    Path(role): Path<String>,
) -> Result<Json<StatusCounts>, AppError> {
    let controller = state.controller(&role)?;
    Ok(Json(controller.counts()))
}

async fn select_rider(
    State(state): State<Arc<AppState>>,
    Path(role): Path<String>,
    Json(payload): Json<SelectRequest>,
) -> Result<Json<SelectedRiderView>, AppError> {
    if payload.rider_id.trim().is_empty() {
        return Err(AppError::BadRequest("riderId cannot be empty".to_string()));
    }

    let controller = state.controller(&role)?;
    let view = controller.select(RiderId::new(payload.rider_id)).await?;
    Ok(Json(view))
}

async fn get_selection(
    State(state): State<Arc<AppState>>,
    Path(role): Path<String>,
) -> Result<Json<SelectedRiderView>, AppError> {
    let controller = state.controller(&role)?;
    controller
        .selected_view()
        .map(Json)
        .ok_or_else(|| AppError::NotFound("no rider selected".to_string()))
}

async fn clear_selection(
    State(state): State<Arc<AppState>>,
    Path(role): Path<String>,
) -> Result<Json<RiderListView>, AppError> {
    let controller = state.controller(&role)?;
    controller.clear_selection();
    Ok(Json(controller.list_view()))
}

async fn toggle_history(
    State(state): State<Arc<AppState>>,
    Path(role): Path<String>,
) -> Result<Json<SelectedRiderView>, AppError> {
    let controller = state.controller(&role)?;
    let view = controller.toggle_history().await?;
    Ok(Json(view))
}
