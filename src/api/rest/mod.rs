pub mod presence;
pub mod ws;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(presence::router())
        .route("/presence/:role/ws", get(ws::ws_handler))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Serialize)]
struct RoleHealth {
    mounted: bool,
    riders: usize,
    online: usize,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    connected: bool,
    listeners: usize,
    roles: BTreeMap<&'static str, RoleHealth>,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let roles = state
        .controllers
        .values()
        .map(|controller| {
            let counts = controller.counts();
            (
                controller.role().as_str(),
                RoleHealth {
                    mounted: controller.is_mounted(),
                    riders: controller.store().len(),
                    online: counts.online,
                },
            )
        })
        .collect();

    Json(HealthResponse {
        status: "ok",
        connected: state.stream.is_connected(),
        listeners: state.stream.listener_count(),
        roles,
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
