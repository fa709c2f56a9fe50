use std::sync::Arc;

use fleet_presence::api;
use fleet_presence::config::Config;
use fleet_presence::engine::controller::{ControllerOptions, PresenceController};
use fleet_presence::error::AppError;
use fleet_presence::models::snapshot::Role;
use fleet_presence::observability::metrics::Metrics;
use fleet_presence::source::http::HttpRiderSource;
use fleet_presence::source::{StaticTokenProvider, TokenProvider};
use fleet_presence::state::AppState;
use fleet_presence::stream::{ws, StreamHandle};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    if config.api_token.is_none() {
        tracing::warn!("API_TOKEN is not set; upstream fetches will fail");
    }

    let metrics = Metrics::new();
    let (stream, outbound_rx) = StreamHandle::new(config.event_buffer_size);
    let tokens: Arc<dyn TokenProvider> =
        Arc::new(StaticTokenProvider::new(config.api_token.clone()));

    let mut state = AppState::new(stream.clone(), metrics.clone());
    for role in Role::ALL {
        let source = HttpRiderSource::new(
            &config.api_base_url,
            config.riders_path(role),
            config.fetch_timeout,
        )?;
        let controller = PresenceController::new(
            role,
            Arc::new(source),
            tokens.clone(),
            stream.clone(),
            metrics.clone(),
            ControllerOptions {
                history_enabled: config.history_enabled(role),
                page_limit: config.default_page_limit,
                ..ControllerOptions::default()
            },
        );
        state = state.with_controller(controller);
    }
    let shared_state = Arc::new(state);

    tokio::spawn(ws::run_transport(
        config.stream_url.clone(),
        stream,
        outbound_rx,
        config.reconnect_delay,
        metrics,
    ));

    for controller in shared_state.controllers.values() {
        let controller = controller.clone();
        tokio::spawn(async move {
            if let Err(err) = controller.mount().await {
                tracing::warn!(role = %controller.role(), error = %err, "initial snapshot failed");
            }
        });
    }

    let app = api::rest::router(shared_state.clone());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    for controller in shared_state.controllers.values() {
        controller.unmount();
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
