use std::sync::Arc;
use std::time::Duration;

use delivery_lifecycle::api;
use delivery_lifecycle::config::Config;
use delivery_lifecycle::engine::sweep::run_expiry_sweep;
use delivery_lifecycle::error::AppError;
use delivery_lifecycle::observability::logging;
use delivery_lifecycle::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;
    logging::init(&config.log_level, config.log_format);

    let shared_state = Arc::new(AppState::new(&config));
    let app = api::rest::router(shared_state.clone());

    tokio::spawn(run_expiry_sweep(
        shared_state.clone(),
        Duration::from_secs(config.expiry_sweep_interval_secs),
    ));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        offer_window_secs = config.offer_window_secs,
        courier_capacity = config.courier_capacity,
        "http server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
