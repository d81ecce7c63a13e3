//! Defines the Axum API routes and handlers.

use crate::shell::Dispatcher;
use crate::web::models::{CommandRequest, CommandResponse};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;

pub type AppState = Arc<Dispatcher>;

/// Creates the Axum router with all the API endpoints.
pub fn create_router(dispatcher: AppState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/command", post(execute_command))
        .with_state(dispatcher)
}

/// Handler returning the combined GPIO, UART and ADC snapshot.
async fn get_state(State(dispatcher): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    dispatcher.peripherals().state_json().map(Json).map_err(|e| {
        tracing::error!("Failed to snapshot peripherals: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Handler running one shell command line.
///
/// Commands may block (stopping an ADC sampler waits for the thread), so they
/// run on the blocking pool.
async fn execute_command(
    State(dispatcher): State<AppState>,
    Json(payload): Json<CommandRequest>,
) -> (StatusCode, Json<CommandResponse>) {
    let result = tokio::task::spawn_blocking(move || dispatcher.execute(&payload.command)).await;
    match result {
        Ok(Ok(output)) => (StatusCode::OK, Json(CommandResponse::success(output))),
        Ok(Err(e)) => (StatusCode::BAD_REQUEST, Json(CommandResponse::failure(e.to_string()))),
        Err(e) => {
            tracing::error!("Command task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(CommandResponse::failure("command task failed".to_string())),
            )
        }
    }
}

/// Serve the API until the listener fails.
pub async fn serve(dispatcher: AppState, listener: tokio::net::TcpListener) -> std::io::Result<()> {
    tracing::info!("Web API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, create_router(dispatcher)).await
}
