use crate::market::types::ConnectionState;
use crate::{error::AppError, state::AppState};
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_ms: u128,
    pub connection: ConnectionState,
    pub scanner_running: bool,
}

pub fn build_health_response(
    started_at: Instant,
    connection: ConnectionState,
    scanner_running: bool,
) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_ms: started_at.elapsed().as_millis(),
        connection,
        scanner_running,
    }
}

pub async fn health(state: &AppState) -> Result<HealthResponse, AppError> {
    let scanner_running = state.scanner.lock().await.is_some();
    let connection = state.scanner_view.read().await.connection;
    Ok(build_health_response(
        state.started_at,
        connection,
        scanner_running,
    ))
}
