use crate::error::AppError;
use crate::market::filters::{FilterPatch, ScannerFilters};
use crate::market::pipeline::{run_scanner, ScannerCommand};
use crate::market::scanner_api::{HttpScannerApi, ScannerPageSource};
use crate::market::store::ScannerView;
use crate::market::transport::Transport;
use crate::market::types::{Chain, OrderBy, RankBy, ScannerConfig, ScannerConfigArgs, TableKind};
use crate::state::{AppState, ScannerSessionHandle};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

const COMMAND_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerSession {
    pub chain: Chain,
    pub api_base_url: String,
    pub ws_url: String,
    pub flush_window_ms: u64,
}

impl ScannerSession {
    fn from_config(config: &ScannerConfig) -> Self {
        Self {
            chain: config.chain,
            api_base_url: config.api_base_url.clone(),
            ws_url: config.ws_url.clone(),
            flush_window_ms: config.flush_window_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScannerStopResult {
    pub stopped: bool,
}

pub async fn start_scanner(
    state: &AppState,
    args: Option<ScannerConfigArgs>,
) -> Result<ScannerSession, AppError> {
    let config = args.unwrap_or_default().normalize()?;
    let source = Arc::new(HttpScannerApi::new(&config)?);
    start_scanner_with_source(state, config, source).await
}

/// Starts a session against any page source, replacing the running one.
pub async fn start_scanner_with_source<P: ScannerPageSource>(
    state: &AppState,
    config: ScannerConfig,
    source: Arc<P>,
) -> Result<ScannerSession, AppError> {
    stop_running_session(state).await;
    *state.scanner_view.write().await = ScannerView::idle(ScannerFilters::for_chain(config.chain));

    let cancellation_token = CancellationToken::new();
    let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let transport = Transport::new((&config).into());
    let join_handle = tokio::spawn(run_scanner(
        config.clone(),
        transport,
        source,
        command_rx,
        Arc::clone(&state.scanner_view),
        cancellation_token.clone(),
    ));

    let session = ScannerSession::from_config(&config);
    *state.scanner.lock().await = Some(ScannerSessionHandle {
        cancellation_token,
        join_handle,
        commands,
        config,
    });
    Ok(session)
}

async fn stop_running_session(state: &AppState) -> bool {
    let existing_handle = {
        let mut scanner_slot = state.scanner.lock().await;
        scanner_slot.take()
    };
    let Some(handle) = existing_handle else {
        return false;
    };
    handle.cancellation_token.cancel();
    let _ = handle.join_handle.await;
    true
}

pub async fn stop_scanner(state: &AppState) -> Result<ScannerStopResult, AppError> {
    let stopped = stop_running_session(state).await;
    Ok(ScannerStopResult { stopped })
}

pub async fn scanner_view(state: &AppState) -> Result<ScannerView, AppError> {
    let view = state.scanner_view.read().await.clone();
    Ok(view)
}

async fn send_command(state: &AppState, command: ScannerCommand) -> Result<(), AppError> {
    let commands = {
        let scanner_slot = state.scanner.lock().await;
        scanner_slot
            .as_ref()
            .map(|handle| handle.commands.clone())
            .ok_or(AppError::ChannelClosed)?
    };
    commands
        .send(command)
        .await
        .map_err(|_| AppError::ChannelClosed)
}

/// Applies a settled filter change. Returns whether the filters actually changed.
pub async fn set_filters(state: &AppState, patch: FilterPatch) -> Result<bool, AppError> {
    let (reply, response) = oneshot::channel();
    send_command(state, ScannerCommand::SetFilters { patch, reply }).await?;
    response.await.map_err(|_| AppError::ChannelClosed)?
}

pub async fn set_rank_by(state: &AppState, table: TableKind, rank_by: RankBy) -> Result<(), AppError> {
    send_command(state, ScannerCommand::SetRankBy { table, rank_by }).await
}

pub async fn set_order_by(
    state: &AppState,
    table: TableKind,
    order_by: OrderBy,
) -> Result<(), AppError> {
    send_command(state, ScannerCommand::SetOrderBy { table, order_by }).await
}

pub async fn load_more(state: &AppState, table: TableKind) -> Result<(), AppError> {
    send_command(state, ScannerCommand::LoadMore { table }).await
}

pub async fn reload(state: &AppState, table: TableKind) -> Result<(), AppError> {
    send_command(state, ScannerCommand::Reload { table }).await
}
