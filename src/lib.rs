pub mod commands;
pub mod error;
pub mod logging;
pub mod market;
pub mod state;

use clap::Parser;
use commands::health::health;
use commands::scanner::{start_scanner, stop_scanner};
use error::AppError;
use market::types::{Chain, ScannerConfigArgs};
use state::AppState;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "token-scanner",
    version,
    about = "Live token scanner: REST snapshots reconciled with websocket deltas"
)]
struct Cli {
    #[arg(long, env = "SCANNER_API_URL")]
    api_url: Option<String>,
    #[arg(long, env = "SCANNER_WS_URL")]
    ws_url: Option<String>,
    #[arg(long, env = "SCANNER_CHAIN")]
    chain: Option<Chain>,
    #[arg(long, env = "SCANNER_FLUSH_WINDOW_MS")]
    flush_window_ms: Option<u64>,
    #[arg(long, env = "SCANNER_REQUEST_TIMEOUT_MS")]
    request_timeout_ms: Option<u64>,
    #[arg(long, env = "SCANNER_BACKOFF_FLOOR_MS")]
    backoff_floor_ms: Option<u64>,
    #[arg(long, env = "SCANNER_BACKOFF_CEILING_MS")]
    backoff_ceiling_ms: Option<u64>,
    /// Seconds between table summaries in the log.
    #[arg(long, env = "SCANNER_SUMMARY_INTERVAL_SECS", default_value_t = 10)]
    summary_interval_secs: u64,
}

impl Cli {
    fn config_args(&self) -> ScannerConfigArgs {
        ScannerConfigArgs {
            api_base_url: self.api_url.clone(),
            ws_url: self.ws_url.clone(),
            flush_window_ms: self.flush_window_ms,
            backoff_floor_ms: self.backoff_floor_ms,
            backoff_ceiling_ms: self.backoff_ceiling_ms,
            send_retry_delay_ms: None,
            request_timeout_ms: self.request_timeout_ms,
            chain: self.chain,
        }
    }
}

pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let _log_guard = logging::init_tracing("token_scanner_lib");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(cli))
}

async fn serve(cli: Cli) -> Result<(), AppError> {
    let state = AppState::new();
    let session = start_scanner(&state, Some(cli.config_args())).await?;
    info!(
        chain = %session.chain,
        api = %session.api_base_url,
        ws = %session.ws_url,
        flush_window_ms = session.flush_window_ms,
        "scanner session started"
    );

    let mut summary = tokio::time::interval(Duration::from_secs(cli.summary_interval_secs.max(1)));
    summary.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(error) = signal {
                    warn!(%error, "failed to listen for shutdown signal");
                }
                break;
            }
            _ = summary.tick() => log_summary(&state).await,
        }
    }

    let stopped = stop_scanner(&state).await?;
    info!(stopped = stopped.stopped, "scanner session shut down");
    Ok(())
}

async fn log_summary(state: &AppState) {
    let uptime_ms = match health(state).await {
        Ok(response) => response.uptime_ms,
        Err(_) => 0,
    };
    let view = state.scanner_view.read().await;
    for table in [&view.trending, &view.new] {
        let leader = table
            .rows
            .first()
            .map(|row| format!("{} @ {:.8}", row.token_symbol, row.price_usd))
            .unwrap_or_else(|| "-".to_string());
        info!(
            table = table.kind.as_str(),
            connection = ?view.connection,
            rows = table.rows.len(),
            total_rows = table.total_rows,
            load_state = ?table.load_state,
            error = table.error.as_deref().unwrap_or(""),
            leader = %leader,
            uptime_ms,
            "scanner summary"
        );
    }
}
