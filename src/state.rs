use crate::market::filters::ScannerFilters;
use crate::market::pipeline::ScannerCommand;
use crate::market::store::ScannerView;
use crate::market::types::ScannerConfig;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct ScannerSessionHandle {
    pub cancellation_token: CancellationToken,
    pub join_handle: JoinHandle<()>,
    pub commands: mpsc::Sender<ScannerCommand>,
    pub config: ScannerConfig,
}

pub struct AppState {
    pub started_at: Instant,
    pub scanner: Mutex<Option<ScannerSessionHandle>>,
    pub scanner_view: Arc<RwLock<ScannerView>>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            scanner: Mutex::new(None),
            scanner_view: Arc::new(RwLock::new(ScannerView::idle(ScannerFilters::default()))),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
