use crate::error::AppError;
use crate::market::batching::{apply_flush, TickBuffer};
use crate::market::filters::{FilterDescriptor, FilterPatch, ScannerFilters};
use crate::market::merge::{
    accumulate_tick, apply_page, apply_pair_stats, apply_snapshot, StatsOutcome, TickOutcome,
};
use crate::market::scanner_api::{ScannerPage, ScannerPageSource};
use crate::market::store::{ScannerState, ScannerView};
use crate::market::subscriptions::RowKey;
use crate::market::transport::Transport;
use crate::market::types::{
    ConnectionState, LoadState, OrderBy, RankBy, ScannerConfig, TableKind,
};
use crate::market::wire::{decode_event, InboundMessage, ScannerEvent};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where the engine sends subscription interest.
pub trait SubscriptionSink {
    fn subscribe_filter(&self, descriptor: &FilterDescriptor) -> Result<(), AppError>;
    fn unsubscribe_filter(&self, descriptor: &FilterDescriptor) -> Result<(), AppError>;
    fn sync_rows(&self, desired: &BTreeSet<RowKey>) -> usize;
}

impl SubscriptionSink for Transport {
    fn subscribe_filter(&self, descriptor: &FilterDescriptor) -> Result<(), AppError> {
        Transport::subscribe_filter(self, descriptor)
    }

    fn unsubscribe_filter(&self, descriptor: &FilterDescriptor) -> Result<(), AppError> {
        Transport::unsubscribe_filter(self, descriptor)
    }

    fn sync_rows(&self, desired: &BTreeSet<RowKey>) -> usize {
        Transport::sync_rows(self, desired)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub table: TableKind,
    pub descriptor: FilterDescriptor,
    pub append: bool,
}

#[derive(Debug)]
pub struct PageResult {
    pub request: LoadRequest,
    pub result: Result<ScannerPage, AppError>,
}

#[derive(Debug)]
pub enum ScannerCommand {
    SetFilters {
        patch: FilterPatch,
        reply: oneshot::Sender<Result<bool, AppError>>,
    },
    SetRankBy {
        table: TableKind,
        rank_by: RankBy,
    },
    SetOrderBy {
        table: TableKind,
        order_by: OrderBy,
    },
    LoadMore {
        table: TableKind,
    },
    Reload {
        table: TableKind,
    },
}

/// Single-writer state machine. Time is passed in, so every transition is deterministic.
pub struct ScannerCore<S> {
    state: ScannerState,
    ticks: TickBuffer,
    flush_window: Duration,
    flush_deadline: Option<Instant>,
    sink: S,
    dirty: bool,
}

impl<S: SubscriptionSink> ScannerCore<S> {
    pub fn new(filters: ScannerFilters, flush_window: Duration, sink: S) -> Self {
        Self {
            state: ScannerState::new(filters),
            ticks: TickBuffer::default(),
            flush_window,
            flush_deadline: None,
            sink,
            dirty: true,
        }
    }

    pub fn state(&self) -> &ScannerState {
        &self.state
    }

    pub fn start(&mut self) -> Vec<LoadRequest> {
        TableKind::ALL
            .into_iter()
            .map(|kind| self.begin_load(kind))
            .collect()
    }

    fn begin_load(&mut self, kind: TableKind) -> LoadRequest {
        let descriptor = {
            let table = self.state.table(kind);
            self.state
                .filters
                .descriptor(table.rank_by, table.order_by, 1)
        };
        self.activate_filter(kind, descriptor.clone());

        let table = self.state.table_mut(kind);
        table.load_state = LoadState::Loading;
        table.loading_more = false;
        table.error = None;
        self.dirty = true;

        LoadRequest {
            table: kind,
            descriptor,
            append: false,
        }
    }

    fn activate_filter(&mut self, kind: TableKind, descriptor: FilterDescriptor) {
        let previous = self.state.table(kind).active_filter.clone();
        if previous.as_ref() == Some(&descriptor) {
            return;
        }
        if let Some(previous) = previous {
            self.release_filter(kind, &previous);
        }
        if let Err(error) = self.sink.subscribe_filter(&descriptor) {
            warn!(table = kind.as_str(), %error, "failed to register filter subscription");
        }

        let seq = self.state.next_seq();
        let table = self.state.table_mut(kind);
        table.note_filter_request(descriptor.rank_by, seq);
        table.active_filter = Some(descriptor);
    }

    /// Drops `kind`'s filter interest unless the other table shares the same descriptor.
    fn release_filter(&mut self, kind: TableKind, descriptor: &FilterDescriptor) {
        self.state.table_mut(kind).active_filter = None;
        let shared = TableKind::ALL
            .into_iter()
            .filter(|other| *other != kind)
            .any(|other| self.state.table(other).active_filter.as_ref() == Some(descriptor));
        if shared {
            return;
        }
        if let Err(error) = self.sink.unsubscribe_filter(descriptor) {
            warn!(table = kind.as_str(), %error, "failed to release filter subscription");
        }
    }

    pub fn set_filters(&mut self, patch: FilterPatch) -> Result<Vec<LoadRequest>, AppError> {
        if !self.state.filters.apply(patch)? {
            return Ok(Vec::new());
        }

        for kind in TableKind::ALL {
            let previous = self.state.table_mut(kind).active_filter.take();
            if let Some(previous) = previous {
                if let Err(error) = self.sink.unsubscribe_filter(&previous) {
                    warn!(table = kind.as_str(), %error, "failed to release filter subscription");
                }
            }
        }
        info!(chain = %self.state.filters.chain, "filters changed, reloading both tables");
        Ok(self.start())
    }

    pub fn set_rank_by(&mut self, kind: TableKind, rank_by: RankBy) -> Option<LoadRequest> {
        if self.state.table(kind).rank_by == rank_by {
            return None;
        }
        self.state.table_mut(kind).rank_by = rank_by;
        Some(self.begin_load(kind))
    }

    pub fn set_order_by(&mut self, kind: TableKind, order_by: OrderBy) -> Option<LoadRequest> {
        if self.state.table(kind).order_by == order_by {
            return None;
        }
        self.state.table_mut(kind).order_by = order_by;
        Some(self.begin_load(kind))
    }

    /// Next page request, or `None` while loading or when every row is already present.
    pub fn load_more(&mut self, kind: TableKind) -> Option<LoadRequest> {
        let table = self.state.table(kind);
        if table.is_loading() || !table.has_more() {
            return None;
        }
        let descriptor =
            self.state
                .filters
                .descriptor(table.rank_by, table.order_by, table.page.saturating_add(1));

        self.state.table_mut(kind).loading_more = true;
        self.dirty = true;
        Some(LoadRequest {
            table: kind,
            descriptor,
            append: true,
        })
    }

    pub fn reload(&mut self, kind: TableKind) -> LoadRequest {
        self.begin_load(kind)
    }

    pub fn handle_command(&mut self, command: ScannerCommand) -> Vec<LoadRequest> {
        match command {
            ScannerCommand::SetFilters { patch, reply } => {
                let outcome = self.set_filters(patch);
                let (requests, response) = match outcome {
                    Ok(requests) => {
                        let changed = !requests.is_empty();
                        (requests, Ok(changed))
                    }
                    Err(error) => (Vec::new(), Err(error)),
                };
                let _ = reply.send(response);
                requests
            }
            ScannerCommand::SetRankBy { table, rank_by } => {
                self.set_rank_by(table, rank_by).into_iter().collect()
            }
            ScannerCommand::SetOrderBy { table, order_by } => {
                self.set_order_by(table, order_by).into_iter().collect()
            }
            ScannerCommand::LoadMore { table } => self.load_more(table).into_iter().collect(),
            ScannerCommand::Reload { table } => vec![self.reload(table)],
        }
    }

    /// Applies a REST response in arrival order; a failure keeps the previous rows.
    pub fn apply_page_result(&mut self, result: PageResult) {
        let PageResult { request, result } = result;
        match result {
            Ok(page) => {
                debug!(
                    table = request.table.as_str(),
                    page = request.descriptor.page,
                    rows = page.rows.len(),
                    total_rows = page.total_rows,
                    "applying scanner page"
                );
                apply_page(
                    &mut self.state,
                    request.table,
                    page,
                    request.descriptor.page,
                    request.append,
                );
            }
            Err(error) => {
                warn!(table = request.table.as_str(), %error, "scanner page request failed");
                let table = self.state.table_mut(request.table);
                table.error = Some(error.to_string());
                if request.append {
                    table.loading_more = false;
                } else {
                    table.load_state = LoadState::Idle;
                }
            }
        }
        self.sync_subscriptions();
        self.dirty = true;
    }

    pub fn handle_inbound(&mut self, message: InboundMessage, now: Instant) {
        let event = match decode_event(message) {
            Ok(event) => event,
            Err(error) => {
                warn!(%error, "discarding scanner event with unexpected shape");
                return;
            }
        };

        match event {
            ScannerEvent::Snapshot(payload) => {
                let outcome = apply_snapshot(&mut self.state, &payload);
                debug!(?outcome, "applied scanner snapshot");
                self.sync_subscriptions();
                self.dirty = true;
            }
            ScannerEvent::PairStats(payload) => match apply_pair_stats(&mut self.state, &payload) {
                StatsOutcome::Updated(_) => self.dirty = true,
                StatsOutcome::Inserted => {
                    self.sync_subscriptions();
                    self.dirty = true;
                }
                StatsOutcome::Skipped => {
                    debug!(pair = %payload.pair.pair_address, "skipping stats for unknown row");
                }
            },
            ScannerEvent::Tick(payload) => {
                match accumulate_tick(&self.state, &mut self.ticks, &payload) {
                    TickOutcome::Buffered { armed: true } => {
                        self.flush_deadline = Some(now + self.flush_window);
                    }
                    TickOutcome::Buffered { armed: false } => {}
                    skipped => {
                        debug!(pair = %payload.pair.pair, ?skipped, "tick not buffered");
                    }
                }
            }
            ScannerEvent::Ignored(name) => {
                debug!(event = %name, "ignoring unhandled scanner event");
            }
        }
    }

    pub fn flush_deadline(&self) -> Option<Instant> {
        self.flush_deadline
    }

    /// Applies everything buffered since the timer was armed. Returns rows touched.
    pub fn flush(&mut self) -> usize {
        self.flush_deadline = None;
        let pending = self.ticks.drain();
        let touched = apply_flush(&mut self.state, &pending);
        if touched > 0 {
            self.dirty = true;
        }
        touched
    }

    pub fn flush_if_due(&mut self, now: Instant) -> Option<usize> {
        let deadline = self.flush_deadline?;
        (now >= deadline).then(|| self.flush())
    }

    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn view(&self, connection: ConnectionState) -> ScannerView {
        self.state.view(connection)
    }

    fn sync_subscriptions(&mut self) {
        let desired = self.state.row_keys();
        let messages = self.sink.sync_rows(&desired);
        if messages > 0 {
            debug!(rows = desired.len(), messages, "row subscriptions converged");
        }
    }
}

fn spawn_load<P: ScannerPageSource>(
    source: &Arc<P>,
    request: LoadRequest,
    results: &mpsc::UnboundedSender<PageResult>,
) {
    let source = Arc::clone(source);
    let results = results.clone();
    tokio::spawn(async move {
        let result = source.fetch_page(&request.descriptor).await;
        let _ = results.send(PageResult { request, result });
    });
}

async fn flush_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending::<()>().await,
    }
}

async fn publish_view<S: SubscriptionSink>(
    core: &ScannerCore<S>,
    transport: &Transport,
    view_store: &Arc<RwLock<ScannerView>>,
) {
    let view = core.view(transport.connection_state());
    *view_store.write().await = view;
}

/// Drives the engine until cancelled. All state mutation happens on this task.
pub async fn run_scanner<P: ScannerPageSource>(
    config: ScannerConfig,
    transport: Transport,
    source: Arc<P>,
    mut commands: mpsc::Receiver<ScannerCommand>,
    view_store: Arc<RwLock<ScannerView>>,
    cancel_token: CancellationToken,
) {
    let mut core = ScannerCore::new(
        ScannerFilters::for_chain(config.chain),
        config.flush_window(),
        transport.clone(),
    );
    let mut inbound = transport.listen();
    let mut connection = transport.watch_connection();
    let (page_tx, mut page_rx) = mpsc::unbounded_channel();

    for request in core.start() {
        spawn_load(&source, request, &page_tx);
    }
    transport.connect();
    info!(chain = %config.chain, ws_url = %config.ws_url, "scanner engine started");

    loop {
        let deadline = core.flush_deadline();
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            command = commands.recv() => {
                let Some(command) = command else {
                    break;
                };
                for request in core.handle_command(command) {
                    spawn_load(&source, request, &page_tx);
                }
            }
            Some(message) = inbound.recv() => {
                core.handle_inbound(message, Instant::now());
            }
            Some(result) = page_rx.recv() => {
                core.apply_page_result(result);
            }
            changed = connection.changed() => {
                if changed.is_ok() {
                    core.dirty = true;
                }
            }
            _ = flush_timer(deadline) => {
                core.flush();
            }
        }

        if core.take_dirty() {
            publish_view(&core, &transport, &view_store).await;
        }
    }

    transport.disconnect().await;
    publish_view(&core, &transport, &view_store).await;
    info!("scanner engine stopped");
}
