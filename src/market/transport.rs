use crate::error::AppError;
use crate::logging::WarnThrottle;
use crate::market::filters::FilterDescriptor;
use crate::market::scanner_api::connect_scanner_stream;
use crate::market::subscriptions::{RowKey, SubscriptionRegistry};
use crate::market::types::{ConnectionState, ScannerConfig};
use crate::market::wire::{encode_outbound, parse_inbound_frame, InboundMessage, OutboundMessage};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub ws_url: String,
    pub backoff_floor: Duration,
    pub backoff_ceiling: Duration,
    pub send_retry_delay: Duration,
}

impl From<&ScannerConfig> for TransportConfig {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            ws_url: config.ws_url.clone(),
            backoff_floor: Duration::from_millis(config.backoff_floor_ms),
            backoff_ceiling: Duration::from_millis(config.backoff_ceiling_ms),
            send_retry_delay: config.send_retry_delay(),
        }
    }
}

/// Doubling reconnect delay. State survives consecutive failures until `reset`.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl ReconnectBackoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}

enum FrameDirective {
    Continue,
    Closed,
}

struct ChannelState {
    registry: SubscriptionRegistry,
    outbound: Option<mpsc::UnboundedSender<Message>>,
}

struct TransportSession {
    cancel_token: CancellationToken,
    join_handle: JoinHandle<()>,
}

struct TransportShared {
    config: TransportConfig,
    should_stay_connected: AtomicBool,
    channel: Mutex<ChannelState>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<InboundMessage>>>,
    connection: watch::Sender<ConnectionState>,
    session: Mutex<Option<TransportSession>>,
    warn_throttle: Mutex<WarnThrottle>,
}

/// Reconnecting push channel that owns the desired subscription registry.
///
/// Subscription changes made while the socket is down only touch the registry; the
/// next successful open replays every entry, so nothing is queued across reconnects.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<TransportShared>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        let (connection, _) = watch::channel(ConnectionState::Stopped);
        Self {
            shared: Arc::new(TransportShared {
                config,
                should_stay_connected: AtomicBool::new(false),
                channel: Mutex::new(ChannelState {
                    registry: SubscriptionRegistry::default(),
                    outbound: None,
                }),
                listeners: Mutex::new(Vec::new()),
                connection,
                session: Mutex::new(None),
                warn_throttle: Mutex::new(WarnThrottle::default()),
            }),
        }
    }

    /// Starts the connection loop. No-op while already connected or connecting.
    pub fn connect(&self) {
        if self.shared.should_stay_connected.swap(true, Ordering::SeqCst) {
            return;
        }

        let cancel_token = CancellationToken::new();
        let join_handle = tokio::spawn(run_connection_loop(
            Arc::clone(&self.shared),
            cancel_token.clone(),
        ));
        *self.shared.session.lock() = Some(TransportSession {
            cancel_token,
            join_handle,
        });
    }

    /// Closes the channel and stops reconnecting. Registry contents are kept.
    pub async fn disconnect(&self) {
        self.shared
            .should_stay_connected
            .store(false, Ordering::SeqCst);
        let session = self.shared.session.lock().take();
        if let Some(session) = session {
            session.cancel_token.cancel();
            let _ = session.join_handle.await;
        }
        self.shared.channel.lock().outbound = None;
        self.shared.connection.send_replace(ConnectionState::Stopped);
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.connection.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.shared.connection.subscribe()
    }

    /// Registers a listener; every well-formed inbound frame is delivered to all listeners.
    pub fn listen(&self) -> mpsc::UnboundedReceiver<InboundMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.shared.listeners.lock().push(sender);
        receiver
    }

    /// Sends a one-off message. When the channel is down the message gets one retry
    /// after the configured delay and is then dropped.
    pub fn send(&self, message: OutboundMessage) {
        let frame = match encode_outbound(&message) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(event = message.event_name(), %error, "failed to encode outbound message");
                return;
            }
        };
        if self.shared.try_send_frame(&frame) {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let event = message.event_name();
        tokio::spawn(async move {
            tokio::time::sleep(shared.config.send_retry_delay).await;
            if !shared.try_send_frame(&frame) {
                debug!(event, "dropping outbound message while disconnected");
            }
        });
    }

    pub fn subscribe_filter(&self, descriptor: &FilterDescriptor) -> Result<(), AppError> {
        let mut channel = self.shared.channel.lock();
        let message = channel.registry.subscribe_filter(descriptor)?;
        dispatch_locked(&channel, message.into_iter());
        Ok(())
    }

    pub fn unsubscribe_filter(&self, descriptor: &FilterDescriptor) -> Result<(), AppError> {
        let mut channel = self.shared.channel.lock();
        let message = channel.registry.unsubscribe_filter(descriptor)?;
        dispatch_locked(&channel, message.into_iter());
        Ok(())
    }

    pub fn subscribe_row(&self, key: &RowKey) {
        let mut channel = self.shared.channel.lock();
        let messages = channel.registry.subscribe_row(key);
        dispatch_locked(&channel, messages.into_iter());
    }

    pub fn unsubscribe_row(&self, key: &RowKey) {
        let mut channel = self.shared.channel.lock();
        let messages = channel.registry.unsubscribe_row(key);
        dispatch_locked(&channel, messages.into_iter());
    }

    /// Converges both row channels onto `desired`; returns how many messages were produced.
    pub fn sync_rows(&self, desired: &BTreeSet<RowKey>) -> usize {
        let mut channel = self.shared.channel.lock();
        let messages = channel.registry.sync_rows(desired);
        let count = messages.len();
        dispatch_locked(&channel, messages.into_iter());
        count
    }

    pub fn subscription_counts(&self) -> (usize, usize, usize) {
        let channel = self.shared.channel.lock();
        (
            channel.registry.filter_count(),
            channel.registry.pair_count(),
            channel.registry.pair_stats_count(),
        )
    }
}

fn dispatch_locked(channel: &ChannelState, messages: impl Iterator<Item = OutboundMessage>) {
    let Some(outbound) = channel.outbound.as_ref() else {
        return;
    };
    for message in messages {
        match encode_outbound(&message) {
            Ok(frame) => {
                debug!(event = message.event_name(), "sending subscription message");
                let _ = outbound.send(Message::Text(frame));
            }
            Err(error) => {
                warn!(event = message.event_name(), %error, "failed to encode subscription message");
            }
        }
    }
}

impl TransportShared {
    fn try_send_frame(&self, frame: &str) -> bool {
        let channel = self.channel.lock();
        channel
            .outbound
            .as_ref()
            .map(|outbound| outbound.send(Message::Text(frame.to_string())).is_ok())
            .unwrap_or(false)
    }

    /// Installs the live sender and queues the full replay under one lock, so no
    /// registry change can slip between the replay and the first live message.
    fn install_outbound(&self, outbound: mpsc::UnboundedSender<Message>) -> usize {
        let mut channel = self.channel.lock();
        channel.outbound = Some(outbound);
        let replay = channel.registry.replay_messages();
        let count = replay.len();
        dispatch_locked(&channel, replay.into_iter());
        count
    }

    fn clear_outbound(&self) {
        self.channel.lock().outbound = None;
    }

    fn set_connection(&self, state: ConnectionState) {
        self.connection.send_replace(state);
    }

    fn warn_throttled(&self, reason: String) {
        if self.warn_throttle.lock().allow(&reason, Instant::now()) {
            warn!(%reason, "scanner websocket degraded");
        }
    }

    fn dispatch_inbound(&self, message: InboundMessage) {
        let mut listeners = self.listeners.lock();
        listeners.retain(|listener| listener.send(message.clone()).is_ok());
    }

    fn handle_frame(&self, message: Message) -> FrameDirective {
        let mut payload = match message {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(binary) => binary,
            Message::Close(_) => return FrameDirective::Closed,
            _ => return FrameDirective::Continue,
        };

        match parse_inbound_frame(payload.as_mut_slice()) {
            Ok(inbound) => {
                debug!(event = %inbound.event, "inbound scanner frame");
                self.dispatch_inbound(inbound);
            }
            Err(error) => {
                self.warn_throttled(format!("discarding malformed frame: {error}"));
            }
        }
        FrameDirective::Continue
    }
}

async fn run_connection_loop(shared: Arc<TransportShared>, cancel_token: CancellationToken) {
    let mut backoff =
        ReconnectBackoff::new(shared.config.backoff_floor, shared.config.backoff_ceiling);
    let mut reconnect_attempt = 0_u32;

    while !cancel_token.is_cancelled() {
        shared.set_connection(if reconnect_attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        });

        let connected = tokio::select! {
            _ = cancel_token.cancelled() => break,
            connected = connect_scanner_stream(&shared.config.ws_url) => connected,
        };

        match connected {
            Ok(websocket_stream) => {
                backoff.reset();
                reconnect_attempt = 0;
                let (mut sink, mut stream) = websocket_stream.split();
                let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
                let replayed = shared.install_outbound(outbound_tx);
                shared.set_connection(ConnectionState::Live);
                info!(replayed, "scanner websocket connected");

                loop {
                    tokio::select! {
                        _ = cancel_token.cancelled() => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                        outbound = outbound_rx.recv() => {
                            let Some(frame) = outbound else {
                                break;
                            };
                            if let Err(error) = sink.send(frame).await {
                                shared.warn_throttled(format!("websocket send error: {error}"));
                                break;
                            }
                        }
                        next_message = stream.next() => {
                            match next_message {
                                Some(Ok(message)) => {
                                    if let FrameDirective::Closed = shared.handle_frame(message) {
                                        info!("scanner websocket closed by server");
                                        break;
                                    }
                                }
                                Some(Err(error)) => {
                                    shared.warn_throttled(format!("websocket frame error: {error}"));
                                    break;
                                }
                                None => break,
                            }
                        }
                    }
                }

                shared.clear_outbound();
            }
            Err(error) => {
                shared.warn_throttled(format!("websocket connect error: {error}"));
            }
        }

        if cancel_token.is_cancelled() {
            break;
        }

        reconnect_attempt = reconnect_attempt.saturating_add(1);
        let delay = backoff.next_delay();
        shared.set_connection(ConnectionState::Reconnecting);
        info!(
            attempt = reconnect_attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling scanner websocket reconnect"
        );
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.clear_outbound();
    shared.set_connection(ConnectionState::Stopped);
}
