//! Persistent WebSocket transport to the LED device.
//!
//! Provides:
//! - Connection lifecycle with indefinite reconnect and capped backoff
//! - Text `"ping"` keepalive on a fixed interval, with pong tracking
//! - Fire-and-forget binary sends that are dropped while the socket is down
//! - Inbound binary frames delivered in arrival order
//!
//! Text frames other than the keepalive are ignored: the channel is binary
//! only.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use ledwall_core::codec::{Keepalive, PING, PONG};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::{ReconnectConfig, SyncConfig, DEFAULT_KEEPALIVE_INTERVAL};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport unavailable: connection is not open")]
    Unavailable,
    #[error("Outbound queue is full")]
    QueueFull,
    #[error("Transport closed")]
    Closed,
}

/// Connection state of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; a connect or reconnect follows unless closed
    Disconnected,
    /// First connect in flight
    Connecting,
    /// Socket open; sends are accepted
    Connected,
    /// Reconnect in flight after `attempt` consecutive failures or drops
    Reconnecting { attempt: u32 },
    /// Shut down or out of reconnect attempts. Terminal.
    Closed,
}

impl ConnectionState {
    /// True only in [`ConnectionState::Connected`].
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Events emitted by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established
    Connected,
    /// Connection lost; a reconnect follows unless shut down
    Disconnected,
    /// Raw binary payload from the device
    Frame(Vec<u8>),
    /// The device answered a ping
    Pong,
    /// A ping came due while the previous one was still unanswered
    PongOverdue { missed: u32 },
}

/// Anything that accepts outbound binary frames.
pub trait FrameSink: Send {
    fn send_frame(&self, frame: Vec<u8>) -> Result<(), TransportError>;
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub keepalive_interval: Duration,
    pub reconnect: ReconnectConfig,
    pub outbound_capacity: usize,
    pub event_capacity: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            reconnect: ReconnectConfig::default(),
            outbound_capacity: 256,
            event_capacity: 256,
        }
    }
}

impl From<&SyncConfig> for TransportOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            keepalive_interval: config.keepalive_interval,
            reconnect: config.reconnect.clone(),
            outbound_capacity: config.outbound_capacity,
            ..Self::default()
        }
    }
}

/// Cloneable sending side of a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportHandle {
    outgoing: mpsc::Sender<Vec<u8>>,
    state: watch::Receiver<ConnectionState>,
    shutdown: Arc<watch::Sender<bool>>,
    url: Arc<str>,
}

impl TransportHandle {
    /// Queue a binary frame. Never waits: while the socket is not open the
    /// frame is refused with [`TransportError::Unavailable`] and lost.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        match *self.state.borrow() {
            ConnectionState::Connected => {}
            ConnectionState::Closed => return Err(TransportError::Closed),
            _ => return Err(TransportError::Unavailable),
        }

        self.outgoing.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::QueueFull,
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_connected()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// The stream endpoint this transport dials.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Stop keepalive, close the socket and end the reconnect loop.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }
}

impl FrameSink for TransportHandle {
    fn send_frame(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.send(frame)
    }
}

/// The transport: a background task plus its handle and event stream.
pub struct Transport {
    handle: TransportHandle,
    event_rx: Option<mpsc::Receiver<TransportEvent>>,
    task: JoinHandle<()>,
}

impl Transport {
    /// Spawn the connection loop. Must be called inside a tokio runtime.
    pub fn connect(url: impl Into<String>, options: TransportOptions) -> Self {
        let url: String = url.into();
        let (out_tx, out_rx) = mpsc::channel(options.outbound_capacity.max(1));
        let (event_tx, event_rx) = mpsc::channel(options.event_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = TransportHandle {
            outgoing: out_tx,
            state: state_rx,
            shutdown: Arc::new(shutdown_tx),
            url: Arc::from(url.as_str()),
        };

        let task = tokio::spawn(connection_loop(
            url,
            options,
            out_rx,
            event_tx,
            state_tx,
            shutdown_rx,
        ));

        Self {
            handle,
            event_rx: Some(event_rx),
            task,
        }
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.event_rx.take()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    /// Close and wait for the background task to finish.
    pub async fn shutdown(self) {
        self.handle.close();
        if let Err(e) = self.task.await {
            log::error!("Transport task for {} failed: {e}", self.handle.url());
        }
    }
}

/// Why a live connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionEnd {
    /// Socket dropped; reconnect.
    Lost,
    /// Shutdown requested or nobody is listening any more.
    Stop,
}

async fn connection_loop(
    url: String,
    options: TransportOptions,
    mut outgoing: mpsc::Receiver<Vec<u8>>,
    events: mpsc::Sender<TransportEvent>,
    state: watch::Sender<ConnectionState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt = 0u32;

    loop {
        if *shutdown.borrow() {
            break;
        }

        state.send_replace(if attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting { attempt }
        });

        let connected = tokio::select! {
            result = tokio_tungstenite::connect_async(url.as_str()) => result,
            _ = shutdown.changed() => break,
        };

        match connected {
            Ok((ws_stream, _response)) => {
                attempt = 0;
                log::info!("Connected to {url}");
                state.send_replace(ConnectionState::Connected);
                if events.send(TransportEvent::Connected).await.is_err() {
                    break;
                }

                let end = run_connection(
                    ws_stream,
                    options.keepalive_interval,
                    &mut outgoing,
                    &events,
                    &mut shutdown,
                )
                .await;

                state.send_replace(ConnectionState::Disconnected);
                let dropped = drain(&mut outgoing);
                if dropped > 0 {
                    log::debug!("Dropped {dropped} frames queued for the lost connection");
                }
                if end == ConnectionEnd::Stop {
                    break;
                }
                log::info!("Connection to {url} lost");
                if events.send(TransportEvent::Disconnected).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                log::warn!("Connecting to {url} failed: {e}");
                if options.reconnect.gives_up_after(attempt + 1) {
                    log::error!(
                        "Giving up on {url} after {} attempts",
                        options.reconnect.max_attempts
                    );
                    break;
                }
            }
        }

        let delay = options.reconnect.delay_for_attempt(attempt);
        attempt += 1;
        log::info!(
            "Reconnecting to {url} in {}ms (attempt {attempt})",
            delay.as_millis()
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    state.send_replace(ConnectionState::Closed);
    log::debug!("Transport for {url} stopped");
}

async fn run_connection(
    ws_stream: WsStream,
    keepalive_interval: Duration,
    outgoing: &mut mpsc::Receiver<Vec<u8>>,
    events: &mpsc::Sender<TransportEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> ConnectionEnd {
    let (mut write, mut read) = ws_stream.split();

    let mut keepalive = tokio::time::interval_at(Instant::now() + keepalive_interval, keepalive_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut awaiting_pong = false;
    let mut missed = 0u32;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return ConnectionEnd::Stop;
            }

            frame = outgoing.recv() => {
                let Some(frame) = frame else {
                    let _ = write.send(Message::Close(None)).await;
                    return ConnectionEnd::Stop;
                };
                if let Err(e) = write.send(Message::Binary(frame.into())).await {
                    log::warn!("Send failed: {e}");
                    return ConnectionEnd::Lost;
                }
            }

            _ = keepalive.tick() => {
                if awaiting_pong {
                    missed += 1;
                    log::debug!("Pong overdue ({missed} missed)");
                    if events.send(TransportEvent::PongOverdue { missed }).await.is_err() {
                        return ConnectionEnd::Stop;
                    }
                }
                awaiting_pong = true;
                if let Err(e) = write.send(Message::Text(PING.into())).await {
                    log::warn!("Keepalive send failed: {e}");
                    return ConnectionEnd::Lost;
                }
            }

            msg = read.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    if events.send(TransportEvent::Frame(data.to_vec())).await.is_err() {
                        return ConnectionEnd::Stop;
                    }
                }
                Some(Ok(Message::Text(text))) => match Keepalive::parse(text.as_str()) {
                    Some(Keepalive::Pong) => {
                        awaiting_pong = false;
                        missed = 0;
                        if events.send(TransportEvent::Pong).await.is_err() {
                            return ConnectionEnd::Stop;
                        }
                    }
                    Some(Keepalive::Ping) => {
                        if write.send(Message::Text(PONG.into())).await.is_err() {
                            return ConnectionEnd::Lost;
                        }
                    }
                    None => log::debug!("Ignoring text frame ({} bytes)", text.len()),
                },
                Some(Ok(Message::Close(_))) | None => return ConnectionEnd::Lost,
                // Protocol-level ping/pong is answered by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("Read error: {e}");
                    return ConnectionEnd::Lost;
                }
            },
        }
    }
}

fn drain(outgoing: &mut mpsc::Receiver<Vec<u8>>) -> usize {
    let mut dropped = 0;
    while outgoing.try_recv().is_ok() {
        dropped += 1;
    }
    dropped
}
