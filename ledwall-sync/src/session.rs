//! One live LED session: initial fetch, then a stream kept in sync.
//!
//! A single task owns the [`LedStore`]. Paint intents from any number of
//! [`SessionHandle`]s and events from the [`Transport`] are processed one at
//! a time in arrival order, and the LED list is republished on a watch
//! channel after every change.

use std::sync::Arc;

use ledwall_core::{Clock, Color, Led, LedStore, SnapshotEntry};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::api::ApiClient;
use crate::config::{ConfigError, SyncConfig};
use crate::driver::{PaintError, SyncDriver};
use crate::transport::{Transport, TransportEvent, TransportOptions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Initial fetch in flight
    Loading,
    /// Fetched; waiting for the stream
    Connecting,
    Connected,
    /// Stream lost; reconnecting in the background
    Disconnected,
    /// Initial fetch failed. Terminal.
    FetchFailed(String),
    /// Closed by the caller or the transport gave up. Terminal.
    Closed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FetchFailed(_) | Self::Closed)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session is closed")]
    Closed,
    #[error(transparent)]
    Paint(#[from] PaintError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

enum Intent {
    Paint {
        index: usize,
        color: Color,
        reply: oneshot::Sender<Result<bool, PaintError>>,
    },
}

impl std::fmt::Debug for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paint { index, color, .. } => write!(f, "Paint({index}, {color})"),
        }
    }
}

/// Cloneable control surface for a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    intents: mpsc::Sender<Intent>,
    leds: watch::Receiver<Vec<Led>>,
    status: watch::Receiver<SessionStatus>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl SessionHandle {
    /// Paint one LED. Resolves once the store has applied it; the update
    /// frame has been handed to the transport by then (or dropped if the
    /// stream is down).
    pub async fn paint(&self, index: usize, color: Color) -> Result<bool, SessionError> {
        let (reply, response) = oneshot::channel();
        self.intents
            .send(Intent::Paint { index, color, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        Ok(response.await.map_err(|_| SessionError::Closed)??)
    }

    /// The reactive LED list.
    pub fn leds(&self) -> watch::Receiver<Vec<Led>> {
        self.leds.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Wait for a terminal status.
    pub async fn finished(&self) -> SessionStatus {
        let mut status = self.status.clone();
        let terminal = match status.wait_for(SessionStatus::is_terminal).await {
            Ok(terminal) => terminal.clone(),
            Err(_) => SessionStatus::Closed,
        };
        terminal
    }
}

pub struct LedSession {
    handle: SessionHandle,
    task: JoinHandle<()>,
}

impl LedSession {
    /// Start a session with an empty store on `clock`.
    pub fn start(config: SyncConfig, clock: Arc<dyn Clock>) -> Result<Self, SessionError> {
        let api = ApiClient::from_config(&config);
        Self::start_with(config, api, LedStore::new(clock))
    }

    pub fn start_with(config: SyncConfig, api: ApiClient, store: LedStore) -> Result<Self, SessionError> {
        let stream_url = config.stream_url()?;
        let (intent_tx, intent_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (leds_tx, leds_rx) = watch::channel(store.snapshot().to_vec());
        let (status_tx, status_rx) = watch::channel(SessionStatus::Loading);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_session(SessionTask {
            config,
            api,
            store,
            stream_url: stream_url.to_string(),
            intents: intent_rx,
            leds: leds_tx,
            status: status_tx,
            shutdown: shutdown_rx,
        }));

        Ok(Self {
            handle: SessionHandle {
                intents: intent_tx,
                leds: leds_rx,
                status: status_rx,
                shutdown: Arc::new(shutdown_tx),
            },
            task,
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Close and wait for the session task to finish.
    pub async fn shutdown(self) {
        self.handle.close();
        if let Err(e) = self.task.await {
            log::error!("Session task failed: {e}");
        }
    }

    /// Wait for the session to end on its own.
    pub async fn join(self) -> SessionStatus {
        if let Err(e) = self.task.await {
            log::error!("Session task failed: {e}");
        }
        self.handle.status()
    }
}

struct SessionTask {
    config: SyncConfig,
    api: ApiClient,
    store: LedStore,
    stream_url: String,
    intents: mpsc::Receiver<Intent>,
    leds: watch::Sender<Vec<Led>>,
    status: watch::Sender<SessionStatus>,
    shutdown: watch::Receiver<bool>,
}

impl SessionTask {
    fn publish(&self) {
        let current = self.store.snapshot();
        self.leds.send_if_modified(|published| {
            if published.as_slice() == current {
                return false;
            }
            *published = current.to_vec();
            true
        });
    }

    fn set_status(&self, status: SessionStatus) {
        log::debug!("Session status: {status:?}");
        self.status.send_replace(status);
    }
}

async fn run_session(mut task: SessionTask) {
    let fetched = tokio::select! {
        result = task.api.fetch_leds_with_retry(&task.config.fetch_retry) => result,
        _ = task.shutdown.changed() => {
            task.set_status(SessionStatus::Closed);
            return;
        }
    };

    // The caller may have closed while the fetch was resolving.
    if *task.shutdown.borrow() {
        task.set_status(SessionStatus::Closed);
        return;
    }

    let records = match fetched {
        Ok(records) => records,
        Err(e) => {
            log::error!("Initial LED fetch failed: {e}");
            task.set_status(SessionStatus::FetchFailed(e.to_string()));
            return;
        }
    };

    log::info!("Fetched {} LEDs from {}", records.len(), task.api.base_url());
    task.store.populate(records.into_iter().map(SnapshotEntry::from));
    task.publish();
    task.set_status(SessionStatus::Connecting);

    let mut transport = Transport::connect(task.stream_url.clone(), TransportOptions::from(&task.config));
    let Some(mut events) = transport.take_event_rx() else {
        transport.shutdown().await;
        task.set_status(SessionStatus::Closed);
        return;
    };
    let driver = SyncDriver::attach(&mut task.store, transport.handle());

    loop {
        tokio::select! {
            _ = task.shutdown.changed() => break,

            intent = task.intents.recv() => match intent {
                Some(Intent::Paint { index, color, reply }) => {
                    let result = driver.paint(&mut task.store, index, color);
                    if let Err(e) = &result {
                        log::warn!("Paint of LED {index} rejected: {e}");
                    }
                    task.publish();
                    let _ = reply.send(result);
                }
                None => break,
            },

            event = events.recv() => match event {
                Some(TransportEvent::Frame(frame)) => {
                    if driver.handle_frame(&mut task.store, &frame).is_ok() {
                        task.publish();
                    }
                }
                Some(TransportEvent::Connected) => task.set_status(SessionStatus::Connected),
                Some(TransportEvent::Disconnected) => task.set_status(SessionStatus::Disconnected),
                Some(TransportEvent::Pong) => log::trace!("Pong"),
                Some(TransportEvent::PongOverdue { missed }) => {
                    log::warn!("Device has not answered {missed} keepalive pings");
                }
                None => break,
            },
        }
    }

    let stats = driver.detach(&mut task.store);
    log::info!("Session closing: {} updates sent, {} dropped", stats.sent, stats.dropped);
    transport.shutdown().await;
    task.set_status(SessionStatus::Closed);
}
