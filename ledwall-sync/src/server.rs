//! Reference LED device server.
//!
//! Architecture:
//! ```text
//! GET  /api/leds ──────────┐
//! GET  /api/leds/{id} ─────┤
//! POST /api/leds/{id} ─────┼── LedRepo (generation, Vec<SnapshotEntry>)
//!                          │         │
//! WS   /api/leds/ws ◄──────┘         │ generation advanced?
//!   ├─ update frame → set            ▼
//!   ├─ "ping" → "pong"        snapshot frame every interval
//!   └─ snapshot on connect
//! ```
//!
//! The repo stamps writes with whole seconds, the resolution of the binary
//! snapshot, so the JSON and binary views of an LED always agree.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use chrono::SubsecRound;
use ledwall_core::codec::PONG;
use ledwall_core::{
    decode_update, encode_snapshot, Clock, Color, Keepalive, SnapshotEntry, SystemClock,
};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::time::{Instant, MissedTickBehavior};
use tower_http::cors::{Any, CorsLayer};

use crate::api::LedRecord;

/// Floor for the per-connection snapshot cadence.
pub const MIN_SNAPSHOT_INTERVAL_MS: u64 = 100;

/// Prefix every route is served under.
pub const API_PREFIX: &str = "/api";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Number of LEDs on the simulated device
    pub led_count: usize,
    /// Color every LED starts with
    pub default_color: Color,
    /// Snapshot cadence when the client does not ask for one
    pub snapshot_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            led_count: 250,
            default_color: Color::WHITE,
            snapshot_interval_ms: MIN_SNAPSHOT_INTERVAL_MS,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepoError {
    #[error("LED {index} is out of bounds (device has {len})")]
    OutOfBounds { index: usize, len: usize },
}

/// Authoritative LED state with a write generation.
#[derive(Clone)]
pub struct LedRepo(Arc<RepoInner>);

struct RepoInner {
    generation: AtomicU64,
    leds: RwLock<Vec<SnapshotEntry>>,
    clock: Arc<dyn Clock>,
}

impl LedRepo {
    pub fn new(colors: impl IntoIterator<Item = Color>, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now().trunc_subsecs(0);
        let leds = colors
            .into_iter()
            .map(|color| SnapshotEntry::new(color, now))
            .collect();
        Self(Arc::new(RepoInner {
            generation: AtomicU64::new(0),
            leds: RwLock::new(leds),
            clock,
        }))
    }

    pub async fn len(&self) -> usize {
        self.0.leds.read().await.len()
    }

    pub async fn get(&self, index: usize) -> Option<SnapshotEntry> {
        self.0.leds.read().await.get(index).copied()
    }

    /// Set one LED, stamp it with the current second and bump the generation.
    pub async fn set(&self, index: usize, color: Color) -> Result<SnapshotEntry, RepoError> {
        let mut leds = self.0.leds.write().await;
        let len = leds.len();
        let led = leds
            .get_mut(index)
            .ok_or(RepoError::OutOfBounds { index, len })?;

        *led = SnapshotEntry::new(color, self.0.clock.now().trunc_subsecs(0));
        let previous = self.0.generation.fetch_add(1, Ordering::AcqRel);
        log::trace!("LED {index} set to {color} (generation {})", previous + 1);
        Ok(*led)
    }

    pub fn generation(&self) -> u64 {
        self.0.generation.load(Ordering::Acquire)
    }

    /// Current state together with the generation it belongs to.
    pub async fn snapshot(&self) -> (u64, Vec<SnapshotEntry>) {
        let leds = self.0.leds.read().await;
        (self.generation(), leds.clone())
    }
}

/// Simulated LED device.
pub struct LedServer {
    config: ServerConfig,
    repo: LedRepo,
}

#[derive(Clone)]
struct AppState {
    repo: LedRepo,
    default_interval_ms: u64,
}

impl LedServer {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: ServerConfig, clock: Arc<dyn Clock>) -> Self {
        let repo = LedRepo::new(vec![config.default_color; config.led_count], clock);
        Self { config, repo }
    }

    pub fn repo(&self) -> &LedRepo {
        &self.repo
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            repo: self.repo.clone(),
            default_interval_ms: self.config.snapshot_interval_ms,
        };

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let api = Router::new()
            .route("/leds", get(list_leds))
            .route("/leds/ws", get(stream))
            .route("/leds/{id}", get(get_led).post(set_led))
            .with_state(state);

        Router::new().nest(API_PREFIX, api).layer(cors)
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve_with_shutdown(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            log::info!(
                "LED server listening on {addr} ({} LEDs, snapshot every {}ms)",
                self.config.led_count,
                self.config.snapshot_interval_ms
            );
        }
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
    }

    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Bind `config.bind_addr` and serve forever.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }
}

#[derive(Error, Debug)]
enum RouteError {
    #[error("LED {0} does not exist")]
    NotFound(usize),
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()).into_response(),
        }
    }
}

impl From<RepoError> for RouteError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::OutOfBounds { index, .. } => Self::NotFound(index),
        }
    }
}

async fn list_leds(State(state): State<AppState>) -> Json<Vec<LedRecord>> {
    let (_, leds) = state.repo.snapshot().await;
    Json(leds.into_iter().map(LedRecord::from).collect())
}

async fn get_led(
    State(state): State<AppState>,
    Path(id): Path<usize>,
) -> Result<Json<LedRecord>, RouteError> {
    let led = state.repo.get(id).await.ok_or(RouteError::NotFound(id))?;
    Ok(Json(led.into()))
}

async fn set_led(
    State(state): State<AppState>,
    Path(id): Path<usize>,
    Form(color): Form<Color>,
) -> Result<Json<LedRecord>, RouteError> {
    let led = state.repo.set(id, color).await?;
    Ok(Json(led.into()))
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    snapshot_interval: Option<u64>,
}

async fn stream(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let interval_ms = params
        .snapshot_interval
        .unwrap_or(state.default_interval_ms)
        .max(MIN_SNAPSHOT_INTERVAL_MS);
    ws.on_upgrade(move |socket| handle_socket(socket, state.repo, Duration::from_millis(interval_ms)))
}

async fn handle_socket(mut socket: WebSocket, repo: LedRepo, interval: Duration) {
    log::info!("Stream client connected (snapshot every {}ms)", interval.as_millis());

    let (mut sent_generation, leds) = repo.snapshot().await;
    if socket
        .send(Message::Binary(encode_snapshot(&leds).into()))
        .await
        .is_err()
    {
        return;
    }

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if repo.generation() == sent_generation {
                    continue;
                }
                let (generation, leds) = repo.snapshot().await;
                sent_generation = generation;
                if socket.send(Message::Binary(encode_snapshot(&leds).into())).await.is_err() {
                    break;
                }
            }

            msg = socket.recv() => match msg {
                Some(Ok(Message::Binary(data))) => match decode_update(&data) {
                    Ok(update) => {
                        if let Err(e) = repo.set(usize::from(update.index), update.color).await {
                            log::warn!("Rejected update: {e}");
                        }
                    }
                    Err(e) => log::warn!("Ignoring malformed update: {e}"),
                },
                Some(Ok(Message::Text(text))) => {
                    if matches!(Keepalive::parse(text.as_str()), Some(Keepalive::Ping))
                        && socket.send(Message::Text(PONG.into())).await.is_err()
                    {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::debug!("Stream receive error: {e}");
                    break;
                }
            },
        }
    }

    log::info!("Stream client disconnected");
}
