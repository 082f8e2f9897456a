//! # ledwall-sync: network layer for the LED wall
//!
//! Keeps a local [`LedStore`](ledwall_core::LedStore) in step with a remote
//! LED device over HTTP (initial fetch) and a binary WebSocket stream.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   GET /leds        ┌──────────────┐
//! │ LedSession   │ ─────────────────► │ LedServer    │
//! │  ├ LedStore  │                    │  └ LedRepo   │
//! │  ├ SyncDriver│   WS /leds/ws      │  (authority) │
//! │  └ Transport │ ◄────────────────► │              │
//! └──────────────┘  snapshots ◄ / ► 5-byte updates
//! ```
//!
//! ## Modules
//!
//! - [`config`]: base URL, endpoint derivation, reconnect and retry policy
//! - [`api`]: HTTP client for `GET /leds`, `GET/POST /leds/{id}`
//! - [`transport`]: reconnecting WebSocket with keepalive
//! - [`driver`]: store ↔ transport glue (encode out, reconcile in)
//! - [`session`]: one task owning the store, driven by intents and events
//! - [`server`]: reference device server

pub mod api;
pub mod config;
pub mod driver;
pub mod server;
pub mod session;
pub mod transport;

pub use api::{ApiClient, ApiError, LedRecord};
pub use config::{ConfigError, ReconnectConfig, RetryConfig, SyncConfig, BASE_URL_ENV};
pub use driver::{DriverStats, PaintError, SyncDriver};
pub use server::{LedRepo, LedServer, RepoError, ServerConfig};
pub use session::{LedSession, SessionError, SessionHandle, SessionStatus};
pub use transport::{
    ConnectionState, FrameSink, Transport, TransportError, TransportEvent, TransportHandle,
    TransportOptions,
};
