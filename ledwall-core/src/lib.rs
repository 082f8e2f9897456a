//! # ledwall-core: LED state synchronization core
//!
//! Runtime-free building blocks shared by the sync client and the device
//! server:
//!
//! - [`color`]: immutable RGB value, hex and lightness
//! - [`codec`]: bit-exact snapshot / update wire frames
//! - [`store`]: LED table with optimistic local writes
//! - [`reconcile`]: last-writer-wins rule with a local grace period
//! - [`clock`]: wall-clock abstraction for deterministic tests
//!
//! ```text
//! paint intent ──► LedStore ──► listeners ──► encode_update ──► wire
//! wire ──► decode_snapshot ──► LedStore::apply_remote_snapshot ──► UI
//! ```

pub mod clock;
pub mod codec;
pub mod color;
pub mod reconcile;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use codec::{
    decode_snapshot, decode_update, encode_snapshot, encode_update, CodecError, Keepalive,
    SnapshotEntry, UpdateFrame,
};
pub use color::{Color, ColorError};
pub use reconcile::{remote_wins, ReconcileReport, LOCAL_WRITE_GRACE};
pub use store::{Led, LedStore, StoreError, SubscriptionId, UpdateSource};
