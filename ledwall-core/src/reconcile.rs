//! Last-writer-wins with a local-write grace period.
//!
//! For a stored LED `(old_color, old_ts, old_source)` and an incoming remote
//! record `(new_color, new_ts)`:
//!
//! 1. `new_ts >= old_ts`: the remote record replaces the local one.
//! 2. Otherwise, if the stored write is local and older than
//!    [`LOCAL_WRITE_GRACE`], the remote record replaces it anyway. A local
//!    write the device never confirmed must not block sync forever.
//! 3. Otherwise the local record stays.
//!
//! Both sides use wall-clock time and the two clocks are not assumed to be
//! in sync below a second.

use chrono::TimeDelta;

use crate::clock::Timestamp;
use crate::codec::SnapshotEntry;
use crate::store::{Led, UpdateSource};

pub const LOCAL_WRITE_GRACE: TimeDelta = TimeDelta::milliseconds(1000);

/// Decide whether `remote` should overwrite `local` at time `now`.
pub fn remote_wins(local: &Led, remote: &SnapshotEntry, now: Timestamp) -> bool {
    if remote.timestamp >= local.last_update {
        return true;
    }

    local.source == UpdateSource::Local && now - local.last_update > LOCAL_WRITE_GRACE
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// LEDs whose color changed to the remote value.
    pub replaced: usize,
    /// LEDs where the remote record won but carried the same color.
    pub unchanged: usize,
    /// LEDs where the local record survived.
    pub kept_local: usize,
    /// Remote records beyond the store's length.
    pub ignored: usize,
}

impl ReconcileReport {
    pub fn total(&self) -> usize {
        self.replaced + self.unchanged + self.kept_local + self.ignored
    }
}
