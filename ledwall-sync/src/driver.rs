//! Glue between a [`LedStore`] and a frame sink.
//!
//! Outbound: every effective local paint is encoded as a 5-byte update and
//! handed to the sink. Inbound: binary frames are decoded as snapshots and
//! reconciled into the store. Because the store only notifies on local
//! paints, remote state is never echoed back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ledwall_core::{
    decode_snapshot, encode_update, CodecError, Color, LedStore, ReconcileReport, StoreError,
    SubscriptionId,
};
use thiserror::Error;

use crate::transport::FrameSink;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaintError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Outbound frame counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub sent: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug)]
pub struct SyncDriver {
    subscription: SubscriptionId,
    counters: Arc<Counters>,
}

impl SyncDriver {
    /// Subscribe to `store` and forward local paints to `sink`.
    pub fn attach<S: FrameSink + 'static>(store: &mut LedStore, sink: S) -> Self {
        let counters = Arc::new(Counters::default());
        let listener_counters = Arc::clone(&counters);

        let subscription = store.subscribe(move |index, color| {
            let frame = match encode_update(index, color) {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("Not sending update for LED {index}: {e}");
                    listener_counters.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            };
            match sink.send_frame(frame.to_vec()) {
                Ok(()) => {
                    listener_counters.sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    log::debug!("Dropped update for LED {index}: {e}");
                    listener_counters.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        Self {
            subscription,
            counters,
        }
    }

    /// Paint one LED locally. The index is checked against the wire format
    /// first so an unsendable paint never reaches the store.
    pub fn paint(&self, store: &mut LedStore, index: usize, color: Color) -> Result<bool, PaintError> {
        encode_update(index, color)?;
        Ok(store.apply_local_paint(index, color)?)
    }

    /// Decode one inbound binary frame and reconcile it. A malformed frame
    /// leaves the store untouched.
    pub fn handle_frame(&self, store: &mut LedStore, frame: &[u8]) -> Result<ReconcileReport, CodecError> {
        let entries = decode_snapshot(frame).inspect_err(|e| {
            log::warn!("Discarding malformed snapshot: {e}");
        })?;
        let report = store.apply_remote_snapshot(&entries);
        log::trace!(
            "Snapshot applied: {} replaced, {} kept local",
            report.replaced,
            report.kept_local
        );
        Ok(report)
    }

    pub fn stats(&self) -> DriverStats {
        DriverStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop forwarding local paints.
    pub fn detach(self, store: &mut LedStore) -> DriverStats {
        store.unsubscribe(self.subscription);
        self.stats()
    }
}
