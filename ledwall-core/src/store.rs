//! The LED state store.
//!
//! `LedStore` is the single owner of the current LED colors. It is mutated
//! through exactly two entry points:
//!
//! - [`LedStore::apply_local_paint`]: optimistic local write, stamped with
//!   the store clock, announced synchronously to subscribers
//! - [`LedStore::apply_remote_snapshot`]: authoritative device state,
//!   merged per LED with [`remote_wins`], never announced
//!
//! Subscribers therefore only ever see local-origin changes, which is what
//! keeps remote state from being echoed back onto the wire.
//!
//! The LED count is fixed once the store has been initialized or populated.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::clock::{Clock, SystemClock, Timestamp};
use crate::codec::SnapshotEntry;
use crate::color::Color;
use crate::reconcile::{remote_wins, ReconcileReport};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("LED {index} is out of bounds (store holds {len})")]
    OutOfBounds { index: usize, len: usize },
    #[error("LED store has not been initialized")]
    Uninitialized,
}

/// Which side produced an LED's current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateSource {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Led {
    pub color: Color,
    pub last_update: Timestamp,
    pub source: UpdateSource,
}

impl Led {
    fn remote(entry: &SnapshotEntry) -> Self {
        Self {
            color: entry.color,
            last_update: entry.timestamp,
            source: UpdateSource::Remote,
        }
    }
}

/// Handle returned by [`LedStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Called with `(index, color)` after every effective local paint.
pub type Listener = Box<dyn FnMut(usize, Color) + Send>;

pub struct LedStore {
    leds: Vec<Led>,
    initialized: bool,
    /// Kept in registration order.
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
    clock: Arc<dyn Clock>,
}

impl Default for LedStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl fmt::Debug for LedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedStore")
            .field("len", &self.leds.len())
            .field("initialized", &self.initialized)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl LedStore {
    /// An empty store. It takes its size from the first `initialize`,
    /// `populate` or remote snapshot.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            leds: Vec::new(),
            initialized: false,
            listeners: Vec::new(),
            next_subscription: 0,
            clock,
        }
    }

    /// A store pre-filled with a local palette.
    pub fn with_colors(colors: impl IntoIterator<Item = Color>, clock: Arc<dyn Clock>) -> Self {
        let mut store = Self::new(clock);
        store.initialize(colors);
        store
    }

    /// Set every LED with source `Local` and the current time.
    ///
    /// Meant to run once per session. A second call overwrites everything.
    pub fn initialize(&mut self, colors: impl IntoIterator<Item = Color>) {
        if self.initialized {
            log::warn!("LED store initialized twice, overwriting {} LEDs", self.leds.len());
        }
        let now = self.clock.now();
        self.leds = colors
            .into_iter()
            .map(|color| Led {
                color,
                last_update: now,
                source: UpdateSource::Local,
            })
            .collect();
        self.initialized = true;
    }

    /// Adopt a full remote state (the initial fetch) with source `Remote`.
    pub fn populate(&mut self, entries: impl IntoIterator<Item = SnapshotEntry>) {
        if self.initialized {
            log::warn!("Repopulating an initialized LED store");
        }
        self.leds = entries.into_iter().map(|entry| Led::remote(&entry)).collect();
        self.initialized = true;
    }

    /// Whether `initialize`, `populate` or a first snapshot has run.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Number of LEDs.
    pub fn len(&self) -> usize {
        self.leds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leds.is_empty()
    }

    /// The LED at `index`, if in range.
    pub fn get(&self, index: usize) -> Option<&Led> {
        self.leds.get(index)
    }

    /// Read-only view for rendering.
    pub fn snapshot(&self) -> &[Led] {
        &self.leds
    }

    /// Current colors in index order.
    pub fn colors(&self) -> Vec<Color> {
        self.leds.iter().map(|led| led.color).collect()
    }

    /// Optimistically paint one LED.
    ///
    /// Returns `Ok(false)` when the LED already shows `color`: nothing is
    /// stamped and no subscriber runs. Otherwise every subscriber is called,
    /// in registration order, before this returns.
    pub fn apply_local_paint(&mut self, index: usize, color: Color) -> Result<bool, StoreError> {
        if !self.initialized {
            return Err(StoreError::Uninitialized);
        }
        let len = self.leds.len();
        let led = self
            .leds
            .get_mut(index)
            .ok_or(StoreError::OutOfBounds { index, len })?;

        if led.color == color {
            return Ok(false);
        }

        *led = Led {
            color,
            last_update: self.clock.now(),
            source: UpdateSource::Local,
        };

        for (_, listener) in self.listeners.iter_mut() {
            listener(index, color);
        }
        Ok(true)
    }

    /// Merge a remote snapshot.
    ///
    /// Only the overlapping prefix is considered: LEDs past the end of
    /// `entries` are left alone and entries past the end of the store are
    /// counted as ignored. An uninitialized store adopts the snapshot as is.
    /// Subscribers are never called from here.
    pub fn apply_remote_snapshot(&mut self, entries: &[SnapshotEntry]) -> ReconcileReport {
        if !self.initialized {
            self.populate(entries.iter().copied());
            return ReconcileReport {
                replaced: entries.len(),
                ..ReconcileReport::default()
            };
        }

        let now = self.clock.now();
        let mut report = ReconcileReport {
            ignored: entries.len().saturating_sub(self.leds.len()),
            ..ReconcileReport::default()
        };

        for (led, entry) in self.leds.iter_mut().zip(entries) {
            if !remote_wins(led, entry, now) {
                report.kept_local += 1;
                continue;
            }
            if led.color == entry.color {
                report.unchanged += 1;
            } else {
                report.replaced += 1;
            }
            *led = Led::remote(entry);
        }

        if report.ignored > 0 {
            log::debug!(
                "Ignored {} remote LEDs beyond store length {}",
                report.ignored,
                self.leds.len()
            );
        }
        report
    }

    /// Register a local-change listener.
    pub fn subscribe(&mut self, listener: impl FnMut(usize, Color) + Send + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(registered, _)| *registered != id);
        self.listeners.len() != before
    }

    /// Number of registered listeners.
    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeDelta;
    use std::sync::Mutex;

    const RED: Color = Color::rgb(255, 0, 0);
    const BLUE: Color = Color::rgb(0, 0, 255);

    fn white_store(len: usize) -> (LedStore, ManualClock) {
        let clock = ManualClock::starting_now();
        let store = LedStore::with_colors(vec![Color::WHITE; len], Arc::new(clock.clone()));
        (store, clock)
    }

    fn recorder(store: &mut LedStore) -> (SubscriptionId, Arc<Mutex<Vec<(usize, Color)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = store.subscribe(move |index, color| sink.lock().unwrap().push((index, color)));
        (id, seen)
    }

    #[test]
    fn test_initialize_sets_local_source_and_now() {
        let (store, clock) = white_store(3);
        assert_eq!(store.len(), 3);
        for led in store.snapshot() {
            assert_eq!(led.color, Color::WHITE);
            assert_eq!(led.source, UpdateSource::Local);
            assert_eq!(led.last_update, clock.now());
        }
    }

    #[test]
    fn test_reinitialize_overwrites() {
        let (mut store, _) = white_store(3);
        store.initialize(vec![RED; 2]);
        assert_eq!(store.colors(), vec![RED, RED]);
    }

    #[test]
    fn test_local_paint_notifies_and_stamps() {
        let (mut store, clock) = white_store(3);
        let (_, seen) = recorder(&mut store);
        clock.advance_millis(250);

        assert_eq!(store.apply_local_paint(1, RED), Ok(true));

        let led = store.get(1).unwrap();
        assert_eq!(led.color.to_hex(), "#ff0000");
        assert_eq!(led.last_update, clock.now());
        assert_eq!(led.source, UpdateSource::Local);
        assert_eq!(store.get(0).unwrap().color, Color::WHITE);
        assert_eq!(store.get(2).unwrap().color, Color::WHITE);
        assert_eq!(*seen.lock().unwrap(), vec![(1, RED)]);
    }

    #[test]
    fn test_same_color_paint_is_noop() {
        let (mut store, clock) = white_store(3);
        let (_, seen) = recorder(&mut store);
        let before = store.get(0).unwrap().last_update;
        clock.advance_millis(5000);

        assert_eq!(store.apply_local_paint(0, Color::rgba(255, 255, 255, 0.3)), Ok(false));
        assert_eq!(store.get(0).unwrap().last_update, before);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_paint_out_of_bounds() {
        let (mut store, _) = white_store(2);
        assert_eq!(
            store.apply_local_paint(2, RED),
            Err(StoreError::OutOfBounds { index: 2, len: 2 })
        );
        assert_eq!(store.colors(), vec![Color::WHITE; 2]);
    }

    #[test]
    fn test_paint_before_initialization() {
        let mut store = LedStore::default();
        assert_eq!(store.apply_local_paint(0, RED), Err(StoreError::Uninitialized));
    }

    #[test]
    fn test_listeners_called_in_registration_order() {
        let (mut store, _) = white_store(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            store.subscribe(move |_, _| order.lock().unwrap().push(tag));
        }
        store.apply_local_paint(0, RED).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unsubscribe() {
        let (mut store, _) = white_store(1);
        let (id, seen) = recorder(&mut store);
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        assert_eq!(store.subscriber_count(), 0);

        store.apply_local_paint(0, RED).unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_remote_snapshot_never_notifies() {
        let (mut store, clock) = white_store(3);
        let (_, seen) = recorder(&mut store);
        let later = clock.now() + TimeDelta::seconds(10);

        let report = store.apply_remote_snapshot(&[
            SnapshotEntry::new(BLUE, later),
            SnapshotEntry::new(RED, later),
            SnapshotEntry::new(Color::WHITE, later),
        ]);

        assert_eq!(report.replaced, 2);
        assert_eq!(report.unchanged, 1);
        assert_eq!(store.colors(), vec![BLUE, RED, Color::WHITE]);
        assert!(store.snapshot().iter().all(|led| led.source == UpdateSource::Remote));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_local_paint_survives_stale_snapshot_within_grace() {
        let (mut store, clock) = white_store(3);
        store.apply_local_paint(1, RED).unwrap();
        let stale = clock.now() - TimeDelta::seconds(2);

        let report = store.apply_remote_snapshot(&[
            SnapshotEntry::new(Color::WHITE, stale),
            SnapshotEntry::new(BLUE, stale),
            SnapshotEntry::new(Color::WHITE, stale),
        ]);

        assert_eq!(store.get(1).unwrap().color, RED);
        assert_eq!(report.kept_local, 3);
    }

    #[test]
    fn test_stale_local_paint_yields_after_grace() {
        let (mut store, clock) = white_store(3);
        store.apply_local_paint(1, RED).unwrap();
        let stale = clock.now() - TimeDelta::seconds(2);
        clock.advance_millis(1200);

        let report = store.apply_remote_snapshot(&[
            SnapshotEntry::new(Color::WHITE, stale),
            SnapshotEntry::new(BLUE, stale),
            SnapshotEntry::new(Color::WHITE, stale),
        ]);

        assert_eq!(store.get(1).unwrap().color, BLUE);
        assert_eq!(store.get(1).unwrap().source, UpdateSource::Remote);
        assert_eq!(report.replaced, 1);
        assert_eq!(report.unchanged, 2);
    }

    #[test]
    fn test_short_snapshot_updates_prefix_only() {
        let (mut store, clock) = white_store(4);
        let later = clock.now() + TimeDelta::seconds(1);

        let report = store.apply_remote_snapshot(&[
            SnapshotEntry::new(RED, later),
            SnapshotEntry::new(RED, later),
        ]);

        assert_eq!(store.len(), 4);
        assert_eq!(store.colors(), vec![RED, RED, Color::WHITE, Color::WHITE]);
        assert_eq!(store.get(3).unwrap().source, UpdateSource::Local);
        assert_eq!(report.replaced, 2);
    }

    #[test]
    fn test_long_snapshot_does_not_grow_store() {
        let (mut store, clock) = white_store(1);
        let later = clock.now() + TimeDelta::seconds(1);

        let report = store.apply_remote_snapshot(&[
            SnapshotEntry::new(RED, later),
            SnapshotEntry::new(BLUE, later),
            SnapshotEntry::new(BLUE, later),
        ]);

        assert_eq!(store.len(), 1);
        assert_eq!(report.ignored, 2);
        assert_eq!(report.total(), 3);
    }

    #[test]
    fn test_uninitialized_store_adopts_first_snapshot() {
        let clock = ManualClock::starting_now();
        let mut store = LedStore::new(Arc::new(clock.clone()));
        let ts = clock.now() - TimeDelta::days(1);

        let report = store.apply_remote_snapshot(&[
            SnapshotEntry::new(RED, ts),
            SnapshotEntry::new(BLUE, ts),
        ]);

        assert!(store.is_initialized());
        assert_eq!(store.colors(), vec![RED, BLUE]);
        assert_eq!(report.replaced, 2);
    }

    #[test]
    fn test_populate_marks_remote() {
        let mut store = LedStore::default();
        let ts = chrono::DateTime::from_timestamp(100, 0).unwrap();
        store.populate(vec![SnapshotEntry::new(RED, ts)]);

        let led = store.get(0).unwrap();
        assert_eq!(led.source, UpdateSource::Remote);
        assert_eq!(led.last_update, ts);
    }
}
