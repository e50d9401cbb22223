//! Latest price per instrument.
//!
//! Readers take an `Arc<PriceSnapshot>` and keep it as long as they like;
//! the writer swaps in a new snapshot (copy-on-write) so a reader never
//! observes a half-applied frame.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use quotewire_ws::PriceUpdate;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable view of all known prices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSnapshot {
    prices: HashMap<String, f64>,
    last_updated: Option<DateTime<Utc>>,
    /// Incremented on every applied frame.
    version: u64,
}

impl PriceSnapshot {
    pub fn get(&self, instrument: &str) -> Option<f64> {
        self.prices.get(instrument).copied()
    }

    pub fn contains(&self, instrument: &str) -> bool {
        self.prices.contains_key(instrument)
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.prices.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn prices(&self) -> &HashMap<String, f64> {
        &self.prices
    }

    /// Time the last frame was merged, `None` before the first one.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn merge(&mut self, update: &PriceUpdate, at: DateTime<Utc>) {
        for (instrument, price) in update.iter() {
            self.prices.insert(instrument.to_string(), price);
        }
        self.last_updated = Some(at);
        self.version += 1;
    }
}

/// Shared handle to the price snapshot. Cheap to clone.
///
/// Only the feed session writes; everything else reads.
#[derive(Debug, Clone, Default)]
pub struct PriceStore {
    current: Arc<RwLock<Arc<PriceSnapshot>>>,
}

impl PriceStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Current snapshot. Stays valid (and unchanged) after later updates.
    pub fn snapshot(&self) -> Arc<PriceSnapshot> {
        self.current.read().clone()
    }

    pub fn get(&self, instrument: &str) -> Option<f64> {
        self.current.read().get(instrument)
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.current.read().last_updated()
    }

    /// Merge one frame. Empty frames leave the snapshot untouched.
    ///
    /// Returns true if the snapshot changed.
    pub(crate) fn apply(&self, update: &PriceUpdate) -> bool {
        self.apply_at(update, Utc::now())
    }

    pub(crate) fn apply_at(&self, update: &PriceUpdate, at: DateTime<Utc>) -> bool {
        if update.is_empty() {
            return false;
        }
        let mut current = self.current.write();
        // Clones only when a reader still holds the previous snapshot.
        Arc::make_mut(&mut *current).merge(update, at);
        true
    }
}
