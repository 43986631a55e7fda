//! Bounded window of recently delivered row changes.
//!
//! The feed is at-least-once. Replays of a byte-identical change are dropped
//! here; anything that slips past (older than the window) is still absorbed
//! by the id-keyed merges downstream.

use std::collections::{HashSet, VecDeque};

use crate::feed::RowChange;

/// Default number of fingerprints remembered per subscription.
pub const DEFAULT_DEDUP_WINDOW: usize = 256;

#[derive(Debug)]
pub struct DedupWindow {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Record `change`; returns false if an identical change is already in
    /// the window.
    pub fn first_sighting(&mut self, change: &RowChange) -> bool {
        if self.capacity == 0 {
            return true;
        }
        let fingerprint = change.fingerprint();
        if self.seen.contains(&fingerprint) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(fingerprint.clone());
        self.order.push_back(fingerprint);
        true
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}
