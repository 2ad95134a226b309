//! Window of recently accepted bet ids.
//!
//! Cleared wholesale once it grows past a high-water mark. The window
//! only covers in-flight redeliveries, not history.

use std::collections::HashSet;
use tracing::info;

pub const DEFAULT_HIGH_WATER: usize = 10_000;

#[derive(Debug)]
pub struct DedupWindow {
    seen: HashSet<String>,
    high_water: usize,
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_WATER)
    }
}

impl DedupWindow {
    pub fn new(high_water: usize) -> Self {
        Self {
            seen: HashSet::new(),
            high_water,
        }
    }

    pub fn is_duplicate(&self, bet_id: &str) -> bool {
        self.seen.contains(bet_id)
    }

    /// Record an accepted id. Returns false if it was already present.
    pub fn mark_seen(&mut self, bet_id: &str) -> bool {
        self.seen.insert(bet_id.to_string())
    }

    /// Clear the window if it has grown past the high-water mark.
    /// Returns the number of ids dropped.
    pub fn truncate_if_over(&mut self) -> usize {
        if self.seen.len() <= self.high_water {
            return 0;
        }
        let dropped = self.seen.len();
        self.seen.clear();
        info!(dropped, high_water = self.high_water, "Cleared dedup window");
        dropped
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
