//! Outstanding misses of one cache.
//!
//! A line is registered when it first misses and removed when the timing
//! model services it. Further misses to a line already in flight coalesce
//! into the existing entry.

use std::collections::HashMap;

/// One line being fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlightMiss {
    /// Line address.
    pub line: u64,
    /// Any coalesced request was a store.
    pub is_store: bool,
    /// Requests merged into this fetch, including the first.
    pub requests: u32,
}

/// Set of lines currently being fetched.
#[derive(Debug, Clone, Default)]
pub struct MissRegistry {
    in_flight: HashMap<u64, InFlightMiss>,
    stores: usize,
}

impl MissRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a miss on `line`.
    ///
    /// Returns true if a new fetch was created, false if the miss coalesced
    /// with one already in flight.
    pub fn register_miss(&mut self, line: u64, is_store: bool) -> bool {
        match self.in_flight.get_mut(&line) {
            Some(entry) => {
                entry.requests += 1;
                if is_store && !entry.is_store {
                    entry.is_store = true;
                    self.stores += 1;
                }
                false
            }
            None => {
                self.in_flight.insert(
                    line,
                    InFlightMiss {
                        line,
                        is_store,
                        requests: 1,
                    },
                );
                if is_store {
                    self.stores += 1;
                }
                true
            }
        }
    }

    /// Remove the entry for `line`. Returns `None` if it is not in flight.
    pub fn resolve_miss(&mut self, line: u64) -> Option<InFlightMiss> {
        let entry = self.in_flight.remove(&line)?;
        if entry.is_store {
            self.stores -= 1;
        }
        Some(entry)
    }

    /// Whether `line` is being fetched.
    pub fn contains(&self, line: u64) -> bool {
        self.in_flight.contains_key(&line)
    }

    /// Number of lines in flight.
    pub fn count_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of in-flight lines with at least one store.
    pub fn count_in_flight_stores(&self) -> usize {
        self.stores
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.in_flight.clear();
        self.stores = 0;
    }
}
