//! In-memory TTL cache for per-animal lookups.
//!
//! The ingest pipeline reads the pregnancy record for an animal on every
//! batch; the record changes on a veterinary timescale, so a short TTL
//! avoids a relational query per batch without serving stale state for long.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// TTL cache keyed by animal id, holding one clonable value per key.
pub struct TtlCache<T: Clone> {
    entries: HashMap<String, (T, Instant)>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Returns the cached value only when still within TTL.
    pub fn get(&self, key: &str) -> Option<T> {
        match self.entries.get(key) {
            Some((value, cached_at)) if cached_at.elapsed() <= self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), (value, Instant::now()));
    }

    pub fn invalidate(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
