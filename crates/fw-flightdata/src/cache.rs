//! In-process flight-status cache.
//!
//! Keyed by `(flight_number, local_date)` with TTL invalidation. This is
//! the only shared mutable state in the system, guarded by a
//! reader/writer lock. Counters feed the provider-usage report.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use parking_lot::RwLock;

use crate::FlightObservation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    pub saved_calls: u64,
}

struct CachedEntry {
    observation: Option<FlightObservation>,
    fetched_at: Instant,
}

pub struct FlightStatusCache {
    ttl: Duration,
    entries: RwLock<HashMap<(String, NaiveDate), CachedEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    saved_calls: AtomicU64,
}

impl FlightStatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            saved_calls: AtomicU64::new(0),
        }
    }

    /// Fresh cached value for the key. The outer `Option` is hit/miss, the
    /// inner one is the cached provider answer (which may itself be "no
    /// such flight yet").
    pub fn get(
        &self,
        flight_number: &str,
        local_date: NaiveDate,
    ) -> Option<Option<FlightObservation>> {
        let key = (flight_number.to_string(), local_date);
        let entries = self.entries.read();
        match entries.get(&key) {
            Some(entry) if entry.fetched_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.saved_calls.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("flightdata.cache.hits_total").increment(1);
                Some(entry.observation.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("flightdata.cache.misses_total").increment(1);
                None
            }
        }
    }

    pub fn insert(
        &self,
        flight_number: &str,
        local_date: NaiveDate,
        observation: Option<FlightObservation>,
    ) {
        let key = (flight_number.to_string(), local_date);
        let mut entries = self.entries.write();
        entries.insert(
            key,
            CachedEntry {
                observation,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Drop expired entries; returns how many were evicted.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.fetched_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn counters(&self) -> CacheCounters {
        CacheCounters {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            saved_calls: self.saved_calls.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(status: &str) -> FlightObservation {
        FlightObservation {
            ident: "AR1140".to_string(),
            status: status.to_string(),
            gate_origin: None,
            gate_destination: None,
            estimated_out: None,
            actual_out: None,
            estimated_in: None,
            actual_in: None,
            raw: serde_json::Value::Null,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 8).unwrap()
    }

    #[test]
    fn miss_then_hit_updates_counters() {
        let cache = FlightStatusCache::new(Duration::from_secs(300));
        assert!(cache.get("AR1140", date()).is_none());
        cache.insert("AR1140", date(), Some(observation("Scheduled")));

        let cached = cache.get("AR1140", date()).expect("hit");
        assert_eq!(cached.unwrap().status, "Scheduled");

        let counters = cache.counters();
        assert_eq!(counters.misses, 1);
        assert_eq!(counters.hits, 1);
        assert_eq!(counters.saved_calls, 1);
    }

    #[test]
    fn negative_answers_are_cached_too() {
        let cache = FlightStatusCache::new(Duration::from_secs(300));
        cache.insert("ZZ999", date(), None);
        assert_eq!(cache.get("ZZ999", date()), Some(None));
    }

    #[test]
    fn expired_entries_read_as_misses_and_purge() {
        let cache = FlightStatusCache::new(Duration::from_millis(0));
        cache.insert("AR1140", date(), Some(observation("Scheduled")));
        assert!(cache.get("AR1140", date()).is_none());
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn keys_are_per_flight_and_date() {
        let cache = FlightStatusCache::new(Duration::from_secs(300));
        cache.insert("AR1140", date(), Some(observation("Scheduled")));
        let other_date = NaiveDate::from_ymd_opt(2025, 7, 9).unwrap();
        assert!(cache.get("AR1140", other_date).is_none());
        assert!(cache.get("IB6842", date()).is_none());
    }
}
