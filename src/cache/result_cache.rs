//! Bounded in-memory result cache with per-entry TTL and LRU eviction.

use crate::config::CacheSettings;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// How many response-time samples are kept for the average.
const RESPONSE_TIME_SAMPLES: usize = 100;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
    access_count: u64,
    /// Position in the recency index; larger is more recent.
    tick: u64,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

struct State<V> {
    entries: HashMap<String, Entry<V>>,
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    response_times: VecDeque<Duration>,
}

impl<V> State<V> {
    fn touch(&mut self, key: &str) {
        let tick = self.next_tick;
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            entry.access_count += 1;
            self.recency.insert(tick, key.to_string());
            self.next_tick += 1;
        }
    }

    fn remove(&mut self, key: &str) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    fn evict_least_recent(&mut self) -> Option<String> {
        let (_, key) = self.recency.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Hits over lookups, 0.0 before the first lookup.
    pub hit_rate: f64,
    pub average_response_time_ms: f64,
    pub response_time_samples: usize,
}

/// Process-local cache in front of the persistent store.
///
/// Not authoritative: it may be empty after a restart and callers always
/// fall through to the store on a miss.
pub struct ResultCache<V> {
    max_size: usize,
    default_ttl: Duration,
    state: Mutex<State<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(settings: &CacheSettings) -> Self {
        Self::with_capacity(settings.max_size, Duration::from_secs(settings.ttl_secs))
    }

    pub fn with_capacity(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            max_size: max_size.max(1),
            default_ttl,
            state: Mutex::new(State {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                next_tick: 0,
                response_times: VecDeque::with_capacity(RESPONSE_TIME_SAMPLES),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns a clone of the live value for `key`.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut state = self.lock();

        let expired = match state.entries.get(key) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };
        if expired {
            state.remove(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        state.touch(key);
        self.hits.fetch_add(1, Ordering::Relaxed);
        state.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Inserts with the default TTL.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    /// Inserts or replaces `key`. When the cache is full, expired entries
    /// are purged first and the least recently used entry goes only if
    /// that freed nothing.
    pub fn insert_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = Instant::now();
        let mut state = self.lock();

        state.remove(&key);
        if state.entries.len() >= self.max_size {
            state.purge_expired(now);
        }
        while state.entries.len() >= self.max_size {
            if state.evict_least_recent().is_none() {
                break;
            }
        }

        let tick = state.next_tick;
        state.next_tick += 1;
        state.recency.insert(tick, key.clone());
        state.entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                ttl,
                access_count: 0,
                tick,
            },
        );
    }

    /// Whether a live entry exists. Does not count as an access.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut state = self.lock();
        match state.entries.get(key).map(|entry| entry.is_expired(now)) {
            Some(false) => true,
            Some(true) => {
                state.remove(key);
                false
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times `key` was read since it was inserted.
    pub fn access_count(&self, key: &str) -> Option<u64> {
        self.lock().entries.get(key).map(|entry| entry.access_count)
    }

    pub fn record_response_time(&self, elapsed: Duration) {
        let mut state = self.lock();
        if state.response_times.len() == RESPONSE_TIME_SAMPLES {
            state.response_times.pop_front();
        }
        state.response_times.push_back(elapsed);
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let samples = state.response_times.len();
        let average_response_time_ms = if samples == 0 {
            0.0
        } else {
            let total: Duration = state.response_times.iter().sum();
            total.as_secs_f64() * 1000.0 / samples as f64
        };

        CacheStats {
            size: state.entries.len(),
            max_size: self.max_size,
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            average_response_time_ms,
            response_time_samples: samples,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V> fmt::Debug for ResultCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache")
            .field("max_size", &self.max_size)
            .field("default_ttl", &self.default_ttl)
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}
