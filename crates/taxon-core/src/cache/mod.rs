//! Content Cache
//!
//! Bounded key→blob store shared by the distillation and embedding
//! collaborators. Keys are opaque strings (in practice content hashes),
//! values are serialized blobs.
//!
//! Policies:
//! - Every entry carries an expiry; a background sweeper removes expired
//!   entries every `cleanup_interval`.
//! - At capacity, the entry with the oldest access time is evicted
//!   (true LRU; reads refresh recency).
//! - All operations are failure-free: absence is `None`, never an error.

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::config::CacheConfig;

// ============================================================================
// STATS
// ============================================================================

/// Cache observability counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Lookups that found a live entry
    pub hits: u64,
    /// Lookups that found nothing (or only an expired entry)
    pub misses: u64,
    /// Entries pushed out by the LRU policy
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    /// Live entries right now
    pub entries: usize,
    /// hits / (hits + misses), 0 when idle
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

// ============================================================================
// ENTRIES
// ============================================================================

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Vec<u8>,
    expires_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    hit_count: u64,
}

struct Inner {
    entries: Mutex<LruCache<String, CacheEntry>>,
    counters: Mutex<Counters>,
    default_ttl: Duration,
    stop: AtomicBool,
    /// Paired with `sweeper_gate` for an interruptible sweep interval.
    sweeper_gate: Mutex<()>,
    sweeper_signal: Condvar,
}

// ============================================================================
// CONTENT CACHE
// ============================================================================

/// Bounded, TTL-indexed, LRU key→blob store
///
/// Safe for concurrent use from any thread; payloads are copied in and out.
/// When disabled by configuration every operation is a no-op.
pub struct ContentCache {
    inner: Option<Arc<Inner>>,
    sweeper: Option<std::thread::JoinHandle<()>>,
}

impl ContentCache {
    /// Create a cache per the given configuration.
    ///
    /// Starts the background expiry sweeper unless the cache is disabled or
    /// the cleanup interval is zero.
    pub fn new(config: &CacheConfig) -> Self {
        if !config.enabled {
            return Self { inner: None, sweeper: None };
        }

        let capacity = NonZeroUsize::new(config.max_size.max(1)).expect("max(1) is non-zero");
        let inner = Arc::new(Inner {
            entries: Mutex::new(LruCache::new(capacity)),
            counters: Mutex::new(Counters::default()),
            default_ttl: Duration::seconds(config.default_ttl_secs as i64),
            stop: AtomicBool::new(false),
            sweeper_gate: Mutex::new(()),
            sweeper_signal: Condvar::new(),
        });

        let sweeper = if config.cleanup_interval_secs > 0 {
            let interval = std::time::Duration::from_secs(config.cleanup_interval_secs);
            let sweep_inner = Arc::clone(&inner);
            Some(std::thread::spawn(move || {
                loop {
                    // The stop flag is written under the gate lock, so the
                    // check-then-wait sequence never misses the signal.
                    let guard = match sweep_inner.sweeper_gate.lock() {
                        Ok(g) => g,
                        Err(_) => return,
                    };
                    if sweep_inner.stop.load(Ordering::Acquire) {
                        return;
                    }
                    let (guard, _timeout) = match sweep_inner
                        .sweeper_signal
                        .wait_timeout(guard, interval)
                    {
                        Ok(r) => r,
                        Err(_) => return,
                    };
                    if sweep_inner.stop.load(Ordering::Acquire) {
                        return;
                    }
                    drop(guard);
                    let removed = sweep_expired(&sweep_inner);
                    if removed > 0 {
                        tracing::debug!(removed, "content cache sweep removed expired entries");
                    }
                }
            }))
        } else {
            None
        };

        Self { inner: Some(inner), sweeper }
    }

    /// Fetch a blob. Updates recency and the entry hit count.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let inner = self.inner.as_ref()?;
        let now = Utc::now();
        let mut entries = inner.entries.lock().ok()?;

        let expired = matches!(entries.peek(key), Some(e) if e.expires_at <= now);
        if expired {
            entries.pop(key);
            drop(entries);
            if let Ok(mut c) = inner.counters.lock() {
                c.expirations += 1;
                c.misses += 1;
            }
            return None;
        }

        let hit = entries.get_mut(key).map(|entry| {
            entry.last_accessed_at = now;
            entry.hit_count += 1;
            entry.payload.clone()
        });
        drop(entries);

        if let Ok(mut c) = inner.counters.lock() {
            match hit {
                Some(_) => c.hits += 1,
                None => c.misses += 1,
            }
        }
        hit
    }

    /// Store a blob with the given TTL (`None` = configured default).
    pub fn set(&self, key: &str, payload: Vec<u8>, ttl: Option<Duration>) {
        let Some(inner) = self.inner.as_ref() else {
            return;
        };
        let now = Utc::now();
        let entry = CacheEntry {
            payload,
            expires_at: now + ttl.unwrap_or(inner.default_ttl),
            last_accessed_at: now,
            hit_count: 0,
        };
        let Ok(mut entries) = inner.entries.lock() else {
            return;
        };
        let had_key = entries.peek(key).is_some();
        let evicted = entries.push(key.to_string(), entry);
        drop(entries);

        // `push` reports the displaced pair; same-key replacement is not an
        // eviction.
        if !had_key && evicted.is_some()
            && let Ok(mut c) = inner.counters.lock()
        {
            c.evictions += 1;
        }
    }

    /// Membership check without touching recency.
    pub fn has(&self, key: &str) -> bool {
        let Some(inner) = self.inner.as_ref() else {
            return false;
        };
        let now = Utc::now();
        inner
            .entries
            .lock()
            .map(|entries| matches!(entries.peek(key), Some(e) if e.expires_at > now))
            .unwrap_or(false)
    }

    /// Remove a single entry.
    pub fn delete(&self, key: &str) {
        if let Some(inner) = self.inner.as_ref()
            && let Ok(mut entries) = inner.entries.lock()
        {
            entries.pop(key);
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        if let Some(inner) = self.inner.as_ref()
            && let Ok(mut entries) = inner.entries.lock()
        {
            entries.clear();
        }
    }

    /// Number of live entries.
    pub fn size(&self) -> usize {
        self.inner
            .as_ref()
            .and_then(|inner| inner.entries.lock().ok().map(|e| e.len()))
            .unwrap_or(0)
    }

    /// Observability snapshot.
    pub fn stats(&self) -> CacheStats {
        let Some(inner) = self.inner.as_ref() else {
            return CacheStats::default();
        };
        let entries = self.size();
        let Ok(c) = inner.counters.lock() else {
            return CacheStats::default();
        };
        let lookups = c.hits + c.misses;
        CacheStats {
            hits: c.hits,
            misses: c.misses,
            evictions: c.evictions,
            expirations: c.expirations,
            entries,
            hit_rate: if lookups > 0 {
                c.hits as f64 / lookups as f64
            } else {
                0.0
            },
        }
    }

    /// Remove every expired entry immediately.
    ///
    /// The background sweeper calls this on its interval; exposed for tests
    /// and for embedders that want deterministic cleanup points.
    pub fn sweep(&self) -> usize {
        self.inner.as_ref().map(|inner| sweep_expired(inner)).unwrap_or(0)
    }
}

fn sweep_expired(inner: &Inner) -> usize {
    let now = Utc::now();
    let Ok(mut entries) = inner.entries.lock() else {
        return 0;
    };
    let expired: Vec<String> = entries
        .iter()
        .filter(|(_, e)| e.expires_at <= now)
        .map(|(k, _)| k.clone())
        .collect();
    for key in &expired {
        entries.pop(key);
    }
    drop(entries);

    if !expired.is_empty()
        && let Ok(mut c) = inner.counters.lock()
    {
        c.expirations += expired.len() as u64;
    }
    expired.len()
}

impl Drop for ContentCache {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.as_ref() {
            // Take the gate so the sweeper is either before its stop check
            // or parked in wait_timeout; either way it observes the flag.
            let guard = inner.sweeper_gate.lock();
            inner.stop.store(true, Ordering::Release);
            inner.sweeper_signal.notify_all();
            drop(guard);
        }
        if let Some(handle) = self.sweeper.take() {
            let _ = handle.join();
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
