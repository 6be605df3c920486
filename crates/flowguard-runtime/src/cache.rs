//! Expiring eviction cache.
//!
//! Two retention tiers behind one `get`:
//! - **Durable**: owned entries with access accounting, per-entry TTL,
//!   capacity eviction and a periodic sweep
//! - **Ephemeral**: a bounded moka cache with no tracked lifecycle; entries
//!   may vanish at any time and are never touched by `delete` or `clear`
//!
//! Video and image caches are this type with different [`CacheConfig`]s.

use moka::sync::Cache as EphemeralTier;
use parking_lot::Mutex;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use flowguard_core::{select_victim, CacheConfig, EntryStats, PutOptions};

use crate::timer::{SharedTimer, TimerHandle};
use crate::RuntimeError;

/// Counters describing cache activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Durable lookups that found an entry
    pub hits: u64,

    /// Lookups served by the ephemeral tier
    pub ephemeral_hits: u64,

    /// Lookups found in neither tier
    pub misses: u64,

    /// Entries removed to make room
    pub evictions: u64,

    /// Entries removed by their TTL timer
    pub expirations: u64,

    /// Entries removed by the periodic sweep
    pub swept: u64,

    /// Durable entries currently held
    pub len: usize,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    ephemeral_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    swept: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::SeqCst);
    }
}

struct Entry<V> {
    value: V,
    stats: EntryStats,
    expiry: Option<TimerHandle>,
}

impl<V> Entry<V> {
    fn cancel_expiry(&self) {
        if let Some(handle) = &self.expiry {
            handle.cancel();
        }
    }
}

struct Durable<K, V> {
    entries: HashMap<K, Entry<V>>,
    next_sequence: u64,
    sweep: Option<TimerHandle>,
    destroyed: bool,
}

impl<K: Hash + Eq + Clone, V> Durable<K, V> {
    fn take_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    fn remove<Q>(&mut self, key: &Q) -> Option<Entry<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entry = self.entries.remove(key)?;
        entry.cancel_expiry();
        Some(entry)
    }

    fn evict_one(&mut self) -> Option<(K, Entry<V>)> {
        let victim = select_victim(self.entries.iter().map(|(k, e)| (k, &e.stats)))?.clone();
        let entry = self.remove(&victim)?;
        Some((victim, entry))
    }

    fn drain(&mut self) -> Vec<Entry<V>> {
        self.entries
            .drain()
            .map(|(_, entry)| {
                entry.cancel_expiry();
                entry
            })
            .collect()
    }
}

struct Shared<K, V> {
    name: String,
    config: CacheConfig,
    timer: SharedTimer,
    durable: Mutex<Durable<K, V>>,
    ephemeral: EphemeralTier<K, V>,
    counters: Counters,
}

impl<K, V> Shared<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// TTL timer callback.
    fn expire(&self, key: &K, sequence: u64) {
        let removed = {
            let mut durable = self.durable.lock();
            if durable.destroyed {
                return;
            }
            // The key may have been overwritten since this timer was armed
            match durable.entries.get(key) {
                Some(entry) if entry.stats.sequence == sequence => durable.remove(key),
                _ => None,
            }
        };

        if removed.is_some() {
            Counters::bump(&self.counters.expirations, 1);
            tracing::debug!(cache = %self.name, "Cache entry expired");
        }
    }

    /// Periodic sweep callback.
    fn sweep(&self) {
        let now = self.timer.now();
        let stale_after = self.config.stale_after();

        let removed: Vec<Entry<V>> = {
            let mut durable = self.durable.lock();
            if durable.destroyed {
                return;
            }
            let stale: Vec<K> = durable
                .entries
                .iter()
                .filter(|(_, entry)| entry.stats.is_stale(now, stale_after))
                .map(|(key, _)| key.clone())
                .collect();
            stale.iter().filter_map(|key| durable.remove(key)).collect()
        };

        if !removed.is_empty() {
            Counters::bump(&self.counters.swept, removed.len() as u64);
            tracing::debug!(cache = %self.name, removed = removed.len(), "Cache sweep reclaimed stale entries");
        }
    }
}

/// Bounded two-tier cache with TTL, eviction and a periodic sweep.
///
/// All state transitions of one instance happen under a single lock,
/// including those made by its timers. Values removed from the durable
/// tier are dropped after the lock is released.
///
/// Dropping the cache destroys it.
pub struct ExpiringCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    shared: Arc<Shared<K, V>>,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache and start its sweep.
    pub fn new(config: CacheConfig, timer: SharedTimer) -> Result<Self, RuntimeError> {
        Self::named("cache", config, timer)
    }

    /// Create a cache with a name used in log fields.
    pub fn named(
        name: impl Into<String>,
        config: CacheConfig,
        timer: SharedTimer,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;

        let ephemeral = EphemeralTier::builder()
            .max_capacity(config.ephemeral_capacity)
            .build();

        let shared = Arc::new(Shared {
            name: name.into(),
            config,
            timer,
            durable: Mutex::new(Durable {
                entries: HashMap::new(),
                next_sequence: 0,
                sweep: None,
                destroyed: false,
            }),
            ephemeral,
            counters: Counters::default(),
        });

        let weak: Weak<Shared<K, V>> = Arc::downgrade(&shared);
        let sweep = shared.timer.schedule_repeating(
            shared.config.cleanup_interval,
            Arc::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.sweep();
                }
            }),
        );
        shared.durable.lock().sweep = Some(sweep);

        Ok(Self { shared })
    }

    /// Store a value.
    ///
    /// Strong puts go to the durable tier: if it is full, one entry is
    /// evicted first, even when `key` is already present. Overwriting resets
    /// the access count and
    /// creation time and cancels the earlier expiry. A TTL of zero arms no
    /// timer. Other puts go to the ephemeral tier.
    ///
    /// Puts after [`destroy`](Self::destroy) are ignored.
    pub fn put(&self, key: K, value: V, options: PutOptions) {
        let shared = &self.shared;

        if !options.strong {
            if shared.durable.lock().destroyed {
                tracing::debug!(cache = %shared.name, "Ignoring put on destroyed cache");
                return;
            }
            shared.ephemeral.insert(key, value);
            return;
        }

        let ttl = options.ttl.unwrap_or(shared.config.default_ttl);
        let now = shared.timer.now();
        let mut released: Vec<Entry<V>> = Vec::new();

        {
            let mut durable = shared.durable.lock();
            if durable.destroyed {
                tracing::debug!(cache = %shared.name, "Ignoring put on destroyed cache");
                return;
            }

            if durable.entries.len() >= shared.config.max_size {
                if let Some((_, evicted)) = durable.evict_one() {
                    Counters::bump(&shared.counters.evictions, 1);
                    tracing::debug!(
                        cache = %shared.name,
                        access_count = evicted.stats.access_count,
                        "Evicted least-used cache entry"
                    );
                    released.push(evicted);
                }
            }

            let sequence = durable.take_sequence();
            let expiry = (!ttl.is_zero()).then(|| self.schedule_expiry(key.clone(), sequence, ttl));
            let entry = Entry {
                value,
                stats: EntryStats::new(now, sequence),
                expiry,
            };

            if let Some(previous) = durable.entries.insert(key, entry) {
                previous.cancel_expiry();
                released.push(previous);
            }
        }

        drop(released);
    }

    fn schedule_expiry(&self, key: K, sequence: u64, ttl: Duration) -> TimerHandle {
        let weak = Arc::downgrade(&self.shared);
        self.shared.timer.schedule_once(
            ttl,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.expire(&key, sequence);
                }
            }),
        )
    }

    /// Look up a value.
    ///
    /// A durable hit increments the entry's access count. On a durable miss
    /// the ephemeral tier is consulted without accounting.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let counters = &self.shared.counters;

        {
            let mut durable = self.shared.durable.lock();
            if let Some(entry) = durable.entries.get_mut(key) {
                entry.stats.touch();
                Counters::bump(&counters.hits, 1);
                return Some(entry.value.clone());
            }
        }

        match self.shared.ephemeral.get(key) {
            Some(value) => {
                Counters::bump(&counters.ephemeral_hits, 1);
                Some(value)
            }
            None => {
                Counters::bump(&counters.misses, 1);
                None
            }
        }
    }

    /// Whether the durable tier holds `key`. No accounting.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shared.durable.lock().entries.contains_key(key)
    }

    /// Remove a durable entry and cancel its expiry.
    ///
    /// Idempotent. The ephemeral tier is not touched. Returns true if an
    /// entry was removed.
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let removed = self.shared.durable.lock().remove(key);
        removed.is_some()
    }

    /// Evict the least-used, oldest durable entry.
    ///
    /// Returns the evicted key.
    pub fn evict_one(&self) -> Option<K> {
        let evicted = self.shared.durable.lock().evict_one();
        evicted.map(|(key, _entry)| {
            Counters::bump(&self.shared.counters.evictions, 1);
            key
        })
    }

    /// Run the stale-entry sweep now.
    pub fn sweep_now(&self) {
        self.shared.sweep();
    }

    /// Empty the durable tier. The ephemeral tier is untouched.
    pub fn clear(&self) {
        let drained = self.shared.durable.lock().drain();
        drop(drained);
    }

    /// Cancel the sweep and every pending expiry, then clear.
    ///
    /// Safe to call more than once. No timer of this cache mutates it after
    /// this returns.
    pub fn destroy(&self) {
        let drained = {
            let mut durable = self.shared.durable.lock();
            if durable.destroyed {
                return;
            }
            durable.destroyed = true;
            if let Some(sweep) = durable.sweep.take() {
                sweep.cancel();
            }
            durable.drain()
        };

        tracing::debug!(cache = %self.shared.name, released = drained.len(), "Cache destroyed");
        drop(drained);
    }

    /// Whether [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.shared.durable.lock().destroyed
    }

    /// Number of durable entries.
    pub fn len(&self) -> usize {
        self.shared.durable.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Snapshot of the activity counters.
    pub fn stats(&self) -> CacheStats {
        let c = &self.shared.counters;
        CacheStats {
            hits: c.hits.load(Ordering::SeqCst),
            ephemeral_hits: c.ephemeral_hits.load(Ordering::SeqCst),
            misses: c.misses.load(Ordering::SeqCst),
            evictions: c.evictions.load(Ordering::SeqCst),
            expirations: c.expirations.load(Ordering::SeqCst),
            swept: c.swept.load(Ordering::SeqCst),
            len: self.len(),
        }
    }
}

impl<K, V> Drop for ExpiringCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<K, V> fmt::Debug for ExpiringCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiringCache")
            .field("name", &self.shared.name)
            .field("config", &self.shared.config)
            .field("len", &self.len())
            .finish()
    }
}
