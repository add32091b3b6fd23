//! Read-through caches with TTL and bounded capacity.
//!
//! Entries are immutable snapshots. Concurrent misses on the same key share
//! one `OnceCell`, so the loader runs once and every waiter gets its result.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::debug;

use waypoint_core::{AccountId, ConnectionKey, Delegate, DelegateConnectionResult, DelegateId};

use crate::clock::Clock;
use crate::error::StoreError;
use crate::store::{ConnectionResultStore, DelegateStore};

struct Slot<V> {
    created_at: DateTime<Utc>,
    generation: u64,
    cell: Arc<OnceCell<V>>,
}

struct Slots<K, V> {
    entries: HashMap<K, Slot<V>>,
    // Insertion order; entries replaced or invalidated since are skipped.
    order: VecDeque<(K, u64)>,
    next_generation: u64,
}

impl<K: Eq + Hash + Clone, V> Slots<K, V> {
    fn insert(&mut self, key: K, created_at: DateTime<Utc>, cell: Arc<OnceCell<V>>) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.order.push_back((key.clone(), generation));
        self.entries.insert(
            key,
            Slot {
                created_at,
                generation,
                cell,
            },
        );
    }

    fn is_current(&self, key: &K, generation: u64) -> bool {
        self.entries
            .get(key)
            .map_or(false, |slot| slot.generation == generation)
    }

    fn evict_oldest(&mut self) {
        while let Some((key, generation)) = self.order.pop_front() {
            if self.is_current(&key, generation) {
                self.entries.remove(&key);
                return;
            }
        }
    }

    // Keeps the order queue proportional to the live entries.
    fn compact(&mut self, capacity: usize) {
        if self.order.len() > capacity.saturating_mul(2) {
            let entries = &self.entries;
            self.order.retain(|(key, generation)| {
                entries
                    .get(key)
                    .map_or(false, |slot| slot.generation == *generation)
            });
        }
    }
}

/// Generic load-on-miss cache.
///
/// When full, the oldest entry is evicted in amortized constant time.
pub struct TtlCache<K, V> {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    capacity: usize,
    slots: Mutex<Slots<K, V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration, capacity: usize) -> Self {
        Self {
            clock,
            ttl,
            capacity: capacity.max(1),
            slots: Mutex::new(Slots {
                entries: HashMap::new(),
                order: VecDeque::new(),
                next_generation: 0,
            }),
        }
    }

    /// Return the cached value for `key`, running `load` on a miss.
    ///
    /// A failed load leaves the slot empty so the next caller retries.
    pub async fn get_or_try_load<F, Fut, E>(&self, key: &K, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = {
            let mut slots = self.slots.lock();
            let now = self.clock.now();

            let fresh = slots
                .entries
                .get(key)
                .filter(|slot| now - slot.created_at < self.ttl)
                .map(|slot| slot.cell.clone());

            match fresh {
                Some(cell) => cell,
                None => {
                    if !slots.entries.contains_key(key) && slots.entries.len() >= self.capacity {
                        slots.evict_oldest();
                    }
                    let cell = Arc::new(OnceCell::new());
                    slots.insert(key.clone(), now, cell.clone());
                    slots.compact(self.capacity);
                    cell
                }
            }
        };

        cell.get_or_try_init(load).await.cloned()
    }

    pub fn invalidate(&self, key: &K) {
        self.slots.lock().entries.remove(key);
    }

    /// Drop every entry whose key matches `predicate`.
    pub fn invalidate_where(&self, predicate: impl Fn(&K) -> bool) {
        self.slots.lock().entries.retain(|key, _| !predicate(key));
    }

    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cached view of `ConnectionResultStore`, keyed by (account, delegate, criteria).
pub struct ConnectionResultCache {
    store: Arc<dyn ConnectionResultStore>,
    cache: TtlCache<ConnectionKey, Option<DelegateConnectionResult>>,
}

impl ConnectionResultCache {
    pub fn new(
        store: Arc<dyn ConnectionResultStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        capacity: usize,
    ) -> Self {
        Self {
            store,
            cache: TtlCache::new(clock, ttl, capacity),
        }
    }

    pub async fn get(
        &self,
        key: &ConnectionKey,
    ) -> Result<Option<DelegateConnectionResult>, StoreError> {
        self.cache
            .get_or_try_load(key, || async { self.store.find(key).await })
            .await
    }

    pub fn invalidate(&self, key: &ConnectionKey) {
        self.cache.invalidate(key);
    }

    pub fn invalidate_account(&self, account_id: &AccountId, delegate_id: Option<&DelegateId>) {
        self.cache.invalidate_where(|key| {
            &key.account_id == account_id && delegate_id.map_or(true, |d| &key.delegate_id == d)
        });
    }
}

/// Per-account list of delegates with a recent heartbeat.
pub struct AccountDelegatesCache {
    store: Arc<dyn DelegateStore>,
    clock: Arc<dyn Clock>,
    liveness: Duration,
    cache: TtlCache<AccountId, Arc<Vec<Delegate>>>,
}

impl AccountDelegatesCache {
    pub fn new(
        store: Arc<dyn DelegateStore>,
        clock: Arc<dyn Clock>,
        liveness: Duration,
        ttl: Duration,
        capacity: usize,
    ) -> Self {
        Self {
            store,
            clock: clock.clone(),
            liveness,
            cache: TtlCache::new(clock, ttl, capacity),
        }
    }

    /// Delegates of the account whose heartbeat is newer than the liveness window.
    pub async fn live_delegates(
        &self,
        account_id: &AccountId,
    ) -> Result<Arc<Vec<Delegate>>, StoreError> {
        self.cache
            .get_or_try_load(account_id, || async {
                let cutoff = self.clock.now() - self.liveness;
                let live: Vec<Delegate> = self
                    .store
                    .list_by_account(account_id)
                    .await?
                    .into_iter()
                    .filter(|d| d.last_heartbeat > cutoff)
                    .collect();
                debug!(account_id = %account_id, live = live.len(), "Loaded live delegates");
                Ok(Arc::new(live))
            })
            .await
    }
}
