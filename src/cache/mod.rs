// SPDX-License-Identifier: AGPL-3.0-or-later
// Grounded on the connection pool's `DashMap`-keyed table plus
// single-flight construction pattern (examples/Masorubka1-iscsi-client-rs/src/client/pool_sessions.rs).

//! A size-bounded, single-flight, transaction-aware cache with optional TTL
//! expiry.
//!
//! Concurrent `find_or_create` calls for the same key race to create the
//! entry; all but the winner wait on the entry's own `Notify` instead of
//! recomputing, with an optional deadline after which a waiter gives up with
//! [`ServerError::Timeout`] rather than the creator's work being canceled.
//! Entries written under a transaction epoch are invisible to plain lookups
//! until that epoch commits; lookups that carry the epoch on their
//! transaction stack see it early.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering as AtomicOrdering},
    },
    time::{Duration, Instant},
};

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::error::{ServerError, ServerResult};

/// One cached value plus bookkeeping for single-flight creation, expiry, and
/// transactional visibility.
struct Entry<V> {
    /// `None` while a creator is in flight.
    value: Option<Arc<V>>,
    /// Staged `(epoch, value)` written during an open transaction, invisible
    /// to plain lookups until the epoch commits.
    pending: Option<(u64, Arc<V>)>,
    size: usize,
    expiry: Option<Instant>,
    notify: Arc<Notify>,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expiry.is_some_and(|e| now >= e)
    }
}

/// An LRU-evicting, single-flight, transaction-aware cache keyed by `K`.
pub struct Cache<K, V> {
    entries: DashMap<K, Entry<V>>,
    order: DashMap<K, u64>,
    /// Keys currently staged under each open transaction epoch, so
    /// [`Cache::commit_entries`]/[`Cache::rollback_entries`] can resolve
    /// every entry of an epoch in one call.
    epoch_keys: DashMap<u64, Vec<K>>,
    clock: AtomicU64,
    max_size: usize,
    current_size: AtomicU64,
    /// Default expiry applied by [`Cache::set_value_expires`] when the
    /// caller passes `expiry: None`.
    ttl: Option<Duration>,
}

impl<K, V> Cache<K, V>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(max_size: usize) -> Self {
        Self::with_ttl(max_size, None)
    }

    pub fn with_ttl(max_size: usize, ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            order: DashMap::new(),
            epoch_keys: DashMap::new(),
            clock: AtomicU64::new(0),
            max_size,
            current_size: AtomicU64::new(0),
            ttl,
        }
    }

    fn touch(&self, key: &K) {
        let tick = self.clock.fetch_add(1, AtomicOrdering::Relaxed);
        self.order.insert(key.clone(), tick);
    }

    /// Returns the committed, unexpired value for `key`, if present, without
    /// touching any in-flight creation or transaction.
    pub fn find_entry(&self, key: &K) -> Option<Arc<V>> {
        self.find_entry_t(key, &[])
    }

    /// As [`Cache::find_entry`], but also sees a value staged under a
    /// transaction epoch present on the caller's `stack`.
    pub fn find_entry_t(&self, key: &K, stack: &[u64]) -> Option<Arc<V>> {
        let now = Instant::now();
        let Some(entry) = self.entries.get(key) else {
            return None;
        };
        if entry.is_expired(now) {
            drop(entry);
            self.flush_entry(key);
            return None;
        }
        let found = match &entry.pending {
            Some((epoch, value)) if stack.contains(epoch) => Some(value.clone()),
            _ => entry.value.clone(),
        };
        drop(entry);
        if found.is_some() {
            self.touch(key);
        }
        found
    }

    /// Returns the cached value for `key`, or runs `create` exactly once
    /// across all concurrent callers and caches the result. Callers that
    /// lose the race wait on the winner instead of recomputing, up to
    /// `timeout` (`None` waits indefinitely); a caller whose wait elapses
    /// gets `ServerError::Timeout` -- the in-flight creation itself is not
    /// affected.
    pub async fn find_or_create<F, Fut>(
        &self,
        key: K,
        size: usize,
        timeout: Option<Duration>,
        create: F,
    ) -> ServerResult<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = V>,
    {
        loop {
            if let Some(v) = self.find_entry(&key) {
                return Ok(v);
            }

            let notify = Arc::new(Notify::new());
            let mut claimed = false;
            self.entries.entry(key.clone()).or_insert_with(|| {
                claimed = true;
                Entry {
                    value: None,
                    pending: None,
                    size: 0,
                    expiry: None,
                    notify: notify.clone(),
                }
            });

            if !claimed {
                // Someone else's creation is in flight; wait for it.
                let waiter = self.entries.get(&key).map(|e| e.notify.clone());
                let Some(waiter) = waiter else { continue };
                match timeout {
                    Some(d) => {
                        if tokio::time::timeout(d, waiter.notified()).await.is_err() {
                            return Err(ServerError::Timeout);
                        }
                    },
                    None => waiter.notified().await,
                }
                continue;
            }

            let value = create().await;
            let arc = Arc::new(value);
            if let Some(mut e) = self.entries.get_mut(&key) {
                e.value = Some(arc.clone());
                e.size = size;
            }
            self.current_size.fetch_add(size as u64, AtomicOrdering::Relaxed);
            self.touch(&key);
            notify.notify_waiters();
            self.evict_if_needed();
            return Ok(arc);
        }
    }

    /// Publishes `value` under `key`. If `epoch` is `0` the value is
    /// committed immediately; otherwise it is staged and invisible to plain
    /// [`Cache::find_entry`] lookups until [`Cache::commit_entries`] is
    /// called for that epoch. `expiry` is an absolute deadline after which
    /// the committed value is treated as absent; `None` falls back to the
    /// cache's default TTL, if any.
    pub fn set_value_expires(&self, key: &K, value: V, size: usize, expiry: Option<Instant>, epoch: u64) {
        let expiry = expiry.or_else(|| self.ttl.map(|d| Instant::now() + d));
        let arc = Arc::new(value);

        if epoch == 0 {
            self.entries
                .entry(key.clone())
                .and_modify(|e| {
                    e.value = Some(arc.clone());
                    e.size = size;
                    e.expiry = expiry;
                })
                .or_insert_with(|| Entry {
                    value: Some(arc),
                    pending: None,
                    size,
                    expiry,
                    notify: Arc::new(Notify::new()),
                });
            self.current_size.fetch_add(size as u64, AtomicOrdering::Relaxed);
            self.touch(key);
            self.evict_if_needed();
            return;
        }

        self.entries
            .entry(key.clone())
            .and_modify(|e| {
                e.pending = Some((epoch, arc.clone()));
                e.size = size;
                e.expiry = expiry;
            })
            .or_insert_with(|| Entry {
                value: None,
                pending: Some((epoch, arc)),
                size,
                expiry,
                notify: Arc::new(Notify::new()),
            });
        self.epoch_keys.entry(epoch).or_default().push(key.clone());
        self.touch(key);
    }

    /// Makes every entry staged under `epoch` visible and clears its pending
    /// slot, signaling any waiters on each affected key's entry.
    pub fn commit_entries(&self, epoch: u64) {
        let Some((_, keys)) = self.epoch_keys.remove(&epoch) else {
            return;
        };
        for key in keys {
            if let Some(mut e) = self.entries.get_mut(&key) {
                let staged = e.pending.take_if(|(staged, _)| *staged == epoch);
                if let Some((_, value)) = staged {
                    e.value = Some(value);
                    self.current_size.fetch_add(e.size as u64, AtomicOrdering::Relaxed);
                }
                e.notify.notify_waiters();
            }
            self.touch(&key);
        }
        self.evict_if_needed();
    }

    /// Discards every entry staged under `epoch` without disturbing any
    /// previously committed value, signaling any waiters.
    pub fn rollback_entries(&self, epoch: u64) {
        let Some((_, keys)) = self.epoch_keys.remove(&epoch) else {
            return;
        };
        for key in keys {
            if let Some(mut e) = self.entries.get_mut(&key) {
                if matches!(&e.pending, Some((staged, _)) if *staged == epoch) {
                    e.pending = None;
                }
                e.notify.notify_waiters();
            }
        }
    }

    /// Removes `key` entirely, returning whether it was present.
    pub fn flush_entry(&self, key: &K) -> bool {
        self.order.remove(key);
        if let Some((_, e)) = self.entries.remove(key) {
            self.current_size.fetch_sub(e.size as u64, AtomicOrdering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Removes every entry, returning the count removed.
    pub fn flush(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.order.clear();
        self.epoch_keys.clear();
        self.current_size.store(0, AtomicOrdering::Relaxed);
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current_size(&self) -> usize {
        self.current_size.load(AtomicOrdering::Relaxed) as usize
    }

    /// The first key with a committed, unexpired value, oldest-touched
    /// first; `None` if the cache holds nothing visible.
    pub fn first_entry(&self) -> Option<K> {
        self.iter().into_iter().next()
    }

    /// As [`Cache::first_entry`], but also considers keys visible only
    /// through a pending entry staged under an epoch in `stack`.
    pub fn first_entry_t(&self, stack: &[u64]) -> Option<K> {
        self.iter_t(stack).into_iter().next()
    }

    /// Every key with a committed, unexpired value, oldest-touched first.
    pub fn iter(&self) -> Vec<K> {
        self.iter_t(&[])
    }

    /// As [`Cache::iter`], but additionally includes keys visible only
    /// through a pending entry staged under an epoch in `stack`.
    pub fn iter_t(&self, stack: &[u64]) -> Vec<K> {
        let now = Instant::now();
        let mut ordered: Vec<(u64, K)> = self
            .order
            .iter()
            .filter_map(|e| {
                let key = e.key().clone();
                let tick = *e.value();
                let visible = self.entries.get(&key).is_some_and(|entry| {
                    !entry.is_expired(now)
                        && (entry.value.is_some()
                            || entry.pending.as_ref().is_some_and(|(ep, _)| stack.contains(ep)))
                });
                visible.then_some((tick, key))
            })
            .collect();
        ordered.sort_by_key(|(tick, _)| *tick);
        ordered.into_iter().map(|(_, k)| k).collect()
    }

    /// Evicts least-recently-touched entries until under `max_size`.
    fn evict_if_needed(&self) {
        if self.max_size == 0 {
            return;
        }
        while self.current_size.load(AtomicOrdering::Relaxed) as usize > self.max_size {
            let oldest = self
                .order
                .iter()
                .min_by_key(|e| *e.value())
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    self.flush_entry(&key);
                },
                None => break,
            }
        }
    }
}
