//! In-process cache tier: a `DashMap` plus an expiry-ordered index for bounded eviction.
//!
//! The expiry index mirrors the `DashMap<IpAddr, Bucket>` + background purge
//! idiom from `plugins/rate_limiter.rs`, generalized into a small reusable
//! structure ([`ExpiryIndex`]) that both this cache tier and
//! [`crate::subscription`] build on, since both need "bounded set, evict the
//! oldest-to-expire entry first".

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{Cache, CacheEntry, Envelope, should_overwrite};

fn now_ms() -> u64 {
  use std::time::{SystemTime, UNIX_EPOCH};
  SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Tracks insertion order for expiry purposes: `(expires_at_ms, sequence) -> key`.
///
/// The sequence number breaks ties between entries inserted in the same
/// millisecond so the `BTreeMap` stays a total order.
pub(crate) struct ExpiryIndex<K> {
  by_expiry: Mutex<BTreeMap<(u64, u64), K>>,
  sequence: AtomicU64,
}

impl<K: Clone + Ord> ExpiryIndex<K> {
  pub fn new() -> Self {
    Self { by_expiry: Mutex::new(BTreeMap::new()), sequence: AtomicU64::new(0) }
  }

  /// Registers `key` as expiring at `expires_at_ms`, returning the token
  /// needed to remove this specific registration later.
  pub fn insert(&self, key: K, expires_at_ms: u64) -> (u64, u64) {
    let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
    let token = (expires_at_ms, seq);
    self.by_expiry.lock().insert(token, key);
    token
  }

  pub fn remove(&self, token: (u64, u64)) {
    self.by_expiry.lock().remove(&token);
  }

  /// Returns and removes the key with the smallest `expires_at_ms`, if any.
  pub fn pop_oldest(&self) -> Option<K> {
    let mut map = self.by_expiry.lock();
    let token = *map.keys().next()?;
    map.remove(&token)
  }

  pub fn len(&self) -> usize {
    self.by_expiry.lock().len()
  }
}

struct Stored {
  entry: CacheEntry,
  token: (u64, u64),
}

/// Bounded, TTL-ordered local cache tier.
pub struct LocalCache {
  store: DashMap<String, Stored>,
  index: ExpiryIndex<String>,
  max_items: usize,
}

impl LocalCache {
  pub fn new(max_items: usize) -> Self {
    Self { store: DashMap::new(), index: ExpiryIndex::new(), max_items }
  }

  fn evict_if_over_capacity(&self) {
    while self.store.len() > self.max_items {
      let Some(oldest_key) = self.index.pop_oldest() else { break };
      self.store.remove(&oldest_key);
    }
  }
}

#[async_trait]
impl Cache for LocalCache {
  async fn get(&self, key: &str) -> Option<CacheEntry> {
    let now = now_ms();
    let hit = self.store.get(key)?;
    if hit.entry.is_expired(now) {
      drop(hit);
      self.store.remove(key);
      return None;
    }
    Some(hit.entry.clone())
  }

  async fn set(&self, key: &str, envelope: Envelope, ttl: Duration) {
    // `DashMap::entry` holds the shard lock for the whole closure, so the
    // overwrite check and the write below are atomic w.r.t. any other `set`
    // racing on the same key (spec.md §4.2's invariant E requires exactly
    // this — a get-then-set pair on separate lock acquisitions, as an
    // earlier version of this function did, can interleave two concurrent
    // writers and let an error clobber a success that raced in afterward).
    let now = now_ms();
    let expires_at = now + ttl.as_millis() as u64;

    let old_token = match self.store.entry(key.to_string()) {
      dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
        if !should_overwrite(Some(&occupied.get().entry.envelope), &envelope) {
          return;
        }
        let token = self.index.insert(key.to_string(), expires_at);
        let entry = CacheEntry { envelope, stored_at_ms: now, ttl };
        Some(occupied.insert(Stored { entry, token }).token)
      }
      dashmap::mapref::entry::Entry::Vacant(vacant) => {
        let token = self.index.insert(key.to_string(), expires_at);
        let entry = CacheEntry { envelope, stored_at_ms: now, ttl };
        vacant.insert(Stored { entry, token });
        None
      }
    };

    if let Some(old_token) = old_token {
      self.index.remove(old_token);
    }
    self.evict_if_over_capacity();
  }

  async fn remove(&self, key: &str) {
    if let Some((_, old)) = self.store.remove(key) {
      self.index.remove(old.token);
    }
  }

  async fn health_check(&self) -> Result<(), String> {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::EnvelopeStatus;
  use std::sync::Arc;

  fn success_envelope() -> Envelope {
    Envelope::success(serde_json::json!({"result": 1}), now_ms(), 30_000)
  }

  #[tokio::test]
  async fn set_then_get_round_trips() {
    let cache = LocalCache::new(10);
    cache.set("a", success_envelope(), Duration::from_secs(30)).await;
    let got = cache.get("a").await.expect("present");
    assert_eq!(got.envelope.status, EnvelopeStatus::Success);
  }

  #[tokio::test]
  async fn eviction_respects_max_items() {
    let cache = LocalCache::new(2);
    cache.set("a", success_envelope(), Duration::from_secs(30)).await;
    cache.set("b", success_envelope(), Duration::from_secs(30)).await;
    cache.set("c", success_envelope(), Duration::from_secs(30)).await;
    assert_eq!(cache.store.len(), 2);
    assert!(cache.get("a").await.is_none());
  }

  #[tokio::test]
  async fn expired_entries_are_not_returned() {
    let cache = LocalCache::new(10);
    cache.set("a", success_envelope(), Duration::from_millis(0)).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(cache.get("a").await.is_none());
  }

  #[tokio::test]
  async fn error_write_does_not_overwrite_cached_success() {
    let cache = LocalCache::new(10);
    cache.set("a", success_envelope(), Duration::from_secs(30)).await;
    let err = Envelope::error(502, "upstream down", Some(502), now_ms());
    cache.set("a", err, Duration::from_secs(30)).await;
    let got = cache.get("a").await.expect("present");
    assert_eq!(got.envelope.status, EnvelopeStatus::Success);
  }

  /// Invariant E must hold even when a success and several errors race on
  /// the same key concurrently, not just in sequential calls (spec.md
  /// §4.2: "this check is atomic with respect to concurrent sets on the
  /// same key"). Once any success lands, every racing error must see it
  /// and skip, regardless of scheduling order.
  #[tokio::test]
  async fn concurrent_racing_sets_never_let_an_error_clobber_a_success() {
    let cache = Arc::new(LocalCache::new(10));
    let mut handles = Vec::new();
    for i in 0..50u64 {
      let cache = cache.clone();
      handles.push(tokio::spawn(async move {
        if i % 2 == 0 {
          cache.set("race", success_envelope(), Duration::from_secs(30)).await;
        } else {
          let err = Envelope::error(502, "upstream down", Some(502), now_ms());
          cache.set("race", err, Duration::from_secs(30)).await;
        }
      }));
    }
    for handle in handles {
      handle.await.unwrap();
    }

    let got = cache.get("race").await.expect("present");
    assert_eq!(got.envelope.status, EnvelopeStatus::Success);
  }
}
