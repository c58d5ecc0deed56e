//! Subscription set (component C3): the bounded, TTL-ordered record of which
//! feeds a background transport should keep polling or streaming.
//!
//! Structurally identical to [`crate::cache::local::LocalCache`] — a
//! `DashMap` plus an expiry-ordered index — since both are "bounded set,
//! evict oldest-to-expire first" containers; see `cache/local.rs` for the
//! shared [`crate::cache::local`]-internal `ExpiryIndex`.

use std::time::Duration;

use dashmap::DashMap;

use crate::cache::local::ExpiryIndex;

fn now_ms() -> u64 {
  use std::time::{SystemTime, UNIX_EPOCH};
  SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[derive(Clone, Debug)]
pub struct SubscriptionEntry {
  pub key: String,
  pub input: serde_json::Value,
  pub transport: String,
  pub last_touched_ms: u64,
}

struct Stored {
  entry: SubscriptionEntry,
  token: (u64, u64),
}

/// Bounded set of feeds currently wanted by at least one recent foreground caller.
pub struct SubscriptionSet {
  store: DashMap<String, Stored>,
  index: ExpiryIndex<String>,
  max_size: usize,
  ttl: Duration,
}

impl SubscriptionSet {
  pub fn new(max_size: usize, ttl: Duration) -> Self {
    Self { store: DashMap::new(), index: ExpiryIndex::new(), max_size, ttl }
  }

  /// Registers interest in `key`, refreshing its TTL if already present.
  ///
  /// If the set is at capacity and `key` is novel, the entry with the
  /// earliest `expiresAt` is evicted to make room (spec.md §4.3's overflow
  /// rule, I8) rather than rejecting the new registration.
  pub fn touch(&self, key: &str, input: &serde_json::Value, transport: &str) {
    if !self.store.contains_key(key) && self.store.len() >= self.max_size {
      if let Some(oldest) = self.index.pop_oldest() {
        self.store.remove(&oldest);
      }
    }

    let now = now_ms();
    let expires_at = now + self.ttl.as_millis() as u64;
    let token = self.index.insert(key.to_string(), expires_at);
    let entry = SubscriptionEntry {
      key: key.to_string(),
      input: input.clone(),
      transport: transport.to_string(),
      last_touched_ms: now,
    };

    if let Some((_, old)) = self.store.remove(key) {
      self.index.remove(old.token);
    }
    self.store.insert(key.to_string(), Stored { entry, token });
  }

  pub fn remove(&self, key: &str) {
    if let Some((_, old)) = self.store.remove(key) {
      self.index.remove(old.token);
    }
  }

  /// Drops entries whose TTL has elapsed, returning the keys removed.
  pub fn sweep_expired(&self) -> Vec<String> {
    let now = now_ms();
    let mut removed = Vec::new();
    let stale: Vec<String> = self
      .store
      .iter()
      .filter(|e| now.saturating_sub(e.entry.last_touched_ms) >= self.ttl.as_millis() as u64)
      .map(|e| e.key().clone())
      .collect();

    for key in stale {
      self.remove(&key);
      removed.push(key);
    }
    removed
  }

  /// Snapshot of all currently-subscribed, non-expired entries for a given
  /// transport, used by the background loop to decide what to (re)request.
  ///
  /// Expired entries are removed as they're encountered (spec.md §4.3:
  /// "getAll returns parameters of all non-expired entries; expired entries
  /// are removed at read time"), rather than left for a separate sweep.
  pub fn entries_for(&self, transport: &str) -> Vec<SubscriptionEntry> {
    let now = now_ms();
    let expired: Vec<String> = self
      .store
      .iter()
      .filter(|e| e.entry.transport == transport && e.token.0 <= now)
      .map(|e| e.key().clone())
      .collect();
    for key in expired {
      self.remove(&key);
    }

    self
      .store
      .iter()
      .filter(|e| e.entry.transport == transport)
      .map(|e| e.entry.clone())
      .collect()
  }

  pub fn len(&self) -> usize {
    self.store.len()
  }

  pub fn is_empty(&self) -> bool {
    self.store.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn touch_evicts_oldest_to_make_room_for_a_novel_key() {
    let set = SubscriptionSet::new(1, Duration::from_secs(60));
    set.touch("a", &json!({}), "http");
    set.touch("b", &json!({}), "http");
    assert_eq!(set.len(), 1);
    assert!(set.entries_for("http").iter().any(|e| e.key == "b"));
    assert!(!set.entries_for("http").iter().any(|e| e.key == "a"));
  }

  #[test]
  fn touch_refreshes_existing_key_without_evicting() {
    let set = SubscriptionSet::new(1, Duration::from_secs(60));
    set.touch("a", &json!({}), "http");
    set.touch("a", &json!({}), "http");
    assert_eq!(set.len(), 1);
  }

  #[test]
  fn entries_for_filters_by_transport() {
    let set = SubscriptionSet::new(10, Duration::from_secs(60));
    set.touch("a", &json!({}), "http");
    set.touch("b", &json!({}), "ws");
    assert_eq!(set.entries_for("http").len(), 1);
    assert_eq!(set.entries_for("ws").len(), 1);
  }

  #[test]
  fn sweep_expired_removes_stale_entries() {
    let set = SubscriptionSet::new(10, Duration::from_millis(0));
    set.touch("a", &json!({}), "http");
    std::thread::sleep(Duration::from_millis(5));
    let removed = set.sweep_expired();
    assert_eq!(removed, vec!["a".to_string()]);
    assert!(set.is_empty());
  }
}
