//! Two-tier cache (component C2).
//!
//! [`Cache`] is the storage contract both tiers implement: a local
//! in-process tier ([`local::LocalCache`]) and an optional remote tier
//! ([`redis::RedisCache`], feature `redis-cache`). Both guarantee invariant
//! E — a write carrying an error result never overwrites an entry that last
//! held a success — by making `set` take the previous entry's success flag
//! into account atomically rather than leaving the check-then-set race to
//! the caller.

pub mod envelope;
pub mod local;
#[cfg(feature = "redis-cache")]
pub mod redis;

pub use envelope::{Envelope, EnvelopeStatus};

use async_trait::async_trait;
use std::time::Duration;

/// A stored cache entry: the envelope plus the fields the cache itself tracks.
#[derive(Clone, Debug)]
pub struct CacheEntry {
  pub envelope: Envelope,
  pub stored_at_ms: u64,
  pub ttl: Duration,
}

impl CacheEntry {
  pub fn is_expired(&self, now_ms: u64) -> bool {
    now_ms.saturating_sub(self.stored_at_ms) >= self.ttl.as_millis() as u64
  }
}

/// Contract shared by the local and remote cache tiers.
///
/// `set` implements invariant E itself: callers never need to read-before-write
/// to avoid clobbering a successful response with a later error.
#[async_trait]
pub trait Cache: Send + Sync {
  /// Returns the entry for `key` if present and not expired.
  async fn get(&self, key: &str) -> Option<CacheEntry>;

  /// Stores `envelope` under `key` with the given ttl.
  ///
  /// If `envelope` represents an error and the existing entry (if any)
  /// represents a success, the write is dropped and the prior entry is kept.
  async fn set(&self, key: &str, envelope: Envelope, ttl: Duration);

  /// Removes the entry for `key`, if any.
  async fn remove(&self, key: &str);

  /// Cheap liveness probe surfaced on `/status`.
  async fn health_check(&self) -> Result<(), String>;
}

/// Applies invariant E in-process: given the previous entry (if any) and a
/// candidate new envelope, decides whether the write should proceed.
pub fn should_overwrite(previous: Option<&Envelope>, candidate: &Envelope) -> bool {
  match previous {
    Some(prev) if prev.status == EnvelopeStatus::Success && candidate.status == EnvelopeStatus::Error => false,
    _ => true,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use envelope::EnvelopeStatus;

  fn envelope(status: EnvelopeStatus) -> Envelope {
    Envelope {
      status,
      status_code: 200,
      result: serde_json::Value::Null,
      data: serde_json::json!({}),
      error_message: None,
      provider_status_code: None,
      timestamps: envelope::EnvelopeTimestamps::at(0),
      max_age_ms: 30_000,
      meta: None,
    }
  }

  #[test]
  fn error_does_not_overwrite_success() {
    let prev = envelope(EnvelopeStatus::Success);
    let candidate = envelope(EnvelopeStatus::Error);
    assert!(!should_overwrite(Some(&prev), &candidate));
  }

  #[test]
  fn success_overwrites_success() {
    let prev = envelope(EnvelopeStatus::Success);
    let candidate = envelope(EnvelopeStatus::Success);
    assert!(should_overwrite(Some(&prev), &candidate));
  }

  #[test]
  fn error_overwrites_prior_error() {
    let prev = envelope(EnvelopeStatus::Error);
    let candidate = envelope(EnvelopeStatus::Error);
    assert!(should_overwrite(Some(&prev), &candidate));
  }

  #[test]
  fn anything_overwrites_missing_entry() {
    let candidate = envelope(EnvelopeStatus::Error);
    assert!(should_overwrite(None, &candidate));
  }
}
