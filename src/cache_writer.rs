//! Response cache writer (component C6): stamps a dispatch result with
//! timing metadata and writes it through the key deriver into the cache.
//!
//! Pure composition over [`crate::key`] and [`crate::cache::Cache`] — no new
//! concurrency primitives, matching spec.md's description of C6 as glue
//! rather than a component with its own state.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::cache::{Cache, Envelope};
use crate::key::{self, KeyConfig};

pub struct CacheWriter {
  cache: Arc<dyn Cache>,
  default_ttl: Duration,
  key_config: KeyConfig,
}

impl CacheWriter {
  pub fn new(cache: Arc<dyn Cache>, default_ttl: Duration) -> Self {
    Self::with_key_config(cache, default_ttl, KeyConfig::default())
  }

  pub fn with_key_config(cache: Arc<dyn Cache>, default_ttl: Duration, key_config: KeyConfig) -> Self {
    Self { cache, default_ttl, key_config }
  }

  /// Writes `envelope` under the key derived from `transport`/`input`
  /// (or `explicit_key` when the caller already derived the full key, e.g.
  /// the foreground handler's `ctx.key`), honoring the envelope's own
  /// `max_age_ms` as the ttl when set, and stamping `meta.feedId` (spec.md
  /// §3) from `input`.
  ///
  /// `transport` doubles as the endpoint name in the fallback derivation
  /// path; every shipped transport in this crate always supplies
  /// `explicit_key`, so the fallback only matters for a hand-rolled
  /// transport that writes to the cache outside the foreground/background
  /// request lifecycle.
  pub async fn write(&self, transport: &str, input: &Value, explicit_key: Option<&str>, envelope: Envelope) -> String {
    let cache_key = key::cache_key(None, transport, transport, input, &self.key_config, explicit_key);
    let envelope = envelope.with_feed_id(key::feed_id(input, &self.key_config));
    let ttl = if envelope.max_age_ms > 0 {
      Duration::from_millis(envelope.max_age_ms)
    } else {
      self.default_ttl
    };
    self.cache.set(&cache_key, envelope, ttl).await;
    cache_key
  }

  pub async fn read(&self, transport: &str, input: &Value, explicit_key: Option<&str>) -> Option<Envelope> {
    let cache_key = key::cache_key(None, transport, transport, input, &self.key_config, explicit_key);
    self.cache.get(&cache_key).await.map(|entry| entry.envelope)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::local::LocalCache;

  #[tokio::test]
  async fn write_then_read_round_trips_through_derived_key() {
    let cache: Arc<dyn Cache> = Arc::new(LocalCache::new(10));
    let writer = CacheWriter::new(cache, Duration::from_secs(30));
    let input = serde_json::json!({"base": "BTC", "quote": "USD"});
    let envelope = Envelope::success(serde_json::json!({"result": 42}), 0, 30_000);

    writer.write("http", &input, None, envelope).await;
    let read = writer.read("http", &input, None).await.expect("present");
    assert_eq!(read.data, serde_json::json!({"result": 42}));
  }

  #[tokio::test]
  async fn write_stamps_feed_id_from_input() {
    let cache: Arc<dyn Cache> = Arc::new(LocalCache::new(10));
    let writer = CacheWriter::new(cache, Duration::from_secs(30));
    let input = serde_json::json!({"base": "ETH", "quote": "USD"});
    let envelope = Envelope::success(serde_json::json!({"result": 1}), 0, 30_000);

    writer.write("http", &input, None, envelope).await;
    let read = writer.read("http", &input, None).await.expect("present");
    assert_eq!(read.meta.expect("feed id stamped").feed_id, "{\"base\":\"eth\",\"quote\":\"usd\"}");
  }

  #[tokio::test]
  async fn write_with_empty_input_stamps_no_feed_id_sentinel() {
    let cache: Arc<dyn Cache> = Arc::new(LocalCache::new(10));
    let writer = CacheWriter::new(cache, Duration::from_secs(30));
    let envelope = Envelope::success(serde_json::json!({"result": 1}), 0, 30_000);

    writer.write("http", &serde_json::json!({}), None, envelope).await;
    let read = writer.read("http", &serde_json::json!({}), None).await.expect("present");
    assert_eq!(read.meta.expect("feed id stamped").feed_id, "N/A");
  }
}
