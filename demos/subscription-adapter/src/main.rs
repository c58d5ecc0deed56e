//! Streaming External Adapter: POST `/` subscribes the caller to a `base`
//! feed, and a background loop keeps it warm until nobody asks for it again.
//! Demonstrates wiring [`ea_core::transport::streaming::SubscriptionTransport`]
//! behind [`ea_core::adapter::Adapter`] — `DemoConnector` stands in for a real
//! WebSocket/SSE connector so the demo runs with no upstream dependency.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use ea_core::adapter::Adapter;
use ea_core::cache::local::LocalCache;
use ea_core::cache::Envelope;
use ea_core::cache_writer::CacheWriter;
use ea_core::config::Settings;
use ea_core::error::AdapterError;
use ea_core::subscription::SubscriptionSet;
use ea_core::transport::TransportClass;
use ea_core::transport::streaming::{SubscriptionTransport, UpstreamConnector};
use serde_json::Value;

fn now_ms() -> u64 {
  SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Stands in for a real streaming connector: every `subscribe`d key gets a
/// synthetic tick buffered until the next `poll_messages` call.
struct DemoConnector {
  subscribed: DashMap<String, Value>,
}

#[async_trait]
impl UpstreamConnector for DemoConnector {
  async fn subscribe(&self, key: &str, input: &Value) -> Result<(), AdapterError> {
    self.subscribed.insert(key.to_string(), input.clone());
    Ok(())
  }

  async fn unsubscribe(&self, key: &str) -> Result<(), AdapterError> {
    self.subscribed.remove(key);
    Ok(())
  }

  async fn poll_messages(&self) -> Vec<(String, Envelope)> {
    self
      .subscribed
      .iter()
      .map(|entry| {
        let base = entry.value().get("base").and_then(Value::as_str).unwrap_or("UNKNOWN");
        let envelope = Envelope::success(serde_json::json!({ "base": base, "tick": now_ms() }), now_ms(), 0);
        (entry.key().clone(), envelope)
      })
      .collect()
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  #[cfg(feature = "ea-tracing")]
  tracing_subscriber::fmt::init();

  let settings = Settings::load(vec![])?;
  ea_core::config::set_debug_enabled(settings.get_bool("DEBUG").unwrap_or(false));
  ea_core::config::register_sensitive_names(&settings);

  let cache_max_items = settings.get_int("CACHE_MAX_ITEMS").unwrap_or(10_000) as usize;
  let cache = Arc::new(LocalCache::new(cache_max_items));

  let default_ttl = Duration::from_millis(settings.get_int("CACHE_MAX_AGE").unwrap_or(30_000) as u64);
  let cache_writer = Arc::new(CacheWriter::with_key_config(cache.clone(), default_ttl, settings.key_config()));

  let subscription_ttl = Duration::from_millis(settings.get_int("WS_SUBSCRIPTION_TTL").unwrap_or(300_000) as u64);
  let subscription_max = settings.get_int("SUBSCRIPTION_SET_MAX_ITEMS").unwrap_or(1000) as usize;
  let subscriptions = Arc::new(SubscriptionSet::new(subscription_max, subscription_ttl));

  let background_interval = Duration::from_millis(settings.background_interval_ms(TransportClass::Ws));
  let connector = Arc::new(DemoConnector { subscribed: DashMap::new() });

  let transport = Arc::new(SubscriptionTransport::new("ws", connector, subscriptions, cache_writer, background_interval));

  println!("subscription-adapter listening on :{}", settings.get_int("EA_PORT").unwrap_or(8080));
  Adapter::new("subscription-adapter", transport, cache, settings).run().await;

  Ok(())
}
