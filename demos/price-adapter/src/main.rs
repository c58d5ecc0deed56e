//! Minimal request/response External Adapter: one endpoint (`price`) that
//! resolves a `base`/`quote` pair to a synthetic price. Demonstrates wiring
//! [`ea_core::transport::request_response::RequestResponseTransport`] behind
//! [`ea_core::adapter::Adapter`] — the upstream call itself is a stand-in so
//! the demo has no network dependency; a real adapter's `UpstreamClient`
//! would call out through `ea_core::client` or its own HTTP client instead.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use ea_core::adapter::Adapter;
use ea_core::cache::local::LocalCache;
use ea_core::cache::Envelope;
use ea_core::cache_writer::CacheWriter;
use ea_core::config::{Settings, SettingDef, SettingKind};
use ea_core::error::AdapterError;
use ea_core::ratelimit::{FixedIntervalLimiter, RateLimiter};
use ea_core::requester::RequesterConfig;
use ea_core::transport::TransportClass;
use ea_core::transport::request_response::{RequestResponseTransport, UpstreamClient};
use serde_json::Value;

fn now_ms() -> u64 {
  SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Stands in for a real price-feed HTTP client: derives a deterministic
/// "price" from the requested symbols so repeated calls are stable.
struct SyntheticPriceClient;

#[async_trait]
impl UpstreamClient for SyntheticPriceClient {
  async fn call(&self, input: &Value) -> Result<Envelope, AdapterError> {
    let base = input.get("base").and_then(Value::as_str).ok_or_else(|| AdapterError::input("`base` is required"))?;
    let quote = input.get("quote").and_then(Value::as_str).unwrap_or("USD");

    let seed: u32 = base.bytes().map(u32::from).sum::<u32>() + quote.bytes().map(u32::from).sum::<u32>();
    let price = 1.0 + (seed % 100_000) as f64 / 100.0;

    Ok(Envelope::success(serde_json::json!({ "base": base, "quote": quote, "price": price }), now_ms(), 0))
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  #[cfg(feature = "ea-tracing")]
  tracing_subscriber::fmt::init();

  let extra = vec![SettingDef::new("PAIR_SOURCE", SettingKind::String, "Name of the upstream price source").with_default("synthetic")];
  let settings = Settings::load(extra)?;
  ea_core::config::set_debug_enabled(settings.get_bool("DEBUG").unwrap_or(false));
  ea_core::config::register_sensitive_names(&settings);

  let cache_max_items = settings.get_int("CACHE_MAX_ITEMS").unwrap_or(10_000) as usize;
  let cache = Arc::new(LocalCache::new(cache_max_items));

  let default_ttl = Duration::from_millis(settings.get_int("CACHE_MAX_AGE").unwrap_or(30_000) as u64);
  let cache_writer = Arc::new(CacheWriter::with_key_config(cache.clone(), default_ttl, settings.key_config()));

  let limiter: Arc<dyn RateLimiter> = Arc::new(FixedIntervalLimiter::from_tiers(
    settings.get_int("RATE_LIMIT_1S").unwrap_or(0) as f64,
    settings.get_int("RATE_LIMIT_1M").unwrap_or(0) as f64,
    settings.get_int("RATE_LIMIT_1H").unwrap_or(0) as f64,
  ));

  let requester_config = RequesterConfig {
    max_queue_size: settings.get_int("MAX_HTTP_REQUEST_QUEUE_LENGTH").unwrap_or(1000) as usize,
    max_retries: settings.get_int("RETRY").unwrap_or(1) as u32,
    base_backoff: Duration::from_millis(settings.get_int("REQUESTER_SLEEP_BEFORE_REQUEUEING_MS").unwrap_or(100) as u64),
    max_backoff: Duration::from_secs(10),
  };

  let background_interval = Duration::from_millis(settings.background_interval_ms(TransportClass::Http));
  let transport = Arc::new(RequestResponseTransport::new(Arc::new(SyntheticPriceClient), limiter, requester_config, cache_writer, background_interval));

  println!("price-adapter listening on :{}", settings.get_int("EA_PORT").unwrap_or(8080));
  Adapter::new("price-adapter", transport, cache, settings).run().await;

  Ok(())
}
