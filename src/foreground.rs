//! Foreground request handler (component C9): orchestrates C1/C2/C3/C7 for
//! one inbound HTTP call, polling the cache for a result that a transport's
//! background loop (or its own synchronous path) has produced.
//!
//! Registered as the `POST /` handler via the router's extractor pipeline
//! (`extractors::json::Json`, `extractors::state::State`), following
//! `main.rs`'s `router.route(Method::POST, ...)` demo shape.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::cache::{Cache, Envelope};
use crate::cache_writer::CacheWriter;
use crate::error::AdapterError;
use crate::extractors::json::Json;
use crate::extractors::state::State;
use crate::key::{self, KeyConfig};
use crate::responder::Responder;
use crate::transport::{RequestContext, Transport};
use crate::types::Response;

#[derive(Clone)]
pub struct ForegroundConfig {
  pub max_poll_attempts: u32,
  pub poll_interval: Duration,
}

impl Default for ForegroundConfig {
  fn default() -> Self {
    Self { max_poll_attempts: 3, poll_interval: Duration::from_millis(200) }
  }
}

/// Ties an adapter's registered endpoints to the shared cache for foreground callers.
#[derive(Clone)]
pub struct Foreground {
  adapter_name: String,
  endpoints: Arc<HashMap<String, Arc<dyn Transport>>>,
  default_endpoint: Option<String>,
  cache: Arc<dyn Cache>,
  cache_writer: Arc<CacheWriter>,
  key_config: KeyConfig,
  config: ForegroundConfig,
}

impl Foreground {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    adapter_name: impl Into<String>,
    endpoints: HashMap<String, Arc<dyn Transport>>,
    default_endpoint: Option<String>,
    cache: Arc<dyn Cache>,
    cache_writer: Arc<CacheWriter>,
    key_config: KeyConfig,
    config: ForegroundConfig,
  ) -> Self {
    Self {
      adapter_name: adapter_name.into(),
      endpoints: Arc::new(endpoints),
      default_endpoint,
      cache,
      cache_writer,
      key_config,
      config,
    }
  }

  /// A single-endpoint convenience constructor: the endpoint's name is the
  /// transport's own name, and it doubles as the adapter's default endpoint.
  pub fn single(adapter_name: impl Into<String>, transport: Arc<dyn Transport>, cache: Arc<dyn Cache>, cache_writer: Arc<CacheWriter>, key_config: KeyConfig, config: ForegroundConfig) -> Self {
    let endpoint_name = transport.name().to_string();
    let mut endpoints = HashMap::with_capacity(1);
    endpoints.insert(endpoint_name.clone(), transport);
    Self::new(adapter_name, endpoints, Some(endpoint_name), cache, cache_writer, key_config, config)
  }

  /// Services one request body `{ endpoint?, data? }` (spec.md §6): resolves
  /// the endpoint (falling back to the adapter's default, 400 if neither is
  /// given), derives the key (C1), registers interest (C3 via the
  /// transport), takes the synchronous path if the transport offers one,
  /// otherwise polls the cache (C2) for a result the background loop will
  /// eventually produce.
  pub async fn handle(&self, body: Value) -> Result<Envelope, AdapterError> {
    let endpoint_name = match body.get("endpoint").and_then(Value::as_str) {
      Some(name) => name.to_string(),
      None => self
        .default_endpoint
        .clone()
        .ok_or_else(|| AdapterError::input("no `endpoint` given and the adapter declares no default endpoint"))?,
    };

    let transport = self
      .endpoints
      .get(&endpoint_name)
      .cloned()
      .ok_or_else(|| AdapterError::input(format!("unknown endpoint `{endpoint_name}`")))?;

    let input = body.get("data").cloned().unwrap_or_else(|| Value::Object(Default::default()));
    if !input.is_object() {
      return Err(AdapterError::input("`data` must be an object"));
    }

    let transport_name = transport.name();
    let cache_key = key::cache_key(Some(&self.adapter_name), &endpoint_name, transport_name, &input, &self.key_config, None);
    let ctx = RequestContext { key: cache_key.clone(), input: input.clone() };

    transport.register_request(&ctx).await?;

    if let Some(fut) = transport.foreground_execute(&ctx) {
      return fut.await;
    }

    if let Some(entry) = self.cache.get(&cache_key).await {
      return Ok(entry.envelope);
    }

    let mut shutdown = crate::signals::on_shutdown();
    for attempt in 0..self.config.max_poll_attempts {
      tokio::select! {
        _ = shutdown.recv() => {
          return Err(AdapterError::other("adapter is shutting down"));
        }
        _ = tokio::time::sleep(self.config.poll_interval) => {}
      }

      if let Some(entry) = self.cache.get(&cache_key).await {
        return Ok(entry.envelope);
      }
      tracing::debug!(key = %cache_key, attempt, "cache poll miss, retrying");
    }

    Err(AdapterError::timeout(format!("no cached result for `{cache_key}` within poll budget")))
  }

  pub fn cache_writer(&self) -> &CacheWriter {
    &self.cache_writer
  }
}

/// `POST /` handler: reads the JSON request body as `{ endpoint?, data? }`
/// and returns whatever `Foreground::handle` produces as the HTTP response body.
pub async fn handle_request(State(foreground): State<Foreground>, Json(body): Json<Value>) -> Response {
  match foreground.handle(body).await {
    Ok(envelope) => envelope.into_response(),
    Err(err) => err.into_response(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::local::LocalCache;
  use crate::transport::BackgroundContext;
  use async_trait::async_trait;
  use futures_util::future::BoxFuture;

  struct SynchronousTransport;

  #[async_trait]
  impl Transport for SynchronousTransport {
    fn name(&self) -> &'static str {
      "sync"
    }

    fn foreground_execute<'a>(&'a self, _ctx: &'a RequestContext) -> Option<BoxFuture<'a, Result<Envelope, AdapterError>>> {
      Some(Box::pin(async { Ok(Envelope::success(serde_json::json!({"value": 1}), 0, 1000)) }))
    }

    async fn background_execute(&self, _ctx: &BackgroundContext) -> Result<(), AdapterError> {
      Ok(())
    }

    fn background_interval(&self) -> Duration {
      Duration::from_secs(1)
    }
  }

  struct BackgroundOnlyTransport;

  #[async_trait]
  impl Transport for BackgroundOnlyTransport {
    fn name(&self) -> &'static str {
      "bg"
    }

    async fn background_execute(&self, _ctx: &BackgroundContext) -> Result<(), AdapterError> {
      Ok(())
    }

    fn background_interval(&self) -> Duration {
      Duration::from_secs(1)
    }
  }

  fn foreground_for(transport: Arc<dyn Transport>, cache: Arc<dyn Cache>, config: ForegroundConfig) -> Foreground {
    let writer = Arc::new(CacheWriter::new(cache.clone(), Duration::from_secs(30)));
    Foreground::single("TEST", transport, cache, writer, KeyConfig::default(), config)
  }

  #[tokio::test]
  async fn synchronous_transport_bypasses_cache_poll() {
    let cache: Arc<dyn Cache> = Arc::new(LocalCache::new(10));
    let fg = foreground_for(Arc::new(SynchronousTransport), cache, ForegroundConfig::default());

    let result = fg.handle(serde_json::json!({})).await.unwrap();
    assert_eq!(result.data, serde_json::json!({"value": 1}));
  }

  #[tokio::test]
  async fn background_only_transport_times_out_without_a_cached_value() {
    let cache: Arc<dyn Cache> = Arc::new(LocalCache::new(10));
    let config = ForegroundConfig { max_poll_attempts: 1, poll_interval: Duration::from_millis(1) };
    let fg = foreground_for(Arc::new(BackgroundOnlyTransport), cache, config);

    let result = fg.handle(serde_json::json!({})).await;
    assert!(matches!(result, Err(AdapterError::Timeout(_))));
  }

  #[tokio::test]
  async fn background_only_transport_returns_value_once_cached() {
    let cache: Arc<dyn Cache> = Arc::new(LocalCache::new(10));
    let writer = Arc::new(CacheWriter::new(cache.clone(), Duration::from_secs(30)));
    let config = ForegroundConfig { max_poll_attempts: 3, poll_interval: Duration::from_millis(5) };
    let input = serde_json::json!({"base": "ETH"});
    writer.write("bg", &input, None, Envelope::success(serde_json::json!({"value": 7}), 0, 1000)).await;

    let fg = Foreground::single("TEST", Arc::new(BackgroundOnlyTransport), cache, writer, KeyConfig::default(), config);
    let result = fg.handle(serde_json::json!({"data": {"base": "ETH"}})).await.unwrap();
    assert_eq!(result.data, serde_json::json!({"value": 7}));
  }

  #[tokio::test]
  async fn missing_endpoint_with_no_default_is_an_input_error() {
    let cache: Arc<dyn Cache> = Arc::new(LocalCache::new(10));
    let writer = Arc::new(CacheWriter::new(cache.clone(), Duration::from_secs(30)));
    let fg = Foreground::new("TEST", HashMap::new(), None, cache, writer, KeyConfig::default(), ForegroundConfig::default());

    let result = fg.handle(serde_json::json!({})).await;
    assert!(matches!(result, Err(AdapterError::Input(_))));
  }

  #[tokio::test]
  async fn unknown_endpoint_is_an_input_error() {
    let cache: Arc<dyn Cache> = Arc::new(LocalCache::new(10));
    let fg = foreground_for(Arc::new(SynchronousTransport), cache, ForegroundConfig::default());

    let result = fg.handle(serde_json::json!({"endpoint": "nope"})).await;
    assert!(matches!(result, Err(AdapterError::Input(_))));
  }

  #[tokio::test]
  async fn explicit_endpoint_field_selects_among_multiple_endpoints() {
    let cache: Arc<dyn Cache> = Arc::new(LocalCache::new(10));
    let writer = Arc::new(CacheWriter::new(cache.clone(), Duration::from_secs(30)));
    let mut endpoints: HashMap<String, Arc<dyn Transport>> = HashMap::new();
    endpoints.insert("sync".to_string(), Arc::new(SynchronousTransport));
    endpoints.insert("bg".to_string(), Arc::new(BackgroundOnlyTransport));
    let fg = Foreground::new("TEST", endpoints, Some("sync".to_string()), cache, writer, KeyConfig::default(), ForegroundConfig::default());

    let result = fg.handle(serde_json::json!({"endpoint": "sync"})).await.unwrap();
    assert_eq!(result.data, serde_json::json!({"value": 1}));
  }
}
