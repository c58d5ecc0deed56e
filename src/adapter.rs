//! Adapter wiring: assembles C1-C10 behind one `Router` (`POST /`,
//! `GET {BASE_URL}/status`, `GET /metrics`, `GET {BASE_URL}/debug/settings`),
//! acquires the startup lock and spawns the background scheduler loop (C8),
//! and serves forever.
//!
//! This is the one assembly point every adapter binary calls into with its
//! own `Transport` implementation, wiring a handful of concrete pieces into
//! a `Router` the same way `demos/*/src/main.rs` does for a real deployment.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hyper::Method;
use tokio::net::TcpListener;

use crate::background;
use crate::body::TakoBody;
use crate::cache::Cache;
use crate::cache_writer::CacheWriter;
use crate::config::Settings;
use crate::extractors::state::State;
use crate::foreground::{self, Foreground, ForegroundConfig};
use crate::router::Router;
use crate::signals;
use crate::transport::Transport;
use crate::types::Response;

/// Type-erased handle to the shared cache, stored in global state so
/// `/status` can reach it without depending on a concrete cache backend.
#[derive(Clone)]
struct CacheHandle(Arc<dyn Cache>);

fn json_response(status: http::StatusCode, body: serde_json::Value) -> Response {
  let payload = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());
  hyper::Response::builder()
    .status(status)
    .header(http::header::CONTENT_TYPE, "application/json")
    .body(TakoBody::new(http_body_util::Full::from(Bytes::from(payload))))
    .unwrap_or_else(|_| hyper::Response::new(TakoBody::empty()))
}

async fn status_handler(State(cache): State<CacheHandle>) -> Response {
  match cache.0.health_check().await {
    Ok(()) => json_response(http::StatusCode::OK, serde_json::json!({"status": "up"})),
    Err(reason) => json_response(http::StatusCode::SERVICE_UNAVAILABLE, serde_json::json!({"status": "down", "reason": reason})),
  }
}

async fn debug_settings_handler(State(settings): State<Settings>) -> Response {
  json_response(http::StatusCode::OK, serde_json::json!(settings.redacted()))
}

#[cfg(feature = "metrics-prometheus")]
async fn metrics_handler() -> Response {
  hyper::Response::builder()
    .status(http::StatusCode::OK)
    .header(http::header::CONTENT_TYPE, "text/plain; version=0.0.4")
    .body(TakoBody::new(http_body_util::Full::from(Bytes::from(crate::metrics::global().encode()))))
    .unwrap_or_else(|_| hyper::Response::new(TakoBody::empty()))
}

#[cfg(not(feature = "metrics-prometheus"))]
async fn metrics_handler() -> Response {
  json_response(http::StatusCode::NOT_FOUND, serde_json::json!({"error": "metrics-prometheus feature disabled"}))
}

/// Spawns the background loop for each of `transports`, first acquiring the
/// distributed startup lock (C10) when `REDIS_URL` is configured so only one
/// writer instance runs the cold-start warmup at a time (spec.md §4.10).
/// Without Redis configured there is nothing to serialize against, so the
/// loops start immediately — matching a single-instance deployment.
fn start_background(adapter_name: String, transports: Vec<Arc<dyn Transport>>, settings: &Settings) {
  let background_timeout = Duration::from_millis(settings.get_int("BACKGROUND_EXECUTE_TIMEOUT").unwrap_or(30_000) as u64);

  #[cfg(feature = "redis-cache")]
  {
    if let Some(redis_url) = settings.get("REDIS_URL").map(str::to_string) {
      let lease = Duration::from_millis(settings.get_int("CACHE_LOCK_DURATION").unwrap_or(30_000) as u64);
      let retries = settings.get_int("CACHE_LOCK_RETRIES").unwrap_or(10) as u32;
      let owner_token = format!("{}-{}", std::process::id(), rand::random::<u64>());

      tokio::spawn(async move {
        let client = match redis::Client::open(redis_url.as_str()) {
          Ok(client) => client,
          Err(err) => {
            tracing::error!(error = %err, "invalid REDIS_URL for distributed lock, exiting");
            std::process::exit(1);
          }
        };
        let conn = match redis::aio::ConnectionManager::new(client).await {
          Ok(conn) => conn,
          Err(err) => {
            tracing::error!(error = %err, "could not connect to distributed lock backend, exiting");
            std::process::exit(1);
          }
        };

        let lock = crate::lock::DistributedLock::new(conn, format!("ea:startup-lock:{adapter_name}"), owner_token, lease);
        crate::lock::acquire_or_exit(lock, retries, Duration::from_millis(500), signals::on_shutdown()).await;

        for transport in transports {
          background::spawn(transport, background_timeout, signals::on_shutdown());
        }
      });
      return;
    }
  }

  for transport in transports {
    background::spawn(transport, background_timeout, signals::on_shutdown());
  }
}

/// One registered request handler: a name callers select via the inbound
/// `{ endpoint }` field, and the transport that services it (spec.md §6, §9
/// glossary's "Endpoint").
pub type Endpoint = (String, Arc<dyn Transport>);

/// One running adapter process: its declared name, the endpoints it serves,
/// the cache it reads and writes through, and the settings it was
/// configured with.
pub struct Adapter {
  name: String,
  endpoints: Vec<Endpoint>,
  default_endpoint: Option<String>,
  cache: Arc<dyn Cache>,
  settings: Settings,
}

impl Adapter {
  /// Single-endpoint convenience constructor: the endpoint's name is the
  /// transport's own name, which also becomes the adapter's default
  /// endpoint (so a caller may omit `endpoint` in the request body
  /// entirely, matching most single-purpose EAs).
  pub fn new(name: impl Into<String>, transport: Arc<dyn Transport>, cache: Arc<dyn Cache>, settings: Settings) -> Self {
    let endpoint_name = transport.name().to_string();
    Self::with_endpoints(name, vec![(endpoint_name.clone(), transport)], Some(endpoint_name), cache, settings)
  }

  /// Multi-endpoint constructor for adapters that expose more than one named
  /// request handler, each potentially backed by its own transport.
  pub fn with_endpoints(name: impl Into<String>, endpoints: Vec<Endpoint>, default_endpoint: Option<String>, cache: Arc<dyn Cache>, settings: Settings) -> Self {
    Self { name: name.into(), endpoints, default_endpoint, cache, settings }
  }

  /// Builds the router and spawns the background loop, without binding or serving.
  /// Split out from [`Adapter::run`] so tests can dispatch against the router directly.
  pub fn into_router(self) -> Router {
    crate::config::set_debug_enabled(self.settings.get_bool("DEBUG").unwrap_or(false));
    crate::config::register_sensitive_names(&self.settings);

    let base_url = self.settings.get("BASE_URL").unwrap_or("/").trim_end_matches('/').to_string();
    let poll_attempts = self.settings.get_int("CACHE_POLLING_MAX_RETRIES").unwrap_or(3) as u32;
    let poll_sleep_ms = self.settings.get_int("CACHE_POLLING_SLEEP_MS").unwrap_or(200) as u64;
    let default_ttl_ms = self.settings.get_int("WARMUP_SUBSCRIPTION_TTL").unwrap_or(30_000) as u64;
    let key_config = self.settings.key_config();

    let cache_writer = Arc::new(CacheWriter::with_key_config(self.cache.clone(), Duration::from_millis(default_ttl_ms), key_config.clone()));
    let foreground_config = ForegroundConfig { max_poll_attempts: poll_attempts, poll_interval: Duration::from_millis(poll_sleep_ms) };

    let endpoint_map: std::collections::HashMap<String, Arc<dyn Transport>> = self.endpoints.iter().cloned().collect();
    let foreground = Foreground::new(self.name.clone(), endpoint_map, self.default_endpoint.clone(), self.cache.clone(), cache_writer, key_config, foreground_config);

    // Only writer instances run the background scheduler (C8); a reader
    // serves cached data and foreground requests but never calls out on its
    // own, matching spec.md's `EA_MODE`-gated split of writer-only duties.
    // One loop is spawned per distinct transport instance, not per endpoint
    // name, so two endpoints sharing the same transport don't double its
    // background work.
    let mode = self.settings.get("EA_MODE").unwrap_or("reader-writer").to_string();
    if mode != "reader" {
      let mut distinct_transports = Vec::with_capacity(self.endpoints.len());
      let mut spawned: Vec<*const ()> = Vec::with_capacity(self.endpoints.len());
      for (_, transport) in &self.endpoints {
        let ptr = Arc::as_ptr(transport) as *const ();
        if spawned.contains(&ptr) {
          continue;
        }
        spawned.push(ptr);
        distinct_transports.push(transport.clone());
      }

      // spec.md §4.10: a writer acquires a startup lock on C2 before starting
      // C8, so two writer instances sharing one Redis never race the same
      // cold-start warmup. Spawned detached so `into_router` stays sync for
      // tests; a lock failure exits the process from inside the task rather
      // than surfacing back through this call.
      start_background(self.name.clone(), distinct_transports, &self.settings);
    }

    let mut router = Router::new();
    router.state(foreground);
    router.state(CacheHandle(self.cache.clone()));
    router.state(self.settings.clone());

    router.route(Method::POST, &format!("{base_url}/"), foreground::handle_request);
    router.route(Method::GET, &format!("{base_url}/status"), status_handler);
    router.route(Method::GET, "/metrics", metrics_handler);
    router.route(Method::GET, &format!("{base_url}/debug/settings"), debug_settings_handler);

    router
  }

  /// Binds `EA_PORT` and serves the assembled router until the process exits.
  pub async fn run(self) {
    let port = self.settings.get_int("EA_PORT").unwrap_or(8080) as u16;
    let router = self.into_router();

    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
      Ok(listener) => listener,
      Err(err) => {
        tracing::error!(port, error = %err, "failed to bind inbound listener");
        std::process::exit(1);
      }
    };

    crate::serve(listener, router).await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::local::LocalCache;
  use crate::transport::{BackgroundContext, RequestContext};
  use async_trait::async_trait;
  use futures_util::future::BoxFuture;

  struct EchoTransport;

  #[async_trait]
  impl Transport for EchoTransport {
    fn name(&self) -> &'static str {
      "echo"
    }

    fn foreground_execute<'a>(&'a self, ctx: &'a RequestContext) -> Option<BoxFuture<'a, Result<crate::cache::Envelope, crate::error::AdapterError>>> {
      let input = ctx.input.clone();
      Some(Box::pin(async move { Ok(crate::cache::Envelope::success(input, 0, 1000)) }))
    }

    async fn background_execute(&self, _ctx: &BackgroundContext) -> Result<(), crate::error::AdapterError> {
      Ok(())
    }

    fn background_interval(&self) -> Duration {
      Duration::from_secs(3600)
    }
  }

  #[tokio::test]
  async fn status_route_reports_cache_health() {
    let cache: Arc<dyn Cache> = Arc::new(LocalCache::new(10));
    let settings = Settings::load(vec![]).unwrap();
    let adapter = Adapter::new("TEST", Arc::new(EchoTransport), cache, settings);
    let router = adapter.into_router();

    let request = hyper::Request::builder()
      .method(Method::GET)
      .uri("/status")
      .body(TakoBody::empty())
      .unwrap();

    let response = router.dispatch(request).await;
    assert_eq!(response.status(), http::StatusCode::OK);
  }

  #[tokio::test]
  async fn foreground_route_echoes_input_through_the_cache() {
    let cache: Arc<dyn Cache> = Arc::new(LocalCache::new(10));
    let settings = Settings::load(vec![]).unwrap();
    let adapter = Adapter::new("TEST", Arc::new(EchoTransport), cache, settings);
    let router = adapter.into_router();

    let body = serde_json::json!({"data": {"base": "BTC"}}).to_string();
    let request = hyper::Request::builder()
      .method(Method::POST)
      .uri("/")
      .header(http::header::CONTENT_TYPE, "application/json")
      .body(TakoBody::new(http_body_util::Full::from(Bytes::from(body))))
      .unwrap();

    let response = router.dispatch(request).await;
    assert_eq!(response.status(), http::StatusCode::OK);
  }
}
