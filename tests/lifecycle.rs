//! End-to-end request lifecycle scenarios spanning multiple components, which
//! no single module's unit tests can exercise alone: a full inbound request
//! through the router, the cache, the subscription set, and the requester's
//! coalescing and overflow behavior together.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ea_core::adapter::Adapter;
use ea_core::body::TakoBody;
use ea_core::cache::local::LocalCache;
use ea_core::cache::{Cache, Envelope};
use ea_core::config::Settings;
use ea_core::error::AdapterError;
use ea_core::ratelimit::FixedIntervalLimiter;
use ea_core::requester::{Dispatcher, Requester, RequesterConfig};
use ea_core::subscription::SubscriptionSet;
use ea_core::transport::{BackgroundContext, RequestContext, Transport};
use futures_util::future::BoxFuture;
use http::Method;
use serde_json::json;

struct EchoTransport;

#[async_trait]
impl Transport for EchoTransport {
  fn name(&self) -> &'static str {
    "echo"
  }

  fn foreground_execute<'a>(&'a self, ctx: &'a RequestContext) -> Option<BoxFuture<'a, Result<Envelope, AdapterError>>> {
    let input = ctx.input.clone();
    Some(Box::pin(async move { Ok(Envelope::success(input, 0, 1000)) }))
  }

  async fn background_execute(&self, _ctx: &BackgroundContext) -> Result<(), AdapterError> {
    Ok(())
  }

  fn background_interval(&self) -> Duration {
    Duration::from_secs(3600)
  }
}

struct NeverProducesTransport;

#[async_trait]
impl Transport for NeverProducesTransport {
  fn name(&self) -> &'static str {
    "never"
  }

  async fn background_execute(&self, _ctx: &BackgroundContext) -> Result<(), AdapterError> {
    Ok(())
  }

  fn background_interval(&self) -> Duration {
    Duration::from_secs(3600)
  }
}

fn json_request(method: Method, uri: &str, body: serde_json::Value) -> http::Request<TakoBody> {
  http::Request::builder()
    .method(method)
    .uri(uri)
    .header(http::header::CONTENT_TYPE, "application/json")
    .body(TakoBody::new(http_body_util::Full::from(Bytes::from(body.to_string()))))
    .unwrap()
}

/// A full inbound POST goes through the router, the foreground handler, a
/// synchronous transport, and back out as a 200 with the echoed input.
#[tokio::test]
async fn foreground_request_round_trips_through_the_router() {
  let cache: Arc<dyn Cache> = Arc::new(LocalCache::new(10));
  let settings = Settings::load(vec![]).unwrap();
  let adapter = Adapter::new("TEST", Arc::new(EchoTransport), cache, settings);
  let router = adapter.into_router();

  let request = json_request(Method::POST, "/", json!({"data": {"base": "BTC", "quote": "USD"}}));
  let response = router.dispatch(request).await;

  assert_eq!(response.status(), http::StatusCode::OK);
}

/// A purely background transport with nothing cached yet exhausts the
/// foreground poll budget and the router surfaces it as 504.
#[tokio::test]
async fn cache_poll_exhaustion_surfaces_504() {
  let cache: Arc<dyn Cache> = Arc::new(LocalCache::new(10));
  let settings = Settings::load(vec![]).unwrap();
  let adapter = Adapter::new("TEST", Arc::new(NeverProducesTransport), cache, settings);
  let router = adapter.into_router();

  let request = json_request(Method::POST, "/", json!({"data": {}}));
  let response = router.dispatch(request).await;

  assert_eq!(response.status(), http::StatusCode::GATEWAY_TIMEOUT);
}

struct CountingDispatcher(AtomicU32);

#[async_trait]
impl Dispatcher for CountingDispatcher {
  async fn dispatch(&self, _key: &str, input: &serde_json::Value) -> Result<Envelope, AdapterError> {
    self.0.fetch_add(1, Ordering::SeqCst);
    Ok(Envelope::success(input.clone(), 0, 1000))
  }
}

/// Many concurrent callers requesting the same key collapse into exactly one
/// outbound dispatch (I3), and every caller observes its result.
#[tokio::test]
async fn concurrent_duplicate_requests_coalesce_into_one_outbound_call() {
  let dispatcher = Arc::new(CountingDispatcher(AtomicU32::new(0)));
  let limiter: Arc<dyn ea_core::ratelimit::RateLimiter> = Arc::new(FixedIntervalLimiter::new(Duration::from_millis(0)));
  let requester = Requester::new(dispatcher.clone(), limiter, RequesterConfig::default());

  let mut handles = Vec::new();
  for _ in 0..20 {
    let requester = requester.clone();
    handles.push(tokio::spawn(async move { requester.submit("shared-key".into(), json!({"value": 1})).await }));
  }

  for handle in handles {
    let result = handle.await.unwrap();
    assert!(result.is_ok());
  }

  assert_eq!(dispatcher.0.load(Ordering::SeqCst), 1);
}

/// Registering more distinct keys than the subscription set's capacity
/// evicts the entry with the earliest expiry rather than rejecting the new
/// registration (I8), even when registrations race across tasks.
#[tokio::test]
async fn subscription_overflow_evicts_oldest_under_concurrent_registration() {
  let set = Arc::new(SubscriptionSet::new(5, Duration::from_secs(300)));

  for i in 0..5 {
    set.touch(&format!("key-{i}"), &json!({}), "ws");
    tokio::time::sleep(Duration::from_millis(1)).await;
  }
  assert_eq!(set.len(), 5);

  set.touch("key-new", &json!({}), "ws");

  assert_eq!(set.len(), 5);
  assert!(set.entries_for("ws").iter().any(|e| e.key == "key-new"));
  assert!(!set.entries_for("ws").iter().any(|e| e.key == "key-0"));
}

/// Invariant E end to end: a cache written with a success, then written
/// again with an error for the same key, keeps the success.
#[tokio::test]
async fn error_write_does_not_overwrite_a_cached_success_end_to_end() {
  let cache = LocalCache::new(10);
  let key = "btc-usd";

  cache.set(key, Envelope::success(json!({"price": 42}), 0, 30_000), Duration::from_secs(30)).await;
  cache.set(key, Envelope::error(502, "upstream exploded", None, 1), Duration::from_secs(30)).await;

  let entry = cache.get(key).await.expect("entry present");
  assert!(entry.envelope.is_success());
  assert_eq!(entry.envelope.data, json!({"price": 42}));
}

/// An endpoint that doesn't exist on the adapter is a 400, not a 504 or a
/// panic (spec.md §6: "`endpoint` selects the endpoint ... 400 if neither").
#[tokio::test]
async fn unknown_endpoint_surfaces_400() {
  let cache: Arc<dyn Cache> = Arc::new(LocalCache::new(10));
  let settings = Settings::load(vec![]).unwrap();
  let adapter = Adapter::new("TEST", Arc::new(EchoTransport), cache, settings);
  let router = adapter.into_router();

  let request = json_request(Method::POST, "/", json!({"endpoint": "does-not-exist", "data": {}}));
  let response = router.dispatch(request).await;

  assert_eq!(response.status(), http::StatusCode::BAD_REQUEST);
}
