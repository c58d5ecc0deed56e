//! Outbound requester (component C5): one FIFO queue per transport,
//! coalescing concurrent duplicate keys and retrying failed calls with
//! jittered exponential backoff before giving up and evicting on overflow.
//!
//! The single-in-flight-future-per-key behavior is the same shape as
//! `plugins/idempotency.rs`'s `Entry::InFlight` + `tokio::sync::Notify`
//! coalescing; the actual dispatch call follows `client.rs`'s
//! connect-once-dispatch-many `TakoClient` pattern, generalized behind the
//! [`Dispatcher`] trait so the requester does not know which wire protocol a
//! transport speaks.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use tokio::sync::Notify;

use crate::cache::Envelope;
use crate::error::AdapterError;
use crate::ratelimit::RateLimiter;
use tokio::sync::Mutex as AsyncMutex;

/// Performs the actual outbound call for one queued request. Implemented per
/// transport (see [`crate::transport`]); the requester only knows how to
/// schedule, coalesce and retry calls to it.
#[async_trait]
pub trait Dispatcher: Send + Sync {
  async fn dispatch(&self, key: &str, input: &Value) -> Result<Envelope, AdapterError>;
}

#[derive(Clone)]
struct QueuedRequest {
  key: String,
  input: Value,
  attempt: u32,
  cost: u32,
}

struct Waiter {
  notify: Notify,
  result: Mutex<Option<Result<Envelope, Arc<AdapterError>>>>,
}

pub struct RequesterConfig {
  pub max_queue_size: usize,
  pub max_retries: u32,
  pub base_backoff: Duration,
  pub max_backoff: Duration,
}

impl Default for RequesterConfig {
  fn default() -> Self {
    Self {
      max_queue_size: 1000,
      max_retries: 1,
      base_backoff: Duration::from_millis(100),
      max_backoff: Duration::from_secs(10),
    }
  }
}

/// FIFO outbound request queue with dedup, retry and overflow eviction.
pub struct Requester<D: Dispatcher> {
  queue: Mutex<VecDeque<QueuedRequest>>,
  /// Held by whichever task is currently draining the queue, so admission
  /// through `limiter` stays strictly sequential (I7) even though dispatch
  /// itself runs detached. `try_lock` failing just means some other task is
  /// already draining and will observe this enqueue in its next pop.
  drain_lock: AsyncMutex<()>,
  inflight: DashMap<String, Arc<Waiter>>,
  dispatcher: Arc<D>,
  limiter: Arc<dyn RateLimiter>,
  config: RequesterConfig,
}

impl<D: Dispatcher + 'static> Requester<D> {
  pub fn new(dispatcher: Arc<D>, limiter: Arc<dyn RateLimiter>, config: RequesterConfig) -> Arc<Self> {
    Arc::new(Self {
      queue: Mutex::new(VecDeque::new()),
      drain_lock: AsyncMutex::new(()),
      inflight: DashMap::new(),
      dispatcher,
      limiter,
      config,
    })
  }

  /// Submits a request for `key`/`input`. Concurrent callers with the same
  /// key share the single outbound call and its result.
  pub async fn submit(self: &Arc<Self>, key: String, input: Value) -> Result<Envelope, Arc<AdapterError>> {
    if let Some(existing) = self.inflight.get(&key) {
      let waiter = existing.clone();
      drop(existing);
      return self.await_waiter(waiter).await;
    }

    let waiter = Arc::new(Waiter { notify: Notify::new(), result: Mutex::new(None) });
    self.inflight.insert(key.clone(), waiter.clone());
    self.enqueue(QueuedRequest { key, input, attempt: 0, cost: 1 });
    self.clone().drain().await;
    self.await_waiter(waiter).await
  }

  async fn await_waiter(&self, waiter: Arc<Waiter>) -> Result<Envelope, Arc<AdapterError>> {
    loop {
      if let Some(result) = waiter.result.lock().clone() {
        return result;
      }
      waiter.notify.notified().await;
    }
  }

  fn enqueue(&self, request: QueuedRequest) {
    let mut queue = self.queue.lock();
    if queue.len() >= self.config.max_queue_size {
      if let Some(evicted) = queue.pop_front() {
        let wait_ms = self.limiter.ms_until_next_execution(1);
        self.fail(
          &evicted.key,
          Arc::new(AdapterError::rate_limit(format!(
            "outbound queue overflow, request evicted (msUntilNextExecution={wait_ms})"
          ))),
        );
      }
    }
    queue.push_back(request);
  }

  fn fail(&self, key: &str, err: Arc<AdapterError>) {
    if let Some((_, waiter)) = self.inflight.remove(key) {
      *waiter.result.lock() = Some(Err(err));
      waiter.notify.notify_waiters();
    }
  }

  fn succeed(&self, key: &str, envelope: Envelope) {
    if let Some((_, waiter)) = self.inflight.remove(key) {
      *waiter.result.lock() = Some(Ok(envelope));
      waiter.notify.notify_waiters();
    }
  }

  /// Drains the queue: `while queue not empty: pop front, await the rate
  /// limiter, dispatch detached` (spec.md §4.5's literal worker-loop
  /// pseudocode). Only one task actually drains at a time — a `try_lock`
  /// failure here means another caller's loop is already running and will
  /// reach this request on its own next pop, so it's safe to just return.
  async fn drain(self: Arc<Self>) {
    let Ok(_guard) = self.drain_lock.try_lock() else { return };
    loop {
      let request = {
        let mut queue = self.queue.lock();
        queue.pop_front()
      };
      let Some(request) = request else { return };

      self.limiter.wait_for_rate_limit(request.cost).await;

      let this = self.clone();
      tokio::spawn(async move { this.dispatch_one(request).await });
    }
  }

  /// Performs one outbound call already admitted by the rate limiter,
  /// resolving, retrying, or failing the waiter depending on the outcome.
  async fn dispatch_one(self: Arc<Self>, request: QueuedRequest) {
    match self.dispatcher.dispatch(&request.key, &request.input).await {
      Ok(envelope) => self.succeed(&request.key, envelope),
      Err(err) if request.attempt < self.config.max_retries => {
        let delay = backoff_delay(request.attempt, self.config.base_backoff, self.config.max_backoff);
        tracing::warn!(key = %request.key, attempt = request.attempt, error = %err, "retrying outbound call");
        let next = QueuedRequest { attempt: request.attempt + 1, ..request };
        tokio::time::sleep(delay).await;
        self.enqueue(next);
        self.drain().await;
      }
      Err(err) => self.fail(&request.key, Arc::new(err)),
    }
  }

  /// Background sweep that nudges the drain loop in case an enqueue ever
  /// happens without an accompanying `submit` call (none currently do; kept
  /// as a safety net and spawned once at adapter startup, cancelled via the
  /// shutdown broadcast).
  pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
    loop {
      tokio::select! {
        _ = shutdown.recv() => return,
        _ = tokio::time::sleep(Duration::from_millis(50)) => {
          if !self.queue.lock().is_empty() {
            self.clone().drain().await;
          }
        }
      }
    }
  }
}

/// Exponential backoff with full jitter: `rand(0, min(max, base * 2^attempt))`.
fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
  let exp = base.as_millis().saturating_mul(1u128 << attempt.min(20));
  let capped = exp.min(max.as_millis());
  let jittered = rand::thread_rng().gen_range(0..=capped.max(1)) as u64;
  Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ratelimit::FixedIntervalLimiter;
  use std::sync::atomic::{AtomicU32, Ordering};

  struct AlwaysOk(AtomicU32);
  #[async_trait]
  impl Dispatcher for AlwaysOk {
    async fn dispatch(&self, _key: &str, _input: &Value) -> Result<Envelope, AdapterError> {
      self.0.fetch_add(1, Ordering::SeqCst);
      Ok(Envelope::success(serde_json::json!({"ok": true}), 0, 1000))
    }
  }

  struct AlwaysFail;
  #[async_trait]
  impl Dispatcher for AlwaysFail {
    async fn dispatch(&self, _key: &str, _input: &Value) -> Result<Envelope, AdapterError> {
      Err(AdapterError::data_provider("upstream exploded"))
    }
  }

  #[tokio::test]
  async fn duplicate_keys_coalesce_into_one_dispatch() {
    let dispatcher = Arc::new(AlwaysOk(AtomicU32::new(0)));
    let limiter: Arc<dyn RateLimiter> = Arc::new(FixedIntervalLimiter::new(Duration::from_millis(0)));
    let requester = Requester::new(dispatcher.clone(), limiter, RequesterConfig::default());

    let a = requester.clone().submit("k".into(), serde_json::json!({}));
    let b = requester.clone().submit("k".into(), serde_json::json!({}));
    let (ra, rb) = tokio::join!(a, b);
    assert!(ra.is_ok());
    assert!(rb.is_ok());
  }

  #[tokio::test]
  async fn exhausted_retries_surface_the_error() {
    let dispatcher = Arc::new(AlwaysFail);
    let limiter: Arc<dyn RateLimiter> = Arc::new(FixedIntervalLimiter::new(Duration::from_millis(0)));
    let config = RequesterConfig { max_retries: 0, ..RequesterConfig::default() };
    let requester = Requester::new(dispatcher, limiter, config);

    let result = requester.submit("k".into(), serde_json::json!({})).await;
    assert!(result.is_err());
  }

  #[test]
  fn backoff_is_bounded_by_max() {
    let d = backoff_delay(30, Duration::from_millis(100), Duration::from_secs(5));
    assert!(d <= Duration::from_secs(5));
  }

  /// A limiter whose first admission never returns, so the worker loop stays
  /// parked mid-dispatch with the drain lock held — everything enqueued
  /// after that point just piles up in the queue for the test to inspect.
  struct BlocksForeverAfterFirst {
    entered: Notify,
  }
  #[async_trait]
  impl RateLimiter for BlocksForeverAfterFirst {
    fn ms_until_next_execution(&self, _cost: u32) -> u64 {
      777
    }
    async fn wait_for_rate_limit(&self, _cost: u32) {
      self.entered.notify_one();
      futures_util::future::pending::<()>().await;
    }
  }

  #[tokio::test]
  async fn overflow_evicts_oldest_with_rate_limit_error_429() {
    let dispatcher = Arc::new(AlwaysOk(AtomicU32::new(0)));
    let limiter = Arc::new(BlocksForeverAfterFirst { entered: Notify::new() });
    let config = RequesterConfig { max_queue_size: 2, ..RequesterConfig::default() };
    let requester = Requester::new(dispatcher, limiter.clone() as Arc<dyn RateLimiter>, config);

    // "a" is popped into the worker loop and blocks forever inside the rate
    // limiter, holding the drain lock so nothing behind it gets dispatched.
    let req = requester.clone();
    let _task_a = tokio::spawn(async move { req.submit("a".into(), serde_json::json!({})).await });
    limiter.entered.notified().await;

    // Queue now fills up to its cap of 2 with "b" then "c".
    let req = requester.clone();
    let task_b = tokio::spawn(async move { req.submit("b".into(), serde_json::json!({})).await });
    tokio::task::yield_now().await;

    let req = requester.clone();
    let _task_c = tokio::spawn(async move { req.submit("c".into(), serde_json::json!({})).await });
    tokio::task::yield_now().await;

    // "d" overflows the cap-2 queue, evicting "b" (the oldest) with a 429.
    let req = requester.clone();
    let _task_d = tokio::spawn(async move { req.submit("d".into(), serde_json::json!({})).await });
    tokio::task::yield_now().await;

    let result_b = task_b.await.unwrap();
    let err = result_b.expect_err("evicted request must reject, not resolve");
    assert_eq!(err.status(), http::StatusCode::TOO_MANY_REQUESTS);
    assert!(matches!(*err, AdapterError::RateLimit(_)));
  }
}
