//! Outbound rate limiting (component C4).
//!
//! Unlike `plugins::rate_limiter`, which throttles *callers of this
//! process*, these limiters throttle *this process's calls to upstream
//! providers* — one limiter per provider or provider group, admission-ordered
//! per the concurrency model in spec.md §5: a call to `wait_for_rate_limit`
//! is strictly sequential with respect to every other call on the same
//! limiter instance, so the [`crate::requester::Requester`] worker loop can
//! await it directly between dequeuing one request and dispatching it
//! (I7, FIFO admission).

pub mod burst;
pub mod fixed;

use async_trait::async_trait;

pub use burst::BurstLimiter;
pub use fixed::FixedIntervalLimiter;

/// Contract shared by both limiter strategies (`msUntilNextExecution`/
/// `waitForRateLimit` from spec.md §4.4, renamed to the crate's snake_case
/// convention). `cost` lets one call spend more than a single unit of
/// budget; callers that don't care pass `1`.
#[async_trait]
pub trait RateLimiter: Send + Sync {
  /// Milliseconds until a call of the given `cost` would be admitted if
  /// requested right now. Best-effort under contention: a limiter currently
  /// serving another `wait_for_rate_limit` call may return a stale estimate
  /// rather than block.
  fn ms_until_next_execution(&self, cost: u32) -> u64;

  /// Blocks until a call of the given `cost` is admitted, then reserves it.
  async fn wait_for_rate_limit(&self, cost: u32);
}

pub(crate) fn now_ms() -> i64 {
  use std::time::{SystemTime, UNIX_EPOCH};
  SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}
