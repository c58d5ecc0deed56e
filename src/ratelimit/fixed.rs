//! Fixed-interval admission control: at most one call per `period`, where
//! `period_ms = 1000 / min(perSec, perMin/60, perHour/3600)` (spec.md §4.4).
//!
//! The first call after construction always bypasses the period — the
//! accepted trade-off from spec.md §9 that a freshly restarted process
//! briefly looks like an un-rate-limited burst to a provider rather than
//! waiting out a full dead `period` before its very first call.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{RateLimiter, now_ms};

/// Sentinel meaning "no call admitted yet" — far enough in the past that
/// any real `now - last >= period_ms` comparison is trivially true.
const NEVER: i64 = i64::MIN / 2;

pub struct FixedIntervalLimiter {
  period_ms: i64,
  last_admitted_ms: AtomicI64,
  /// Serializes the whole check-then-sleep-then-update sequence so
  /// concurrent callers are admitted strictly in arrival order (spec.md §5).
  gate: Mutex<()>,
}

impl FixedIntervalLimiter {
  pub fn new(period: Duration) -> Self {
    Self {
      period_ms: period.as_millis() as i64,
      last_admitted_ms: AtomicI64::new(NEVER),
      gate: Mutex::new(()),
    }
  }

  /// Builds the limiter from the three rate tiers spec.md §4.4 describes:
  /// `periodMs = 1000 / min(perSec, perMin/60, perHour/3600)`. A tier of `0`
  /// is treated as "no limit from this tier".
  pub fn from_tiers(per_sec: f64, per_min: f64, per_hour: f64) -> Self {
    let candidates = [per_sec, per_min / 60.0, per_hour / 3600.0].into_iter().filter(|r| *r > 0.0);
    let slowest = candidates.fold(f64::INFINITY, f64::min);
    let period_ms = if slowest.is_finite() && slowest > 0.0 { (1000.0 / slowest).ceil() as i64 } else { 0 };
    Self::new(Duration::from_millis(period_ms.max(0) as u64))
  }

  fn wait_needed(&self, now: i64) -> i64 {
    let last = self.last_admitted_ms.load(Ordering::Acquire);
    let elapsed = now - last;
    if elapsed >= self.period_ms { 0 } else { self.period_ms - elapsed }
  }
}

#[async_trait]
impl RateLimiter for FixedIntervalLimiter {
  fn ms_until_next_execution(&self, _cost: u32) -> u64 {
    self.wait_needed(now_ms()).max(0) as u64
  }

  async fn wait_for_rate_limit(&self, _cost: u32) {
    let _guard = self.gate.lock().await;
    let wait = self.wait_needed(now_ms());
    if wait > 0 {
      tokio::time::sleep(Duration::from_millis(wait as u64)).await;
    }
    self.last_admitted_ms.store(now_ms(), Ordering::Release);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn first_call_bypasses_the_period() {
    let limiter = FixedIntervalLimiter::new(Duration::from_secs(60));
    assert_eq!(limiter.ms_until_next_execution(1), 0);
    limiter.wait_for_rate_limit(1).await;
  }

  #[tokio::test(start_paused = true)]
  async fn second_call_within_period_waits_out_the_remainder() {
    let limiter = FixedIntervalLimiter::new(Duration::from_millis(100));
    limiter.wait_for_rate_limit(1).await;
    assert!(limiter.ms_until_next_execution(1) > 0);

    let start = tokio::time::Instant::now();
    limiter.wait_for_rate_limit(1).await;
    assert!(start.elapsed() >= Duration::from_millis(100));
  }

  #[test]
  fn from_tiers_picks_the_slowest_rate() {
    // 1/sec, 120/min (=2/sec), 7200/hour (=2/sec) -> slowest is 1/sec -> period 1000ms.
    let limiter = FixedIntervalLimiter::from_tiers(1.0, 120.0, 7200.0);
    assert_eq!(limiter.period_ms, 1000);
  }
}
