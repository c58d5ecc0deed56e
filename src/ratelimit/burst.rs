//! Burst/credit admission control: per-second and per-minute windows
//! aligned to wall-clock boundaries (spec.md §4.4), generalized from
//! `plugins/rate_limiter.rs`'s per-IP token `Bucket` mechanics but following
//! the boundary-rollover shape spec.md describes rather than continuous
//! token refill, so `msUntilNextExecution` can report "time until the
//! window that's currently full rolls over" exactly.
//!
//! A cap of `0` means that tier is unbounded.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{RateLimiter, now_ms};

const SEC_MS: i64 = 1000;
const MIN_MS: i64 = 60_000;

struct Windows {
  sec_window_start: i64,
  sec_usage: u32,
  min_window_start: i64,
  min_usage: u32,
}

pub struct BurstLimiter {
  per_sec_cap: u32,
  per_min_cap: u32,
  state: Mutex<Windows>,
}

impl BurstLimiter {
  pub fn new(per_sec_cap: u32, per_min_cap: u32) -> Self {
    let now = now_ms();
    Self {
      per_sec_cap,
      per_min_cap,
      state: Mutex::new(Windows {
        sec_window_start: (now / SEC_MS) * SEC_MS,
        sec_usage: 0,
        min_window_start: (now / MIN_MS) * MIN_MS,
        min_usage: 0,
      }),
    }
  }

  /// Rolls `state`'s windows forward to `now`, resetting any counter whose
  /// boundary has been crossed since the last call.
  fn roll(state: &mut Windows, now: i64) {
    let sec_boundary = (now / SEC_MS) * SEC_MS;
    if sec_boundary > state.sec_window_start {
      state.sec_window_start = sec_boundary;
      state.sec_usage = 0;
    }
    let min_boundary = (now / MIN_MS) * MIN_MS;
    if min_boundary > state.min_window_start {
      state.min_window_start = min_boundary;
      state.min_usage = 0;
    }
  }

  /// `true` when admitting `cost` would keep both windows under cap.
  ///
  /// Follows spec.md §4.4's literal wording ("if both counters+cost < cap")
  /// rather than a `<=` off-by-one fix: a tier's cap is an exclusive bound
  /// on post-admission usage, so e.g. a cap of `1` never admits anything.
  /// Documented as a faithfully-carried spec quirk, not re-decided here.
  fn admits(&self, state: &Windows, cost: u32) -> bool {
    let sec_ok = self.per_sec_cap == 0 || state.sec_usage + cost < self.per_sec_cap;
    let min_ok = self.per_min_cap == 0 || state.min_usage + cost < self.per_min_cap;
    sec_ok && min_ok
  }

  fn wait_ms(&self, state: &Windows, now: i64, cost: u32) -> u64 {
    let sec_full = self.per_sec_cap != 0 && state.sec_usage + cost >= self.per_sec_cap;
    let min_full = self.per_min_cap != 0 && state.min_usage + cost >= self.per_min_cap;
    let to_sec = if sec_full { (state.sec_window_start + SEC_MS - now).max(0) } else { 0 };
    let to_min = if min_full { (state.min_window_start + MIN_MS - now).max(0) } else { 0 };
    to_sec.max(to_min) as u64
  }
}

#[async_trait]
impl RateLimiter for BurstLimiter {
  fn ms_until_next_execution(&self, cost: u32) -> u64 {
    let Ok(mut state) = self.state.try_lock() else { return 0 };
    let now = now_ms();
    Self::roll(&mut state, now);
    if self.admits(&state, cost) { 0 } else { self.wait_ms(&state, now, cost) }
  }

  async fn wait_for_rate_limit(&self, cost: u32) {
    let mut state = self.state.lock().await;
    loop {
      let now = now_ms();
      Self::roll(&mut state, now);
      if self.admits(&state, cost) {
        state.sec_usage += cost;
        state.min_usage += cost;
        return;
      }
      let wait = self.wait_ms(&state, now, cost);
      if wait > 0 {
        tokio::time::sleep(Duration::from_millis(wait)).await;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn admits_below_capacity() {
    let limiter = BurstLimiter::new(5, 0);
    limiter.wait_for_rate_limit(1).await;
    limiter.wait_for_rate_limit(1).await;
    assert_eq!(limiter.ms_until_next_execution(1), 0);
  }

  #[tokio::test]
  async fn full_second_window_reports_a_positive_wait() {
    let limiter = BurstLimiter::new(2, 0);
    limiter.wait_for_rate_limit(1).await;
    limiter.wait_for_rate_limit(1).await;
    // usage(2) + cost(1) is not < cap(2), so the second-window tier is full.
    assert!(limiter.ms_until_next_execution(1) > 0);
  }

  #[tokio::test(start_paused = true)]
  async fn waiting_past_the_second_boundary_admits_again() {
    let limiter = BurstLimiter::new(2, 0);
    limiter.wait_for_rate_limit(1).await;
    limiter.wait_for_rate_limit(1).await;

    let start = tokio::time::Instant::now();
    limiter.wait_for_rate_limit(1).await;
    assert!(start.elapsed() > Duration::ZERO);
  }

  #[tokio::test]
  async fn zero_cap_tier_is_unbounded() {
    let limiter = BurstLimiter::new(0, 0);
    for _ in 0..100 {
      limiter.wait_for_rate_limit(1).await;
    }
    assert_eq!(limiter.ms_until_next_execution(1), 0);
  }
}
