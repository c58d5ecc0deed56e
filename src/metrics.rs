//! Prometheus exposition (component A2), gated behind the `metrics-prometheus`
//! feature following the teacher's own `metrics-prometheus = ["dep:prometheus", ...]`
//! feature pattern. Counts requests and cache outcomes; scraped at `/metrics`.

#![cfg(feature = "metrics-prometheus")]

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub struct Metrics {
  pub registry: Registry,
  pub requests_total: IntCounter,
  pub cache_hits_total: IntCounter,
  pub cache_misses_total: IntCounter,
  pub transport_errors_total: IntCounterVec,
}

impl Metrics {
  fn new() -> Self {
    let registry = Registry::new();

    let requests_total = IntCounter::new("ea_requests_total", "Foreground requests served").expect("valid metric");
    let cache_hits_total = IntCounter::new("ea_cache_hits_total", "Foreground requests served from cache").expect("valid metric");
    let cache_misses_total = IntCounter::new("ea_cache_misses_total", "Foreground requests that missed the cache").expect("valid metric");
    let transport_errors_total = IntCounterVec::new(
      Opts::new("ea_transport_errors_total", "Errors raised by a transport, by name"),
      &["transport"],
    )
    .expect("valid metric");

    registry.register(Box::new(requests_total.clone())).expect("register once");
    registry.register(Box::new(cache_hits_total.clone())).expect("register once");
    registry.register(Box::new(cache_misses_total.clone())).expect("register once");
    registry.register(Box::new(transport_errors_total.clone())).expect("register once");

    Self { registry, requests_total, cache_hits_total, cache_misses_total, transport_errors_total }
  }

  pub fn encode(&self) -> String {
    let families = self.registry.gather();
    let mut buf = Vec::new();
    TextEncoder::new().encode(&families, &mut buf).unwrap_or_default();
    String::from_utf8(buf).unwrap_or_default()
  }
}

static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

pub fn global() -> &'static Metrics {
  &METRICS
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn encode_includes_registered_series() {
    global().requests_total.inc();
    let text = global().encode();
    assert!(text.contains("ea_requests_total"));
  }
}
