//! Transport abstraction (component C7): the capability-set contract
//! concrete upstream integrations implement. The crate ships no parser for
//! any particular provider's wire format — that is explicitly out of scope —
//! but does ship two reference shapes ([`request_response`] and
//! [`streaming`]) plus a composing [`meta`] transport, grounded on the
//! duck-typed transport design note and on the teacher's `TakoPlugin` trait
//! (`name()` + `setup()`) as the precedent for "a small trait object registry
//! the router drives generically".

pub mod meta;
pub mod request_response;
pub mod streaming;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::cache::Envelope;
use crate::error::AdapterError;

/// Context for a single foreground caller's request.
pub struct RequestContext {
  pub key: String,
  pub input: Value,
}

/// Context for one iteration of the background scheduler loop.
pub struct BackgroundContext {
  pub transport_name: &'static str,
}

/// A transport's upstream wire-protocol class, per spec.md §4.8/§6's
/// `BACKGROUND_EXECUTE_MS_{HTTP,WS,SSE}` per-transport-class background loop
/// interval. Used only to pick which of those three settings governs a given
/// transport's [`Transport::background_interval`] at wiring time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportClass {
  Http,
  Ws,
  Sse,
}

impl TransportClass {
  /// The `BACKGROUND_EXECUTE_MS_*` setting name governing this class.
  pub fn setting_name(self) -> &'static str {
    match self {
      TransportClass::Http => "BACKGROUND_EXECUTE_MS_HTTP",
      TransportClass::Ws => "BACKGROUND_EXECUTE_MS_WS",
      TransportClass::Sse => "BACKGROUND_EXECUTE_MS_SSE",
    }
  }
}

/// Capability set a concrete upstream integration implements.
///
/// Only `name`, `background_execute` and `background_interval` are required;
/// `register_request` and `foreground_execute` default to no-ops so a
/// purely-background (subscription-style) transport doesn't need to
/// implement a synchronous request/response path, and vice versa.
#[async_trait]
pub trait Transport: Send + Sync {
  fn name(&self) -> &'static str;

  /// Called by the foreground handler to record that `ctx` is wanted, before
  /// it starts polling the cache. Default: no-op (purely request/response
  /// transports service calls inline in `foreground_execute` instead).
  async fn register_request(&self, _ctx: &RequestContext) -> Result<(), AdapterError> {
    Ok(())
  }

  /// Services a request synchronously and returns its result directly,
  /// bypassing the background loop and cache poll. Transports that only
  /// produce data in the background (e.g. a WS subscription) return `None`.
  fn foreground_execute<'a>(&'a self, _ctx: &'a RequestContext) -> Option<BoxFuture<'a, Result<Envelope, AdapterError>>> {
    None
  }

  /// One iteration of this transport's background work: refresh
  /// subscriptions, poll upstreams, write results to the cache.
  async fn background_execute(&self, ctx: &BackgroundContext) -> Result<(), AdapterError>;

  /// How often the background scheduler loop should call `background_execute`.
  fn background_interval(&self) -> Duration;
}
