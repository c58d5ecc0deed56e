//! Response envelope: the shape every cached result and HTTP response body takes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::body::TakoBody;
use crate::responder::Responder;
use crate::types::Response;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
  Success,
  Error,
}

/// `meta.feedId` (spec.md §3): the human-readable identifier derived from a
/// request's parameters, carried alongside the envelope for metrics labels.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvelopeMeta {
  #[serde(rename = "feedId")]
  pub feed_id: String,
}

/// `timestamps` (spec.md §3): when the provider call went out, when its
/// response (or an upstream-pushed message, for a streaming transport) came
/// back, and optionally what time the provider itself claims the value is
/// current as of.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EnvelopeTimestamps {
  #[serde(rename = "providerRequestedMs")]
  pub provider_requested_ms: u64,
  #[serde(rename = "providerReceivedMs")]
  pub provider_received_ms: u64,
  #[serde(rename = "providerIndicatedMs", skip_serializing_if = "Option::is_none")]
  pub provider_indicated_ms: Option<u64>,
}

impl EnvelopeTimestamps {
  pub fn at(requested_and_received_ms: u64) -> Self {
    Self {
      provider_requested_ms: requested_and_received_ms,
      provider_received_ms: requested_and_received_ms,
      provider_indicated_ms: None,
    }
  }
}

/// The value a foreground or background request ultimately produces, and
/// what gets written into the cache for every subsequent reader.
///
/// Carries both `result` (spec.md §3's scalar-or-null field most EA callers
/// read directly) and `data` (the arbitrary-object companion, for fields a
/// caller wants beyond the one result value) — a transport that only has a
/// single scalar to report sets `result` and leaves `data` null, matching
/// spec.md §8 scenario 1's literal `{result: 42}` envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
  pub status: EnvelopeStatus,
  #[serde(rename = "statusCode")]
  pub status_code: u16,
  #[serde(skip_serializing_if = "Value::is_null")]
  pub result: Value,
  pub data: Value,
  #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
  pub error_message: Option<String>,
  #[serde(rename = "providerStatusCode", skip_serializing_if = "Option::is_none")]
  pub provider_status_code: Option<u16>,
  pub timestamps: EnvelopeTimestamps,
  #[serde(rename = "maxAge")]
  pub max_age_ms: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub meta: Option<EnvelopeMeta>,
}

impl Envelope {
  /// `updated_at_ms` stamps both `timestamps.providerRequestedMs` and
  /// `providerReceivedMs` — callers that track the two separately (a
  /// transport that measures outbound-call latency) should follow with
  /// [`Envelope::with_timestamps`].
  pub fn success(data: Value, updated_at_ms: u64, max_age_ms: u64) -> Self {
    Self {
      status: EnvelopeStatus::Success,
      status_code: 200,
      result: Value::Null,
      data,
      error_message: None,
      provider_status_code: None,
      timestamps: EnvelopeTimestamps::at(updated_at_ms),
      max_age_ms,
      meta: None,
    }
  }

  pub fn error(status_code: u16, message: impl Into<String>, provider_status_code: Option<u16>, updated_at_ms: u64) -> Self {
    Self {
      status: EnvelopeStatus::Error,
      status_code,
      result: Value::Null,
      data: Value::Null,
      error_message: Some(message.into()),
      provider_status_code,
      timestamps: EnvelopeTimestamps::at(updated_at_ms),
      max_age_ms: 0,
      meta: None,
    }
  }

  pub fn is_success(&self) -> bool {
    self.status == EnvelopeStatus::Success
  }

  /// Sets `result` — the scalar-or-null value most EA callers read directly,
  /// distinct from the broader `data` object (spec.md §3).
  pub fn with_result(mut self, result: Value) -> Self {
    self.result = result;
    self
  }

  /// Overrides the default same-instant `providerRequestedMs`/`providerReceivedMs`
  /// pair with timing a transport measured itself.
  pub fn with_timestamps(mut self, timestamps: EnvelopeTimestamps) -> Self {
    self.timestamps = timestamps;
    self
  }

  /// Stamps the feed id derived from a request's parameters onto this envelope.
  pub fn with_feed_id(mut self, feed_id: String) -> Self {
    self.meta = Some(EnvelopeMeta { feed_id });
    self
  }
}

impl Responder for Envelope {
  fn into_response(self) -> Response {
    let status = http::StatusCode::from_u16(self.status_code).unwrap_or(http::StatusCode::OK);
    let payload = serde_json::to_vec(&self).unwrap_or_else(|_| b"{}".to_vec());
    hyper::Response::builder()
      .status(status)
      .header(http::header::CONTENT_TYPE, "application/json")
      .body(TakoBody::new(http_body_util::Full::from(bytes::Bytes::from(payload))))
      .unwrap_or_else(|_| hyper::Response::new(TakoBody::empty()))
  }
}
