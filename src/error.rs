//! Error taxonomy for adapter request handling.
//!
//! `AdapterError` is the single error type threaded through the foreground
//! handler, the requester and the transports. Each variant maps onto one of
//! the HTTP status codes an External Adapter is expected to return, and
//! carries enough detail to build the JSON error envelope without leaking
//! internals unless `DEBUG` is enabled.

use std::fmt;

use http::StatusCode;
use serde::Serialize;

use crate::{body::TakoBody, responder::Responder, types::Response};

/// Errors produced anywhere in the request lifecycle.
#[derive(Debug, Clone)]
pub enum AdapterError {
  /// Caller supplied a request the key deriver or a transport rejected.
  Input(String),
  /// An outbound or inbound caller is over its rate budget.
  RateLimit(String),
  /// No cached result became available before the foreground deadline.
  Timeout(String),
  /// The upstream provider replied with an error.
  DataProvider {
    message: String,
    cause: Option<String>,
    /// The upstream's own HTTP status code, when the transport captured one.
    /// Surfaced as the error envelope's `providerStatusCode` (spec.md §7).
    provider_status: Option<u16>,
  },
  /// The outbound connection to a provider could not be established or broke mid-flight.
  Connection(String),
  /// Anything else: configuration, internal invariants, unexpected panics converted upstream.
  Other { message: String, cause: Option<String> },
}

impl AdapterError {
  pub fn input(msg: impl Into<String>) -> Self {
    Self::Input(msg.into())
  }

  pub fn rate_limit(msg: impl Into<String>) -> Self {
    Self::RateLimit(msg.into())
  }

  pub fn timeout(msg: impl Into<String>) -> Self {
    Self::Timeout(msg.into())
  }

  pub fn data_provider(msg: impl Into<String>) -> Self {
    Self::DataProvider { message: msg.into(), cause: None, provider_status: None }
  }

  /// A [`AdapterError::DataProvider`] that also carries the upstream's own
  /// HTTP status code, for `providerStatusCode` in the error envelope.
  pub fn data_provider_with_status(msg: impl Into<String>, provider_status: u16) -> Self {
    Self::DataProvider { message: msg.into(), cause: None, provider_status: Some(provider_status) }
  }

  pub fn connection(msg: impl Into<String>) -> Self {
    Self::Connection(msg.into())
  }

  pub fn other(msg: impl Into<String>) -> Self {
    Self::Other { message: msg.into(), cause: None }
  }

  pub fn with_cause(self, cause: impl fmt::Display) -> Self {
    match self {
      Self::DataProvider { message, provider_status, .. } => Self::DataProvider {
        message,
        cause: Some(cause.to_string()),
        provider_status,
      },
      Self::Other { message, .. } => Self::Other {
        message,
        cause: Some(cause.to_string()),
      },
      other => other,
    }
  }

  /// The upstream's own HTTP status code, when known (only ever set on
  /// [`AdapterError::DataProvider`]). Surfaced as `providerStatusCode`.
  pub fn provider_status(&self) -> Option<u16> {
    match self {
      Self::DataProvider { provider_status, .. } => *provider_status,
      _ => None,
    }
  }

  /// Status code this error should be reported as, per the adapter error taxonomy.
  pub fn status(&self) -> StatusCode {
    match self {
      Self::Input(_) => StatusCode::BAD_REQUEST,
      Self::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
      Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
      Self::DataProvider { .. } => StatusCode::BAD_GATEWAY,
      Self::Connection(_) => StatusCode::BAD_GATEWAY,
      Self::Other { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  fn name(&self) -> &'static str {
    match self {
      Self::Input(_) => "InputError",
      Self::RateLimit(_) => "RateLimitError",
      Self::Timeout(_) => "TimeoutError",
      Self::DataProvider { .. } => "DataProviderError",
      Self::Connection(_) => "ConnectionError",
      Self::Other { .. } => "AdapterError",
    }
  }

  fn message(&self) -> &str {
    match self {
      Self::Input(m) | Self::RateLimit(m) | Self::Timeout(m) | Self::Connection(m) => m,
      Self::DataProvider { message, .. } | Self::Other { message, .. } => message,
    }
  }

  fn cause(&self) -> Option<&str> {
    match self {
      Self::DataProvider { cause, .. } | Self::Other { cause, .. } => cause.as_deref(),
      _ => None,
    }
  }
}

impl fmt::Display for AdapterError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.name(), self.message())
  }
}

impl std::error::Error for AdapterError {}

/// The JSON error envelope spec.md §7 specifies literally: `{ status:
/// "errored", statusCode, providerStatusCode?, error: { name, message, ... } }`.
#[derive(Serialize)]
struct ErrorBody<'a> {
  status: &'static str,
  #[serde(rename = "statusCode")]
  status_code: u16,
  #[serde(rename = "providerStatusCode", skip_serializing_if = "Option::is_none")]
  provider_status_code: Option<u16>,
  error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
  name: &'static str,
  message: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  cause: Option<&'a str>,
}

impl Responder for AdapterError {
  fn into_response(self) -> Response {
    let status = self.status();
    let debug = crate::config::debug_enabled();
    tracing::error!(error = %self, status = %status, "adapter error");

    let body = ErrorBody {
      status: "errored",
      status_code: status.as_u16(),
      provider_status_code: self.provider_status(),
      error: ErrorDetail {
        name: self.name(),
        message: self.message(),
        cause: if debug { self.cause() } else { None },
      },
    };

    let payload = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());
    hyper::Response::builder()
      .status(status)
      .header(http::header::CONTENT_TYPE, "application/json")
      .body(TakoBody::new(http_body_util::Full::from(bytes::Bytes::from(payload))))
      .unwrap_or_else(|_| hyper::Response::new(TakoBody::empty()))
  }
}

pub type AdapterResult<T> = Result<T, AdapterError>;

#[cfg(test)]
mod tests {
  use super::*;
  use http_body_util::BodyExt;

  async fn body_json(err: AdapterError) -> serde_json::Value {
    let response = err.into_response();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
  }

  #[tokio::test]
  async fn envelope_matches_the_spec_shape() {
    let body = body_json(AdapterError::rate_limit("queue overflow")).await;
    assert_eq!(body["status"], "errored");
    assert_eq!(body["statusCode"], 429);
    assert_eq!(body["error"]["name"], "RateLimitError");
    assert_eq!(body["error"]["message"], "queue overflow");
    assert!(body.get("providerStatusCode").is_none());
  }

  #[tokio::test]
  async fn provider_status_code_surfaces_when_set() {
    let body = body_json(AdapterError::data_provider_with_status("rejected", 503)).await;
    assert_eq!(body["statusCode"], 502);
    assert_eq!(body["providerStatusCode"], 503);
    assert_eq!(body["error"]["name"], "DataProviderError");
  }

  #[test]
  fn status_codes_match_the_error_taxonomy() {
    assert_eq!(AdapterError::input("x").status(), StatusCode::BAD_REQUEST);
    assert_eq!(AdapterError::rate_limit("x").status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(AdapterError::timeout("x").status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(AdapterError::data_provider("x").status(), StatusCode::BAD_GATEWAY);
    assert_eq!(AdapterError::connection("x").status(), StatusCode::BAD_GATEWAY);
    assert_eq!(AdapterError::other("x").status(), StatusCode::INTERNAL_SERVER_ERROR);
  }
}
