//! Sensitive-value log redaction.
//!
//! Every setting declared with [`crate::config::SettingDef::sensitive`] gets
//! its resolved value registered here, and a `tracing_subscriber::Layer`
//! scrubs any event field containing one of those values before it reaches
//! the subscriber's writer. This follows the teacher's structured-tracing
//! setup (`src/tracing.rs`, feature `ea-tracing`) rather than hand-rolling a
//! println-based logger.

use std::fmt;

use tracing::field::{Field, Visit};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::config::SENSITIVE_NAMES;

/// Replaces every occurrence of a registered sensitive setting's value with
/// `[<NAME> REDACTED]` (spec.md §6), the setting's own name interpolated in.
fn redact(input: &str) -> String {
  let names = SENSITIVE_NAMES.read();
  let mut out = input.to_string();
  for (name, secret) in names.iter() {
    if !secret.is_empty() && out.contains(secret.as_str()) {
      out = out.replace(secret.as_str(), &format!("[{name} REDACTED]"));
    }
  }
  out
}

struct RedactingVisitor<'a> {
  writer: &'a mut dyn fmt::Write,
}

impl<'a> Visit for RedactingVisitor<'a> {
  fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
    let rendered = redact(&format!("{value:?}"));
    let _ = write!(self.writer, "{}={} ", field.name(), rendered);
  }

  fn record_str(&mut self, field: &Field, value: &str) {
    let _ = write!(self.writer, "{}={} ", field.name(), redact(value));
  }
}

/// A `tracing_subscriber::Layer` that redacts sensitive setting values from event output.
pub struct CensorLayer;

impl<S> Layer<S> for CensorLayer
where
  S: tracing::Subscriber,
{
  fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
    let mut line = String::new();
    let mut visitor = RedactingVisitor { writer: &mut line };
    event.record(&mut visitor);
    if !line.is_empty() {
      eprintln!("{} {}", event.metadata().level(), line.trim_end());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn redact_replaces_registered_secrets() {
    SENSITIVE_NAMES.write().push(("API_TOKEN".to_string(), "super-secret-token".to_string()));
    let msg = "connecting with token=super-secret-token now";
    assert_eq!(redact(msg), "connecting with token=[API_TOKEN REDACTED] now");
  }
}
