//! Deterministic cache key and feed id derivation (component C1).
//!
//! Given an adapter's canonical name, the endpoint and transport that will
//! service a request, and the caller's input parameters, this module
//! produces the stable, case-normalized strings the rest of the pipeline
//! indexes everything by: the cache key used by C2/C6, the subscription key
//! used by C3, and the coalescing key used by C5. It also derives the
//! human-readable feed id used for metrics labels.
//!
//! Canonicalization rules (spec.md §4.1): object keys are sorted
//! lexicographically, string leaf values are lowercased, and the canonical
//! JSON is hashed down to a fixed-size digest once it exceeds
//! [`KeyConfig::max_common_key_size`].

use base64::Engine;
use serde_json::Value;
use sha1::{Digest, Sha1};

/// Sentinel returned by [`feed_id`] when the input parameters object is empty.
pub const NO_FEED_ID: &str = "N/A";

/// Separates the components of a derived cache key.
const KEY_SEPARATOR: &str = "-";

/// The settings-derived knobs key derivation needs: `CACHE_PREFIX`,
/// `MAX_COMMON_KEY_SIZE` and `DEFAULT_CACHE_KEY` from spec.md §4.1/§6.
#[derive(Clone, Debug)]
pub struct KeyConfig {
  /// Prepended to every derived cache key, with its own separator. Empty means no prefix.
  pub cache_prefix: String,
  /// Above this many bytes, the canonical JSON is replaced by its SHA1/base64 digest.
  pub max_common_key_size: usize,
  /// Fingerprint used in place of the canonical JSON when parameters is empty.
  pub default_cache_key: String,
}

impl Default for KeyConfig {
  fn default() -> Self {
    Self { cache_prefix: String::new(), max_common_key_size: 500, default_cache_key: "default".to_string() }
  }
}

/// Recursively canonicalizes a JSON value: object keys sorted, string leaves lowercased.
fn canonicalize(value: &Value) -> Value {
  match value {
    Value::Object(map) => {
      let mut entries: Vec<(&String, &Value)> = map.iter().collect();
      entries.sort_by(|a, b| a.0.cmp(b.0));
      let mut out = serde_json::Map::with_capacity(entries.len());
      for (k, v) in entries {
        out.insert(k.clone(), canonicalize(v));
      }
      Value::Object(out)
    }
    Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
    Value::String(s) => Value::String(s.to_lowercase()),
    other => other.clone(),
  }
}

/// Produces the canonical JSON string for `input`: sorted keys, lowercased strings.
pub fn canonical_json(input: &Value) -> String {
  let canonical = canonicalize(input);
  serde_json::to_string(&canonical).unwrap_or_default()
}

fn is_empty_params(input: &Value) -> bool {
  match input {
    Value::Object(map) => map.is_empty(),
    Value::Null => true,
    _ => false,
  }
}

/// Canonicalizes `input` and hashes it down to a base64 SHA1 digest once it
/// exceeds `max_common_key_size` bytes. Truncation is never used so that two
/// distinct oversized parameter sets cannot collide on a shared prefix.
fn canonical_or_hash(input: &Value, max_common_key_size: usize) -> String {
  let canonical = canonical_json(input);
  if canonical.len() <= max_common_key_size {
    return canonical;
  }

  let mut hasher = Sha1::new();
  hasher.update(canonical.as_bytes());
  let digest = hasher.finalize();
  base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Derives the fingerprint for a set of input parameters (spec.md §4.1).
///
/// Returns `cfg.default_cache_key` when `input` carries no parameters;
/// otherwise the canonical JSON (or its hash, once oversized).
pub fn fingerprint(input: &Value, cfg: &KeyConfig) -> String {
  if is_empty_params(input) {
    return cfg.default_cache_key.clone();
  }
  canonical_or_hash(input, cfg.max_common_key_size)
}

/// Derives the feed id for a set of input parameters: the same canonical
/// string as [`fingerprint`], but without the adapter/endpoint prefix and
/// using [`NO_FEED_ID`] rather than `DEFAULT_CACHE_KEY` as the empty sentinel.
/// Used for metrics labels, not for cache lookups.
pub fn feed_id(input: &Value, cfg: &KeyConfig) -> String {
  if is_empty_params(input) {
    return NO_FEED_ID.to_string();
  }
  canonical_or_hash(input, cfg.max_common_key_size)
}

/// Builds the cache key: `[prefix-][adapter-]endpoint-transport-fingerprint`.
///
/// Including the endpoint and transport names keeps two endpoints (or two
/// transports behind the same endpoint, e.g. a meta-transport's sub-routes)
/// that happen to accept structurally identical input from colliding in the
/// shared cache.
pub fn default_cache_key(adapter_name: Option<&str>, endpoint_name: &str, transport_name: &str, input: &Value, cfg: &KeyConfig) -> String {
  let mut parts: Vec<&str> = Vec::with_capacity(4);
  if let Some(adapter) = adapter_name {
    if !adapter.is_empty() {
      parts.push(adapter);
    }
  }
  parts.push(endpoint_name);
  parts.push(transport_name);
  let fp = fingerprint(input, cfg);

  let joined = format!("{}{KEY_SEPARATOR}{fp}", parts.join(KEY_SEPARATOR));
  if cfg.cache_prefix.is_empty() {
    joined
  } else {
    format!("{}{KEY_SEPARATOR}{joined}", cfg.cache_prefix)
  }
}

/// Builds a cache key from an adapter-supplied custom deriver, falling back
/// to [`default_cache_key`] when the adapter does not override key derivation.
pub fn cache_key(adapter_name: Option<&str>, endpoint_name: &str, transport_name: &str, input: &Value, cfg: &KeyConfig, custom: Option<&str>) -> String {
  match custom {
    Some(explicit) => explicit.to_string(),
    None => default_cache_key(adapter_name, endpoint_name, transport_name, input, cfg),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn cfg() -> KeyConfig {
    KeyConfig::default()
  }

  #[test]
  fn canonicalization_sorts_keys_and_lowercases_strings() {
    let a = json!({ "Base": "ETH", "quote": "USD" });
    let b = json!({ "quote": "usd", "base": "eth" });
    assert_eq!(canonical_json(&a).to_lowercase(), canonical_json(&b));
  }

  #[test]
  fn fingerprint_is_case_insensitive_and_order_independent() {
    let a = json!({ "base": "ETH", "quote": "USD" });
    let b = json!({ "quote": "usd", "base": "eth" });
    assert_eq!(fingerprint(&a, &cfg()), fingerprint(&b, &cfg()));
  }

  #[test]
  fn empty_params_use_default_cache_key_sentinel() {
    assert_eq!(fingerprint(&json!({}), &cfg()), "default");
  }

  #[test]
  fn empty_params_feed_id_is_not_available_sentinel() {
    assert_eq!(feed_id(&json!({}), &cfg()), NO_FEED_ID);
  }

  #[test]
  fn feed_id_matches_fingerprint_for_non_empty_params() {
    let input = json!({ "base": "ETH", "quote": "USD" });
    assert_eq!(feed_id(&input, &cfg()), fingerprint(&input, &cfg()));
  }

  #[test]
  fn large_input_falls_back_to_hash() {
    let mut map = serde_json::Map::new();
    for i in 0..200 {
      map.insert(format!("field_{i}"), json!("x".repeat(10)));
    }
    let huge = Value::Object(map);
    let fp = fingerprint(&huge, &cfg());
    assert!(fp.len() < cfg().max_common_key_size);
  }

  #[test]
  fn hashing_over_limit_produces_base64_sha1_of_fixed_length() {
    let mut small_cfg = cfg();
    small_cfg.max_common_key_size = 10;
    let input = json!({ "base": "eth", "quote": "usd" });
    let fp = fingerprint(&input, &small_cfg);
    // base64 of a 20-byte SHA1 digest, no padding needed: 28 chars.
    assert_eq!(fp.len(), 28);
  }

  #[test]
  fn default_cache_key_includes_endpoint_and_transport_names() {
    let input = json!({ "base": "BTC", "quote": "USD" });
    let a = default_cache_key(None, "price", "http", &input, &cfg());
    let b = default_cache_key(None, "price", "ws", &input, &cfg());
    assert_ne!(a, b);
    let c = default_cache_key(None, "crypto", "http", &input, &cfg());
    assert_ne!(a, c);
  }

  #[test]
  fn default_cache_key_includes_adapter_name_when_present() {
    let input = json!({});
    let with_adapter = default_cache_key(Some("test"), "endpoint", "transport", &input, &cfg());
    assert_eq!(with_adapter, "test-endpoint-transport-default");
  }

  #[test]
  fn default_cache_key_matches_literal_scenario_1() {
    // spec.md §8 scenario 1: POST {} to an endpoint with no parameters.
    let mut cfg = cfg();
    cfg.default_cache_key = "DEFAULT_CACHE_KEY".to_string();
    let key = default_cache_key(Some("TEST"), "endpoint", "transport", &json!({}), &cfg);
    assert_eq!(key, "TEST-endpoint-transport-DEFAULT_CACHE_KEY");
  }

  #[test]
  fn cache_prefix_is_prepended_when_set() {
    let mut cfg = cfg();
    cfg.cache_prefix = "myapp".to_string();
    let key = default_cache_key(None, "endpoint", "transport", &json!({}), &cfg);
    assert_eq!(key, "myapp-endpoint-transport-default");
  }

  #[test]
  fn explicit_key_overrides_default_derivation() {
    let input = json!({ "base": "BTC", "quote": "USD" });
    let key = cache_key(None, "endpoint", "http", &input, &cfg(), Some("my-explicit-key"));
    assert_eq!(key, "my-explicit-key");
  }
}
