//! Remote cache tier backed by Redis (feature `redis-cache`).
//!
//! Uses `redis::aio::ConnectionManager`, which reconnects automatically on
//! its own, so the rest of the crate can hold one `RedisCache` for the life
//! of the process the same way `client.rs`'s `TakoClient` holds one
//! connection per outbound peer. Invariant E is enforced server-side with a
//! Lua script so the read-modify-write is atomic even with multiple adapter
//! instances sharing the same Redis.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{Cache, CacheEntry, Envelope, EnvelopeStatus};

fn now_ms() -> u64 {
  use std::time::{SystemTime, UNIX_EPOCH};
  SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Lua script implementing invariant E atomically: refuses to overwrite a
/// cached success with an incoming error.
const SET_IF_NOT_DOWNGRADING: &str = r#"
local key = KEYS[1]
local new_value = ARGV[1]
local new_is_error = ARGV[2]
local ttl_ms = tonumber(ARGV[3])

local existing = redis.call('GET', key)
if existing and new_is_error == '1' then
  local ok, decoded = pcall(cjson.decode, existing)
  if ok and decoded['status'] == 'success' then
    return 0
  end
end

redis.call('SET', key, new_value, 'PX', ttl_ms)
return 1
"#;

pub struct RedisCache {
  conn: ConnectionManager,
}

impl RedisCache {
  pub async fn connect(url: &str) -> redis::RedisResult<Self> {
    let client = redis::Client::open(url)?;
    let conn = ConnectionManager::new(client).await?;
    Ok(Self { conn })
  }
}

#[async_trait]
impl Cache for RedisCache {
  async fn get(&self, key: &str) -> Option<CacheEntry> {
    let mut conn = self.conn.clone();
    let raw: Option<String> = conn.get(key).await.ok()?;
    let envelope: Envelope = serde_json::from_str(&raw?).ok()?;
    let now = now_ms();
    let stored_at_ms = envelope.timestamps.provider_received_ms;
    let ttl = Duration::from_millis(envelope.max_age_ms);
    let entry = CacheEntry { envelope, stored_at_ms, ttl };
    if entry.is_expired(now) {
      None
    } else {
      Some(entry)
    }
  }

  async fn set(&self, key: &str, envelope: Envelope, ttl: Duration) {
    let mut conn = self.conn.clone();
    let is_error = if envelope.status == EnvelopeStatus::Error { "1" } else { "0" };
    let Ok(serialized) = serde_json::to_string(&envelope) else { return };
    let ttl_ms = ttl.as_millis().max(1) as i64;

    let script = redis::Script::new(SET_IF_NOT_DOWNGRADING);
    let _: redis::RedisResult<i32> = script
      .key(key)
      .arg(serialized)
      .arg(is_error)
      .arg(ttl_ms)
      .invoke_async(&mut conn)
      .await;
  }

  async fn remove(&self, key: &str) {
    let mut conn = self.conn.clone();
    let _: redis::RedisResult<()> = conn.del(key).await;
  }

  async fn health_check(&self) -> Result<(), String> {
    let mut conn = self.conn.clone();
    redis::cmd("PING")
      .query_async::<String>(&mut conn)
      .await
      .map(|_| ())
      .map_err(|e| e.to_string())
  }
}
