//! Distributed startup lock (component C10).
//!
//! Serializes a cold-start action (e.g. warming the cache) across multiple
//! adapter instances sharing one Redis. Acquisition uses `SET key value NX PX`,
//! and the holder refreshes the lease at 80% of its duration; failing to
//! refresh (lost connectivity, another holder already took over) is treated
//! as fatal, matching spec.md's instruction that a lock-acquisition failure
//! at startup should exit the process rather than continue unguarded.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::broadcast;

const RELEASE_IF_OWNER: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

const REFRESH_IF_OWNER: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
  return 0
end
"#;

pub struct DistributedLock {
  conn: ConnectionManager,
  key: String,
  owner_token: String,
  lease: Duration,
}

impl DistributedLock {
  pub fn new(conn: ConnectionManager, key: impl Into<String>, owner_token: impl Into<String>, lease: Duration) -> Self {
    Self { conn, key: key.into(), owner_token: owner_token.into(), lease }
  }

  /// Attempts to acquire the lock once, non-blocking.
  pub async fn try_acquire(&self) -> redis::RedisResult<bool> {
    let mut conn = self.conn.clone();
    let ok: Option<String> = redis::cmd("SET")
      .arg(&self.key)
      .arg(&self.owner_token)
      .arg("NX")
      .arg("PX")
      .arg(self.lease.as_millis() as i64)
      .query_async(&mut conn)
      .await?;
    Ok(ok.is_some())
  }

  async fn refresh(&self) -> redis::RedisResult<bool> {
    let mut conn = self.conn.clone();
    let script = redis::Script::new(REFRESH_IF_OWNER);
    let refreshed: i32 = script
      .key(&self.key)
      .arg(&self.owner_token)
      .arg(self.lease.as_millis() as i64)
      .invoke_async(&mut conn)
      .await?;
    Ok(refreshed == 1)
  }

  pub async fn release(&self) -> redis::RedisResult<()> {
    let mut conn = self.conn.clone();
    let script = redis::Script::new(RELEASE_IF_OWNER);
    let _: i32 = script.key(&self.key).arg(&self.owner_token).invoke_async(&mut conn).await?;
    Ok(())
  }

  /// Runs the refresh loop until shutdown. Exits the process if a refresh
  /// ever fails to confirm ownership — losing the lock mid-run means another
  /// instance may now be running the guarded startup action concurrently.
  pub async fn hold_until_shutdown(&self, mut shutdown: broadcast::Receiver<()>) {
    let mut tick = tokio::time::interval(self.lease.mul_f32(0.8));
    loop {
      tokio::select! {
        _ = shutdown.recv() => {
          let _ = self.release().await;
          return;
        }
        _ = tick.tick() => {
          match self.refresh().await {
            Ok(true) => {}
            Ok(false) => {
              tracing::error!(key = %self.key, "lost distributed lock ownership, exiting");
              std::process::exit(1);
            }
            Err(err) => {
              tracing::error!(key = %self.key, error = %err, "failed to refresh distributed lock");
              std::process::exit(1);
            }
          }
        }
      }
    }
  }
}

/// Acquires `lock`, retrying with fixed backoff up to `max_retries` times
/// before giving up, then spawns the refresh loop. Exits the process (rather
/// than returning an error) once retries are exhausted or the backend is
/// unreachable, matching spec.md §4.10's fail-fast startup behavior
/// (`CACHE_LOCK_RETRIES`). Returns the refresh task's join handle.
pub async fn acquire_or_exit(
  lock: DistributedLock,
  max_retries: u32,
  retry_interval: Duration,
  shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
  let mut attempt = 0;
  loop {
    match lock.try_acquire().await {
      Ok(true) => break,
      Ok(false) if attempt < max_retries => {
        attempt += 1;
        tokio::time::sleep(retry_interval).await;
      }
      Ok(false) => {
        tracing::error!(key = %lock.key, max_retries, "distributed lock retries exhausted at startup, exiting");
        std::process::exit(1);
      }
      Err(err) => {
        tracing::error!(error = %err, "distributed lock backend unreachable at startup, exiting");
        std::process::exit(1);
      }
    }
  }

  tokio::spawn(async move { lock.hold_until_shutdown(shutdown).await })
}
