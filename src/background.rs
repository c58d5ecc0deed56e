//! Background scheduler loop (component C8): one cooperative task per
//! transport, calling `Transport::background_execute` on its own interval
//! and exiting promptly on the shutdown broadcast.
//!
//! Grounds on `plugins/rate_limiter.rs`'s `tokio::spawn` refill/purge loop
//! for the "spawn a ticking task per concern" shape, and on `signals.rs`'s
//! `SignalArbiter` for the cancellation hookup (extended in `signals.rs`
//! with a dedicated shutdown broadcast channel).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::signals::Signal;
use crate::transport::{BackgroundContext, Transport};

/// Spawns the background loop for one transport: `backgroundExecute` under
/// `timeout`, then sleep for the transport's own interval, until shutdown
/// (spec.md §4.8). Returns the task handle so the caller can `.await` it
/// during graceful shutdown.
///
/// A timeout expiry aborts only the current tick, not the loop itself — the
/// next tick still fires on schedule (spec.md §4.8: "Timeout expiry aborts
/// the current iteration but not the loop").
pub fn spawn(transport: Arc<dyn Transport>, timeout: Duration, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
  tokio::spawn(async move {
    let ctx = BackgroundContext { transport_name: Box::leak(transport.name().to_string().into_boxed_str()) };
    let mut tick = tokio::time::interval(transport.background_interval());

    loop {
      tokio::select! {
        _ = shutdown.recv() => {
          tracing::info!(transport = transport.name(), "background loop shutting down");
          return;
        }
        _ = tick.tick() => {
          match tokio::time::timeout(timeout, transport.background_execute(&ctx)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
              tracing::warn!(transport = transport.name(), error = %err, "background execute failed");
            }
            Err(_) => {
              tracing::warn!(transport = transport.name(), timeout_ms = timeout.as_millis(), "background execute timed out");
            }
          }
          crate::signals::app_signals()
            .emit(Signal::new(crate::signals::ids::REQUEST_COMPLETED))
            .await;
        }
      }
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::Envelope;
  use crate::error::AdapterError;
  use crate::transport::RequestContext;
  use async_trait::async_trait;
  use futures_util::future::BoxFuture;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;

  struct CountingTransport(Arc<AtomicU32>);

  #[async_trait]
  impl Transport for CountingTransport {
    fn name(&self) -> &'static str {
      "counting"
    }

    fn foreground_execute<'a>(&'a self, _ctx: &'a RequestContext) -> Option<BoxFuture<'a, Result<Envelope, AdapterError>>> {
      None
    }

    async fn background_execute(&self, _ctx: &BackgroundContext) -> Result<(), AdapterError> {
      self.0.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }

    fn background_interval(&self) -> Duration {
      Duration::from_millis(5)
    }
  }

  #[tokio::test]
  async fn loop_runs_until_shutdown_signal() {
    let counter = Arc::new(AtomicU32::new(0));
    let (tx, rx) = broadcast::channel(1);
    let handle = spawn(Arc::new(CountingTransport(counter.clone())), Duration::from_secs(1), rx);

    tokio::time::sleep(Duration::from_millis(30)).await;
    tx.send(()).unwrap();
    handle.await.unwrap();

    assert!(counter.load(Ordering::SeqCst) > 0);
  }

  struct HangingTransport(Arc<AtomicU32>);

  #[async_trait]
  impl Transport for HangingTransport {
    fn name(&self) -> &'static str {
      "hanging"
    }

    fn foreground_execute<'a>(&'a self, _ctx: &'a RequestContext) -> Option<BoxFuture<'a, Result<Envelope, AdapterError>>> {
      None
    }

    async fn background_execute(&self, _ctx: &BackgroundContext) -> Result<(), AdapterError> {
      tokio::time::sleep(Duration::from_secs(3600)).await;
      self.0.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }

    fn background_interval(&self) -> Duration {
      Duration::from_millis(5)
    }
  }

  /// A `backgroundExecute` call that never returns must not wedge the loop:
  /// the timeout aborts the current tick and the next tick still fires
  /// (spec.md §4.8).
  #[tokio::test(start_paused = true)]
  async fn hung_background_execute_times_out_without_stalling_the_loop() {
    let counter = Arc::new(AtomicU32::new(0));
    let (tx, rx) = broadcast::channel(1);
    let handle = spawn(Arc::new(HangingTransport(counter.clone())), Duration::from_millis(10), rx);

    tokio::time::advance(Duration::from_millis(50)).await;
    tx.send(()).unwrap();
    handle.await.unwrap();

    // The hanging call never completes, so the counter never increments,
    // but the loop must still have woken up for multiple ticks (no panic,
    // no deadlock) and exited cleanly on the shutdown signal above.
    assert_eq!(counter.load(Ordering::SeqCst), 0);
  }
}
