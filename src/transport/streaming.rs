//! Streaming/subscription transport: background-driven, reads the desired
//! set from [`crate::subscription::SubscriptionSet`], diffs it against what
//! is currently connected, and drives an adapter-supplied [`UpstreamConnector`].
//!
//! The actual wire handling (WebSocket frame parsing, SSE event names) stays
//! with the adapter author; this module only owns the
//! subscribe/unsubscribe/poll scheduling shape, grounded on `ws.rs`'s
//! `WebSocketStream<TokioIo<Upgraded>>` usage and on `sse.rs`'s framing
//! constants for the two concrete wire variants an implementor might choose.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::cache::Envelope;
use crate::cache_writer::CacheWriter;
use crate::error::AdapterError;
use crate::subscription::SubscriptionSet;

use super::{BackgroundContext, RequestContext, Transport};

/// Adapter-supplied hooks for a streaming upstream (WS, SSE, or a custom
/// long-lived protocol). `poll_messages` is called once per background tick
/// and should return any results the connector has buffered since the last call.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
  async fn subscribe(&self, key: &str, input: &Value) -> Result<(), AdapterError>;
  async fn unsubscribe(&self, key: &str) -> Result<(), AdapterError>;
  async fn poll_messages(&self) -> Vec<(String, Envelope)>;
}

pub struct SubscriptionTransport<C: UpstreamConnector> {
  name: &'static str,
  connector: Arc<C>,
  subscriptions: Arc<SubscriptionSet>,
  cache_writer: Arc<CacheWriter>,
  connected: Mutex<HashSet<String>>,
  interval: Duration,
}

impl<C: UpstreamConnector> SubscriptionTransport<C> {
  pub fn new(
    name: &'static str,
    connector: Arc<C>,
    subscriptions: Arc<SubscriptionSet>,
    cache_writer: Arc<CacheWriter>,
    interval: Duration,
  ) -> Self {
    Self { name, connector, subscriptions, cache_writer, connected: Mutex::new(HashSet::new()), interval }
  }
}

#[async_trait]
impl<C: UpstreamConnector + Send + Sync> Transport for SubscriptionTransport<C> {
  fn name(&self) -> &'static str {
    self.name
  }

  async fn register_request(&self, ctx: &RequestContext) -> Result<(), AdapterError> {
    self.subscriptions.touch(&ctx.key, &ctx.input, self.name);
    Ok(())
  }

  async fn background_execute(&self, _ctx: &BackgroundContext) -> Result<(), AdapterError> {
    let wanted = self.subscriptions.entries_for(self.name);
    let wanted_keys: HashSet<String> = wanted.iter().map(|e| e.key.clone()).collect();

    let to_add: Vec<_> = {
      let connected = self.connected.lock();
      wanted.iter().filter(|e| !connected.contains(&e.key)).cloned().collect()
    };
    for entry in &to_add {
      self.connector.subscribe(&entry.key, &entry.input).await?;
      self.connected.lock().insert(entry.key.clone());
    }

    let to_remove: Vec<String> = {
      let connected = self.connected.lock();
      connected.iter().filter(|k| !wanted_keys.contains(*k)).cloned().collect()
    };
    for key in &to_remove {
      self.connector.unsubscribe(key).await?;
      self.connected.lock().remove(key);
    }

    for expired in self.subscriptions.sweep_expired() {
      let _ = self.connector.unsubscribe(&expired).await;
      self.connected.lock().remove(&expired);
    }

    for (key, envelope) in self.connector.poll_messages().await {
      if let Some(entry) = wanted.iter().find(|e| e.key == key) {
        self.cache_writer.write(self.name, &entry.input, Some(&key), envelope).await;
      }
    }

    Ok(())
  }

  fn background_interval(&self) -> Duration {
    self.interval
  }
}
