//! Meta transport: composes named sub-transports behind a deterministic
//! routing function, per spec.md §4.7's closing paragraph — an adapter with
//! several provider integrations registers one `MetaTransport` that picks
//! which real transport handles a given request instead of exposing several
//! independent transports to the rest of the pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::cache::Envelope;
use crate::error::AdapterError;

use super::{BackgroundContext, RequestContext, Transport};

/// Picks which registered sub-transport name should handle `ctx`. Must be
/// deterministic: the same input always routes to the same sub-transport,
/// so the cache key it shares with the requester stays stable.
pub type RouteFn = Arc<dyn Fn(&RequestContext) -> &'static str + Send + Sync>;

pub struct MetaTransport {
  name: &'static str,
  routes: HashMap<&'static str, Arc<dyn Transport>>,
  route_fn: RouteFn,
}

impl MetaTransport {
  pub fn new(name: &'static str, routes: HashMap<&'static str, Arc<dyn Transport>>, route_fn: RouteFn) -> Self {
    Self { name, routes, route_fn }
  }

  fn route(&self, ctx: &RequestContext) -> Option<&Arc<dyn Transport>> {
    self.routes.get((self.route_fn)(ctx))
  }
}

#[async_trait]
impl Transport for MetaTransport {
  fn name(&self) -> &'static str {
    self.name
  }

  async fn register_request(&self, ctx: &RequestContext) -> Result<(), AdapterError> {
    match self.route(ctx) {
      Some(sub) => sub.register_request(ctx).await,
      None => Err(AdapterError::input("no sub-transport matched this request")),
    }
  }

  fn foreground_execute<'a>(&'a self, ctx: &'a RequestContext) -> Option<BoxFuture<'a, Result<Envelope, AdapterError>>> {
    let sub = self.route(ctx)?;
    sub.foreground_execute(ctx)
  }

  async fn background_execute(&self, ctx: &BackgroundContext) -> Result<(), AdapterError> {
    for sub in self.routes.values() {
      sub.background_execute(ctx).await?;
    }
    Ok(())
  }

  fn background_interval(&self) -> Duration {
    self
      .routes
      .values()
      .map(|t| t.background_interval())
      .min()
      .unwrap_or(Duration::from_secs(1))
  }
}
