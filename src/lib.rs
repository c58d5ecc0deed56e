#![cfg_attr(docsrs, feature(doc_cfg))]

//! Request lifecycle engine for External Adapter services: a two-tier
//! cache, a bounded subscription set, outbound rate limiters, a coalescing
//! FIFO requester, and foreground/background orchestration over whatever
//! upstream data providers a concrete [`transport::Transport`] speaks to.
//!
//! The HTTP surface, routing, extractors, and server loop are inherited from
//! the underlying web framework this crate is built on; [`adapter::Adapter`]
//! is the assembly point that wires an adapter author's transport into that
//! framework's [`router::Router`] and serves it.
//!
//! # Quickstart
//!
//! ```rust,no_run
//! use ea_core::adapter::Adapter;
//! use ea_core::cache::local::LocalCache;
//! use ea_core::config::Settings;
//! use std::sync::Arc;
//!
//! # async fn example(transport: Arc<dyn ea_core::transport::Transport>) {
//! let settings = Settings::load(vec![]).unwrap();
//! let cache = Arc::new(LocalCache::new(10_000));
//! Adapter::new("my-adapter", transport, cache, settings).run().await;
//! # }
//! ```
//!
//! # Key concepts
//! - [key] derives a canonical cache key from an adapter request (C1).
//! - [cache] is the two-tier (local + optional Redis) response cache (C2).
//! - [subscription] tracks which streaming requests are still wanted (C3).
//! - [ratelimit] gates outbound calls with fixed-interval or burst limiters (C4).
//! - [requester] is the coalescing, retrying outbound FIFO queue (C5).
//! - [cache_writer] stamps and writes a dispatch result into the cache (C6).
//! - [transport] is the capability-set contract a concrete integration implements (C7).
//! - [background] drives each transport's periodic work (C8).
//! - [foreground] services one inbound HTTP call (C9).
//! - [lock] serializes a cold-start action across adapter instances (C10).
//! - [config] and [censor] are the ambient settings/redaction surface.
//! - [error] is the single error type threaded through the request lifecycle.
//!
//! # Feature flags
//! - `client` — outbound HTTP clients over TCP/TLS
//! - `http2` — enable ALPN h2 in TLS server
//! - `jemalloc` — use jemalloc as global allocator
//! - `plugins` — CORS, compression, rate limiting
//! - `redis-cache` — Redis-backed cache tier and distributed lock (default)
//! - `metrics-prometheus` — Prometheus exposition at `/metrics`
//! - `tls` — TLS server (rustls)
//! - `ea-tracing` — structured tracing subscriber

/// Adapter wiring: assembles the request lifecycle and ambient HTTP routes into one `Router`.
pub mod adapter;

/// Background scheduler loop (C8).
pub mod background;

/// HTTP request and response body handling utilities.
pub mod body;

/// Two-tier response cache (C2).
pub mod cache;

/// Response cache writer (C6).
pub mod cache_writer;

/// Sensitive-value log redaction.
#[cfg(feature = "ea-tracing")]
#[cfg_attr(docsrs, doc(cfg(feature = "ea-tracing")))]
pub mod censor;

/// HTTP client implementation for making outbound requests.
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

/// Environment-driven settings registry (A1).
pub mod config;

/// Error taxonomy for adapter request handling.
pub mod error;

/// Request data extraction utilities for parsing query params, JSON, and more.
pub mod extractors;

/// Foreground request handler (C9).
pub mod foreground;

/// Request handler traits and implementations.
mod handler;

/// Cache key derivation from canonicalized request input (C1).
pub mod key;

/// Distributed startup lock (C10).
#[cfg(feature = "redis-cache")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-cache")))]
pub mod lock;

/// Prometheus exposition for `/metrics`.
#[cfg(feature = "metrics-prometheus")]
#[cfg_attr(docsrs, doc(cfg(feature = "metrics-prometheus")))]
pub mod metrics;

/// Middleware for processing requests and responses in a pipeline.
pub mod middleware;

/// Plugin system for extending framework functionality.
#[cfg(feature = "plugins")]
#[cfg_attr(docsrs, doc(cfg(feature = "plugins")))]
pub mod plugins;

/// Response generation utilities and traits.
pub mod responder;

/// Redirection utilities for handling HTTP redirects.
pub mod redirect;

/// Route definition and matching logic.
mod route;

/// Request routing and dispatch functionality.
pub mod router;

/// HTTP server implementation and configuration.
mod server;

/// Server-Sent Events (SSE) support for real-time communication.
pub mod sse;

/// Application state management and dependency injection.
pub mod state;

/// In-process signal arbiter for custom events, plus the process shutdown broadcast.
pub mod signals;

/// Bounded TTL-ordered subscription set (C3).
pub mod subscription;

/// Outbound rate limiters (C4).
pub mod ratelimit;

/// Outbound FIFO requester with coalescing and retry backoff (C5).
pub mod requester;

/// Transport capability-set contract (C7).
pub mod transport;

/// Distributed tracing integration for observability.
#[cfg(feature = "ea-tracing")]
#[cfg_attr(docsrs, doc(cfg(feature = "ea-tracing")))]
pub mod tracing;

/// Core type definitions used throughout the framework.
pub mod types;

/// WebSocket connection handling and message processing.
pub mod ws;

pub use bytes::Bytes;
pub use http::{Method, StatusCode, header};
pub use http_body_util::Full;

/// Starts the HTTP server with the given listener and router.
///
/// This is the main entry point for starting a Tako web server. The function takes
/// ownership of a TCP listener and router, then serves incoming connections until
/// the server is shut down.
///
/// # Examples
///
/// ```rust,no_run
/// use ea_core::{serve, router::Router};
/// use tokio::net::TcpListener;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let listener = TcpListener::bind("127.0.0.1:8080").await?;
/// let router = Router::new();
/// serve(listener, router).await;
/// # Ok(())
/// # }
/// ```
pub use server::serve;

/// TLS/SSL server implementation for secure connections.
#[cfg(feature = "tls")]
#[cfg_attr(docsrs, doc(cfg(feature = "tls")))]
pub mod server_tls;

/// Starts the HTTPS server with TLS encryption support.
///
/// Similar to `serve` but enables TLS encryption for secure connections. Requires
/// the "tls" feature to be enabled and proper TLS configuration.
///
/// # Examples
///
/// ```rust,no_run
/// # #[cfg(feature = "tls")]
/// use ea_core::{serve_tls, router::Router};
/// # #[cfg(feature = "tls")]
/// use tokio::net::TcpListener;
///
/// # #[cfg(feature = "tls")]
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let listener = TcpListener::bind("127.0.0.1:8443").await?;
/// let router = Router::new();
/// // serve_tls(listener, router, tls_config).await;
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "tls")]
#[cfg_attr(docsrs, doc(cfg(feature = "tls")))]
pub use server_tls::serve_tls;

/// Global memory allocator using jemalloc for improved performance.
#[cfg(feature = "jemalloc")]
#[cfg_attr(docsrs, doc(cfg(feature = "jemalloc")))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;
