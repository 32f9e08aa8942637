//! # cachet
//!
//! An RFC 9111 HTTP cache that wraps any client [`Transport`].
//!
//! [`CachingTransport`] is itself a [`Transport`], so it drops in wherever
//! the inner one was used. Responses are persisted once their body has been
//! read to the end; stale entries are revalidated with conditional
//! requests, refreshed in the background under `stale-while-revalidate`,
//! or served on origin failure under `stale-if-error`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cachet::{CacheOptions, CachingTransport, MemoryStorage, Request};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = CachingTransport::builder(Arc::new(MemoryStorage::new()))
//!         .options(CacheOptions { shared_cache: false, ..CacheOptions::default() })
//!         .build()?;
//!
//!     let response = cache.execute(Request::get("http://example.com/")?).await?;
//!     let cached = response.headers().contains("x-from-cache");
//!     let body = response.bytes().await?;
//!     println!("{} bytes, from cache: {cached}", body.len());
//!     Ok(())
//! }
//! ```

// ── Protocol primitives ──────────────────────────────────────────────────────
pub mod directives;
pub mod http;
pub mod key;
pub mod record;
pub mod vary;

// ── Cache semantics ──────────────────────────────────────────────────────────
pub mod freshness;
pub mod invalidate;

// ── Storage and transport seams ──────────────────────────────────────────────
pub mod security;
pub mod storage;
pub mod transport;

// ── The engine ───────────────────────────────────────────────────────────────
pub mod config;
pub mod engine;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::{CacheOptions, ConfigError};
pub use engine::{CacheError, CachingTransport, CachingTransportBuilder};
pub use freshness::Freshness;
pub use http::{Body, Headers, Method, Request, Response, StatusCode};
pub use storage::{MemoryStorage, StaleMarking, Storage, StorageError};
pub use transport::{HttpTransport, Transport, TransportError};
