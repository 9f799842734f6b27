//! # keywatch
//!
//! A resilient, cancellable watcher for key prefixes in etcd-compatible
//! coordination stores. It observes every change under a prefix and
//! streams each one to a caller-supplied [`KeyProcessor`], surviving
//! store outages indefinitely: every watch error is classified into one
//! of two fixed backoff tiers and retried, forever, until the owner calls
//! [`Watcher::stop`].
//!
//! Two incompatible store protocol generations (the legacy HTTP JSON keys
//! API and the streaming gRPC API) are supported behind one abstraction,
//! selected once at construction.
//!
//! ```ignore
//! use std::sync::Arc;
//! use keywatch::{backend, BackendConfig, Watcher, wrap_kv_none};
//!
//! let config = BackendConfig::default();
//! let channel = backend::connect(&config)?;
//! let watcher = Watcher::stream(channel, &config, "/rules/", processor, 90, wrap_kv_none());
//!
//! let handle = tokio::spawn({
//!     let watcher = watcher.clone();
//!     async move { watcher.run().await }
//! });
//! // ... on shutdown ...
//! watcher.stop();
//! handle.await?;
//! ```

mod api;
pub mod backend;
mod config;
mod constants;
mod errors;
mod processor;
mod watch;
mod watcher;

pub use api::*;
pub use backend::connect;
pub use backend::wrap_kv_none;
pub use backend::wrap_legacy_kv_none;
pub use backend::WrapKv;
pub use backend::WrapLegacyKv;
pub use self::config::*;
pub use constants::UNAVAILABLE_RETRY_INTERVAL;
pub use constants::WATCH_RETRY_INTERVAL;
pub use errors::*;
pub use processor::*;
pub use watch::*;
pub use watcher::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
