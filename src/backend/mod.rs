//! Store transport layer.
//!
//! Two incompatible protocol generations are normalized behind two
//! capability traits, selected exactly once at construction time:
//!
//! - [`StreamKv`] for the streaming gRPC generation ([`GrpcKv`])
//! - [`LegacyKv`] for the legacy HTTP JSON keys API ([`HttpKv`])
//!
//! Nothing downstream of construction branches on which generation is
//! active. [`WrapKv`] / [`WrapLegacyKv`] are applied to the raw client
//! before anything else sees it, as an interception hook for callers and
//! tests.

mod grpc;
mod http;
pub(crate) mod proto;

#[cfg(test)]
mod http_test;

pub use grpc::*;
pub use http::*;

use std::pin::Pin;
use std::sync::Arc;

use ::config::ConfigError;
use futures::Stream;
#[cfg(test)]
use mockall::automock;
use tonic::async_trait;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tracing::debug;

use crate::BackendConfig;
use crate::ChangeEvent;
use crate::Error;
use crate::Result;

/// One message from an open watch: zero or more changes observed at a
/// single store revision. Empty batches (creation acks, progress
/// notifications) are legal and skipped by the key watcher.
#[derive(Debug, Clone)]
pub struct WatchBatch {
    pub events: Vec<ChangeEvent>,
    /// Store revision the batch was observed at; zero when unknown.
    pub revision: i64,
}

/// Stream of watch batches produced by [`StreamKv::watch`].
pub type EventStream = Pin<Box<dyn Stream<Item = Result<WatchBatch>> + Send>>;

/// Capability surface of the streaming protocol generation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StreamKv: Send + Sync + 'static {
    /// Point read of a single key. `Ok(None)` when the key does not exist.
    async fn range(&self, key: &str) -> Result<Option<String>>;

    /// Opens a watch over every key under `prefix`, starting at
    /// `start_revision` (zero means "from now").
    async fn watch(&self, prefix: &str, start_revision: i64) -> Result<EventStream>;
}

/// One change surfaced by the legacy keys API.
#[derive(Debug, Clone)]
pub struct LegacyNode {
    pub key: String,
    /// `None` for delete and expire actions.
    pub value: Option<String>,
    /// Store index at which the change was applied.
    pub modified_index: u64,
}

/// Capability surface of the legacy HTTP protocol generation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LegacyKv: Send + Sync + 'static {
    /// Point read of a single key. `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Long-polls for the next change to any key under `prefix`, at or
    /// after `after_index` (`None` waits for the next change from now).
    async fn wait(&self, prefix: &str, after_index: Option<u64>) -> Result<LegacyNode>;
}

/// Interception hook applied to the raw streaming client at construction.
pub type WrapKv = Box<dyn FnOnce(Arc<dyn StreamKv>) -> Arc<dyn StreamKv> + Send>;

/// Interception hook applied to the raw legacy client at construction.
pub type WrapLegacyKv = Box<dyn FnOnce(Arc<dyn LegacyKv>) -> Arc<dyn LegacyKv> + Send>;

/// The identity [`WrapKv`], for callers that do not intercept.
pub fn wrap_kv_none() -> WrapKv {
    Box::new(|kv| kv)
}

/// The identity [`WrapLegacyKv`], for callers that do not intercept.
pub fn wrap_legacy_kv_none() -> WrapLegacyKv {
    Box::new(|kv| kv)
}

/// Builds a lazily connecting gRPC channel balanced across the configured
/// endpoints. Connection failures surface from individual calls and are
/// classified as unavailable by the control loop.
pub fn connect(config: &BackendConfig) -> Result<Channel> {
    if config.endpoints.is_empty() {
        return Err(Error::Config(ConfigError::Message(
            "at least one store endpoint is required".to_string(),
        )));
    }

    let endpoints = config
        .endpoints
        .iter()
        .map(|addr| build_endpoint(addr, config))
        .collect::<Result<Vec<_>>>()?;

    debug!(endpoints = endpoints.len(), "store channel created");
    Ok(Channel::balance_list(endpoints.into_iter()))
}

// No channel-level request timeout: it would also bound the long-lived
// watch stream. Point reads apply the request timeout per call instead.
fn build_endpoint(addr: &str, config: &BackendConfig) -> Result<Endpoint> {
    Ok(Endpoint::try_from(addr.to_string())?
        .connect_timeout(config.connect_timeout())
        .tcp_keepalive(Some(config.tcp_keepalive()))
        .http2_keep_alive_interval(config.http2_keepalive_interval())
        .keep_alive_timeout(config.http2_keepalive_timeout()))
}
