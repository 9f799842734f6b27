//! Processor capability: the external consumer of observed changes.

use std::collections::HashMap;

use tonic::async_trait;

use crate::ReadApi;

/// Receives one observed key change per call, together with a read API
/// for ad-hoc lookups and an auxiliary attribute map (always empty at
/// this layer; reserved for caller-supplied context).
///
/// Runs synchronously inside the watch loop: the next watch attempt is
/// not issued until this returns, so implementations must not block
/// indefinitely. Errors encountered while processing are the processor's
/// own responsibility to log and handle; the loop does not inspect an
/// outcome.
#[async_trait]
pub trait KeyProcessor: Send + Sync + 'static {
    async fn process_key(
        &self,
        key: &str,
        value: Option<&str>,
        api: &dyn ReadApi,
        attrs: HashMap<String, String>,
    );
}
