//! Read API: the only store capability exposed to processors.
//!
//! Both protocol generations project onto the same point-read surface;
//! processors never learn which generation serves them.


use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use tonic::async_trait;

use crate::backend::LegacyKv;
use crate::backend::StreamKv;
use crate::Result;

/// Point reads of keys in the watched namespace.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReadApi: Send + Sync + 'static {
    /// `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>>;
}

/// Read API over the streaming protocol generation.
pub struct StreamReadApi {
    kv: Arc<dyn StreamKv>,
}

impl StreamReadApi {
    pub fn new(kv: Arc<dyn StreamKv>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl ReadApi for StreamReadApi {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.kv.range(key).await
    }
}

/// Read API over the legacy protocol generation.
pub struct LegacyReadApi {
    kv: Arc<dyn LegacyKv>,
}

impl LegacyReadApi {
    pub fn new(kv: Arc<dyn LegacyKv>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl ReadApi for LegacyReadApi {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.kv.get(key).await
    }
}
