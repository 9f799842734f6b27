//! Key watcher over the legacy long-polling keys API.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tonic::async_trait;

use super::ChangeEvent;
use super::KeyWatcher;
use crate::backend::LegacyKv;
use crate::Error;
use crate::Result;

/// Watches a prefix by long-polling the legacy keys API.
///
/// Tracks the modified index of the last observed change and waits for
/// `index + 1` on the next call, so consecutive changes are not skipped
/// between polls.
pub struct LegacyKeyWatcher {
    kv: Arc<dyn LegacyKv>,
    prefix: String,
    watch_timeout: Duration,
    cancel: CancellationToken,
    after_index: Mutex<Option<u64>>,
}

impl LegacyKeyWatcher {
    pub fn new(kv: Arc<dyn LegacyKv>, prefix: impl Into<String>, watch_timeout: Duration) -> Self {
        Self {
            kv,
            prefix: prefix.into(),
            watch_timeout,
            cancel: CancellationToken::new(),
            after_index: Mutex::new(None),
        }
    }
}

#[async_trait]
impl KeyWatcher for LegacyKeyWatcher {
    async fn next(&self) -> Result<ChangeEvent> {
        if self.cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        let mut after = self.after_index.lock().await;
        let wait = self.kv.wait(&self.prefix, *after);
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Canceled),
            attempt = timeout(self.watch_timeout, wait) => {
                match attempt {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(self.watch_timeout)),
                }
            }
        };

        match outcome {
            Ok(node) => {
                *after = Some(node.modified_index + 1);
                Ok(ChangeEvent {
                    key: node.key,
                    value: node.value,
                })
            }
            Err(Error::Compacted(index)) => {
                // The tracked index fell out of the store's event history;
                // resume from the store's current index.
                *after = Some(index.max(0) as u64 + 1);
                Err(Error::Compacted(index))
            }
            Err(e) => Err(e),
        }
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}
