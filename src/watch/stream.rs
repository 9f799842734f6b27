//! Key watcher over the streaming protocol generation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tonic::async_trait;
use tracing::debug;

use super::ChangeEvent;
use super::KeyWatcher;
use crate::backend::EventStream;
use crate::backend::StreamKv;
use crate::Error;
use crate::Result;

struct StreamState {
    stream: Option<EventStream>,
    /// Changes already received but not yet handed out; the store delivers
    /// batches, the loop consumes one change at a time.
    pending: VecDeque<ChangeEvent>,
    /// Last store revision observed; the watch resumes from `revision + 1`
    /// after a stream error.
    revision: i64,
}

/// Watches a prefix through the store's native watch stream.
///
/// The stream is opened lazily on the first `next()` and re-established
/// from the last observed revision after any error, so no change is lost
/// across reconnects. Empty batches (creation acks, progress notifies)
/// are skipped internally within the timeout window.
pub struct StreamKeyWatcher {
    kv: Arc<dyn StreamKv>,
    prefix: String,
    watch_timeout: Duration,
    cancel: CancellationToken,
    state: Mutex<StreamState>,
}

impl StreamKeyWatcher {
    pub fn new(kv: Arc<dyn StreamKv>, prefix: impl Into<String>, watch_timeout: Duration) -> Self {
        Self {
            kv,
            prefix: prefix.into(),
            watch_timeout,
            cancel: CancellationToken::new(),
            state: Mutex::new(StreamState {
                stream: None,
                pending: VecDeque::new(),
                revision: 0,
            }),
        }
    }

    /// Waits for the next non-empty batch and queues its events.
    async fn fill_pending(&self, state: &mut StreamState) -> Result<()> {
        let StreamState {
            stream, revision, ..
        } = state;

        if stream.is_none() {
            let start = if *revision == 0 { 0 } else { *revision + 1 };
            *stream = Some(self.kv.watch(&self.prefix, start).await?);
            debug!(prefix = %self.prefix, start, "watch stream established");
        }
        let Some(open) = stream.as_mut() else {
            return Err(Error::StreamClosed);
        };

        let next_batch = async {
            loop {
                match open.next().await {
                    Some(Ok(batch)) => {
                        if batch.revision > 0 {
                            *revision = batch.revision;
                        }
                        // Creation acks and progress notifies carry no
                        // events; keep waiting.
                        if batch.events.is_empty() {
                            continue;
                        }
                        return Ok(batch.events);
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Err(Error::StreamClosed),
                }
            }
        };

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Canceled),
            attempt = timeout(self.watch_timeout, next_batch) => {
                match attempt {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(self.watch_timeout)),
                }
            }
        };

        match outcome {
            Ok(events) => {
                state.pending.extend(events);
                Ok(())
            }
            Err(e) => {
                // Tear down so the next attempt re-establishes the watch.
                state.stream = None;
                if let Error::Compacted(compact_revision) = e {
                    // Resume exactly at the compact revision.
                    state.revision = compact_revision - 1;
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl KeyWatcher for StreamKeyWatcher {
    async fn next(&self) -> Result<ChangeEvent> {
        let mut state = self.state.lock().await;
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Canceled);
            }
            if let Some(event) = state.pending.pop_front() {
                return Ok(event);
            }
            self.fill_pending(&mut state).await?;
        }
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}
