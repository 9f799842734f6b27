//! Watcher control loop.
//!
//! Owns the lifecycle of one watched prefix: drives the key watcher,
//! classifies errors into backoff tiers, and dispatches each observed
//! change to the processor. No error is ever fatal to the loop; the only
//! way it terminates is an explicit [`Watcher::stop`].

#[cfg(test)]
mod watcher_test;

use std::collections::HashMap;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tonic::transport::Channel;
use tracing::error;
use tracing::info;
use tracing::info_span;
use tracing::Instrument;

use crate::backend::connect;
use crate::backend::GrpcKv;
use crate::backend::HttpKv;
use crate::backend::WrapKv;
use crate::backend::WrapLegacyKv;
use crate::constants::UNAVAILABLE_RETRY_INTERVAL;
use crate::constants::WATCH_RETRY_INTERVAL;
use crate::BackendConfig;
use crate::KeyProcessor;
use crate::KeyWatcher;
use crate::LegacyKeyWatcher;
use crate::LegacyReadApi;
use crate::ReadApi;
use crate::Result;
use crate::StreamKeyWatcher;
use crate::StreamReadApi;

// Lifecycle state cell: Idle -> Running -> Stopping -> Stopped. A single
// writer per transition; readers use acquire loads.
const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPING: u8 = 2;
const STOPPED: u8 = 3;

struct WatcherInner {
    api: Arc<dyn ReadApi>,
    kw: Arc<dyn KeyWatcher>,
    kp: Arc<dyn KeyProcessor>,
    state: AtomicU8,
}

/// Long-running watcher over one key prefix.
///
/// Cheap to clone; all clones share one lifecycle. `run()` is driven on a
/// dedicated task, `stop()` from the owner:
///
/// ```ignore
/// let watcher = Watcher::stream(channel, &config, "/rules/", processor, 90, wrap_kv_none());
/// let handle = tokio::spawn({
///     let watcher = watcher.clone();
///     async move { watcher.run().await }
/// });
/// // ... later ...
/// watcher.stop();
/// handle.await?;
/// assert!(watcher.is_stopped());
/// ```
#[derive(Clone)]
pub struct Watcher {
    inner: Arc<WatcherInner>,
}

impl Watcher {
    /// Watcher over the legacy HTTP protocol generation. The raw client
    /// built from `config` is passed through `wrap` before anything else
    /// sees it.
    pub fn legacy(
        config: &BackendConfig,
        prefix: impl Into<String>,
        processor: Arc<dyn KeyProcessor>,
        watch_timeout_secs: u64,
        wrap: WrapLegacyKv,
    ) -> Result<Self> {
        let kv = wrap(Arc::new(HttpKv::new(config)?));
        let api = Arc::new(LegacyReadApi::new(kv.clone()));
        let kw = Arc::new(LegacyKeyWatcher::new(
            kv,
            prefix,
            Duration::from_secs(watch_timeout_secs),
        ));
        Ok(Self::from_parts(api, kw, processor))
    }

    /// Watcher over the streaming gRPC protocol generation, on an
    /// already-built channel (see [`crate::backend::connect`]).
    pub fn stream(
        channel: Channel,
        config: &BackendConfig,
        prefix: impl Into<String>,
        processor: Arc<dyn KeyProcessor>,
        watch_timeout_secs: u64,
        wrap: WrapKv,
    ) -> Self {
        let kv = wrap(Arc::new(GrpcKv::new(
            channel,
            config.request_timeout(),
            config.enable_compression,
        )));
        let api = Arc::new(StreamReadApi::new(kv.clone()));
        let kw = Arc::new(StreamKeyWatcher::new(
            kv,
            prefix,
            Duration::from_secs(watch_timeout_secs),
        ));
        Self::from_parts(api, kw, processor)
    }

    /// Connects to the store per `config` and builds a streaming watcher.
    pub fn connect_stream(
        config: &BackendConfig,
        prefix: impl Into<String>,
        processor: Arc<dyn KeyProcessor>,
        watch_timeout_secs: u64,
        wrap: WrapKv,
    ) -> Result<Self> {
        let channel = connect(config)?;
        Ok(Self::stream(
            channel,
            config,
            prefix,
            processor,
            watch_timeout_secs,
            wrap,
        ))
    }

    pub(crate) fn from_parts(
        api: Arc<dyn ReadApi>,
        kw: Arc<dyn KeyWatcher>,
        kp: Arc<dyn KeyProcessor>,
    ) -> Self {
        Self {
            inner: Arc::new(WatcherInner {
                api,
                kw,
                kp,
                state: AtomicU8::new(IDLE),
            }),
        }
    }

    /// Drives the watch loop until [`stop`](Watcher::stop) is observed.
    pub async fn run(&self) {
        // A lost race against stop() means the loop body never executes.
        let _ = self
            .inner
            .state
            .compare_exchange(IDLE, RUNNING, Ordering::SeqCst, Ordering::SeqCst);
        let _ = self
            .inner
            .state
            .compare_exchange(STOPPED, RUNNING, Ordering::SeqCst, Ordering::SeqCst);

        while self.inner.state.load(Ordering::Acquire) == RUNNING {
            self.single_run().await;
        }

        self.inner.state.store(STOPPED, Ordering::SeqCst);
    }

    /// Requests loop termination and unblocks an in-flight watch call.
    /// The loop exits at its next suspension-point check; observe
    /// completion through [`is_stopped`](Watcher::is_stopped).
    pub fn stop(&self) {
        let _ = self
            .inner
            .state
            .compare_exchange(IDLE, STOPPING, Ordering::SeqCst, Ordering::SeqCst);
        let _ = self
            .inner
            .state
            .compare_exchange(RUNNING, STOPPING, Ordering::SeqCst, Ordering::SeqCst);
        self.inner.kw.cancel();
    }

    /// True once the loop has observed the stop request and exited.
    pub fn is_stopped(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == STOPPED
    }

    async fn single_run(&self) {
        match self.inner.kw.next().await {
            Ok(event) => {
                let span = info_span!("process_key", key = %event.key);
                self.inner
                    .kp
                    .process_key(
                        &event.key,
                        event.value.as_deref(),
                        self.inner.api.as_ref(),
                        HashMap::new(),
                    )
                    .instrument(span)
                    .await;
            }
            Err(err) => {
                error!(error = %err, "watch attempt failed");
                if err.is_unavailable() {
                    info!("store unavailable; waiting one minute to retry");
                    sleep(UNAVAILABLE_RETRY_INTERVAL).await;
                } else {
                    // Maximum error logging rate is 1 per second.
                    sleep(WATCH_RETRY_INTERVAL).await;
                }
            }
        }
    }
}
