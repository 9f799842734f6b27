//! Key watchers: blocking retrieval of the next change under a prefix.
//!
//! One variant per protocol generation, both honoring the same contract:
//! `next()` returns a valid change or a descriptive error, never silently
//! nothing, and `cancel()` promptly unblocks any in-flight or future
//! `next()` call.

mod legacy;
mod stream;

pub use legacy::*;
pub use stream::*;


#[cfg(test)]
use mockall::automock;
use tonic::async_trait;

use crate::Result;

/// One observed key change. Ephemeral; lives exactly for the single
/// dispatch to the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub key: String,
    /// `None` when the key was deleted or expired.
    pub value: Option<String>,
}

/// Blocking retrieval of the next change to any key under a prefix.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeyWatcher: Send + Sync + 'static {
    /// Blocks until a change is observed, the store reports an error, or
    /// [`cancel`](KeyWatcher::cancel) is invoked (then [`crate::Error::Canceled`]).
    /// Each underlying attempt is bounded by the configured watch timeout.
    async fn next(&self) -> Result<ChangeEvent>;

    /// Idempotent; unblocks any in-flight `next()` and makes future calls
    /// return promptly. Safe to call concurrently with `next()` from the
    /// stop path.
    fn cancel(&self);
}
