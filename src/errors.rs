//! Watch error hierarchy.
//!
//! Every failure mode of a watch attempt maps to one variant here; the
//! control loop only ever distinguishes "store unreachable" (long backoff)
//! from everything else (short backoff). No error is fatal to the loop.

use std::time::Duration;

use tonic::Code;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The store cannot be reached at the transport level.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A bounded watch attempt elapsed without observing a change.
    /// The loop treats this as a refresh signal, not a real failure.
    #[error("watch attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Surfaced by `cancel()`; ends the loop at the next flag check.
    #[error("watch canceled")]
    Canceled,

    /// The store closed the watch channel.
    #[error("watch stream closed by the store")]
    StreamClosed,

    /// The watched revision has been compacted away; the watch must be
    /// re-established at or after the compact revision.
    #[error("watch revision compacted away (compact revision {0})")]
    Compacted(i64),

    /// The store produced a result carrying no change. Benign; retried.
    #[error("store returned an empty result: {0}")]
    EmptyResponse(String),

    /// The store produced a payload this crate cannot interpret.
    #[error("malformed store response: {0}")]
    InvalidResponse(String),

    /// gRPC request failure from the streaming protocol generation.
    #[error(transparent)]
    Grpc(#[from] tonic::Status),

    /// Channel-level failure from the streaming protocol generation.
    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),

    /// HTTP failure from the legacy protocol generation.
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Settings loading failure.
    #[error(transparent)]
    Config(#[from] ::config::ConfigError),
}

impl Error {
    /// True for errors meaning the store is unreachable, which the control
    /// loop recovers from with the long backoff tier.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Error::Unavailable(_) | Error::Transport(_) => true,
            Error::Grpc(status) => {
                status.code() == Code::Unavailable || status.message().contains("connection refused")
            }
            Error::Http(e) => e.is_connect(),
            other => other.to_string().contains("connection refused"),
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_variants_use_long_backoff() {
        assert!(Error::Unavailable("connect failed".into()).is_unavailable());
        assert!(Error::Grpc(tonic::Status::unavailable("node down")).is_unavailable());
        assert!(
            Error::Grpc(tonic::Status::unknown("tcp connect: connection refused")).is_unavailable()
        );
    }

    #[test]
    fn generic_errors_use_short_backoff() {
        assert!(!Error::Timeout(Duration::from_secs(5)).is_unavailable());
        assert!(!Error::Canceled.is_unavailable());
        assert!(!Error::StreamClosed.is_unavailable());
        assert!(!Error::EmptyResponse("no node".into()).is_unavailable());
        assert!(!Error::Grpc(tonic::Status::internal("boom")).is_unavailable());
    }

    #[test]
    fn cancellation_is_not_a_failure_class() {
        assert!(Error::Canceled.is_canceled());
        assert!(!Error::StreamClosed.is_canceled());
    }
}
