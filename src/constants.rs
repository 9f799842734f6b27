use std::time::Duration;

/// Pause between watch attempts after a generic watch error.
///
/// Every failed attempt is logged once before the pause, so this also caps
/// error log emission at one line per second during sustained failure.
pub const WATCH_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Pause between watch attempts while the store is unreachable.
pub const UNAVAILABLE_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// Legacy keys API error code for a missing key.
pub(crate) const V2_KEY_NOT_FOUND: u64 = 100;

/// Legacy keys API error code for a wait index that has been cleared
/// from the store's event history.
pub(crate) const V2_EVENT_INDEX_CLEARED: u64 = 401;
