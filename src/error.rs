//! Error types for the cycle-collection bridge.
//!
//! Only conditions a caller can act on become [`BridgeError`] values.
//! Programmer errors go through [`report_invariant_violation`], which is
//! fatal in debug builds and logged in release builds.

use thiserror::Error;

/// Recoverable failures surfaced by the bridge.
///
/// # Examples
///
/// ```
/// use ccbridge::error::{BridgeError, BridgeResult};
///
/// let failure: BridgeResult<()> = Err(BridgeError::AllocationFailed { what: "zone bucket" });
/// assert_eq!(
///     failure.unwrap_err().to_string(),
///     "allocation failed while growing zone bucket"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// A registry could not grow to hold a new holder.
    #[error("allocation failed while growing {what}")]
    AllocationFailed { what: &'static str },
    /// The scheduler refused to accept a deferred unit of work.
    #[error("scheduler rejected task: {0}")]
    DispatchFailed(String),
    /// The operation may only run between collections.
    #[error("{0} requested while an incremental GC is in progress")]
    GcInProgress(&'static str),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Report a broken invariant.
///
/// Panics when debug assertions are enabled. Release builds log and let the
/// caller continue best-effort.
#[track_caller]
pub fn report_invariant_violation(message: &str) {
    let location = std::panic::Location::caller();
    if cfg!(debug_assertions) {
        panic!("invariant violated at {location}: {message}");
    }
    tracing::error!(target: "ccbridge::invariant", %location, "{message}");
}
