//! Error hierarchy for the paged live-view layer.
//!
//! Categorized by operational concern: thread-confined dispatch, store
//! handle/result-set access, and configuration.

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Worker-thread dispatch failures
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Store handle and result-set failures
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Settings loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unrecoverable failures requiring subscription termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Work submitted after the dispatcher has been closed. Fatal to the
    /// caller's current operation, not retried.
    #[error("Dispatcher is closed")]
    Closed,

    /// The worker thread went away before replying
    #[error("Worker thread terminated before replying")]
    WorkerGone,

    #[error("Failed to spawn worker thread: {0}")]
    SpawnFailed(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    /// The handle backing an operation is closed. Windowed loaders recover
    /// locally by answering with the empty result instead of propagating.
    #[error("Store handle is closed or unavailable")]
    HandleUnavailable,

    /// The result set was invalidated upstream; discard and re-acquire
    #[error("Result set is no longer valid")]
    ResultSetInvalid,

    /// Element transform failed. Terminal for the owning stream: no partial
    /// snapshot is ever delivered.
    #[error("Transform failed at index {index}: {reason}")]
    Transform { index: usize, reason: String },

    /// Engine-reported failure
    #[error("Store engine error: {0}")]
    Engine(String),
}
