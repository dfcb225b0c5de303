//! Crate-wide error type.
//!
//! Configuration and shape problems surface synchronously as [`MarlError`]
//! values describing the expected versus actual structure. There is no
//! partial-success path: the learner validates its whole input before the
//! first optimizer step.

use thiserror::Error;

/// Errors produced by trainer construction, learning and persistence.
#[derive(Debug, Error)]
pub enum MarlError {
    /// Invalid trainer configuration (agent/shape list mismatches, bad
    /// hyperparameters, missing observations).
    #[error("configuration error: {0}")]
    Config(String),

    /// Custom network lists that cannot be accepted (empty, or length not
    /// matching the agent count).
    #[error("invalid custom networks: {0}")]
    InvalidNetworks(String),

    /// Unrecognized compile mode string.
    #[error("unrecognized compile mode `{0}` (expected one of: default, reduce-overhead, max-autotune)")]
    CompileMode(String),

    /// An experience batch whose agent set or batch sizes are inconsistent.
    #[error("malformed experience batch: {0}")]
    MalformedBatch(String),

    /// An actor output activation without a bounded declared range cannot be
    /// scaled to an action space.
    #[error("unsupported output activation `{0}` for action scaling")]
    UnsupportedActivation(String),

    /// A checkpoint that is structurally incompatible with reconstruction.
    #[error("incompatible checkpoint: {0}")]
    Checkpoint(String),

    /// Parameter or optimizer state (de)serialization failure.
    #[error("record error: {0}")]
    Record(#[from] burn::record::RecorderError),
}

pub type Result<T> = std::result::Result<T, MarlError>;
