//! Error taxonomy shared by every crate in the workspace.

use thiserror::Error;

/// Top-level error type for rig operations.
#[derive(Debug, Error)]
pub enum RigError {
    /// A requested destination set failed validation: the probes would
    /// overlap, cross, or otherwise violate the rail ordering.
    #[error("invalid destinations: {0}")]
    InvalidDestinations(String),

    /// A hardware unit could not be reached.
    #[error("connection to {unit} failed: {details}")]
    HardwareConnection { unit: String, details: String },

    /// A hardware unit reported a fault while executing a command.
    #[error("{unit} fault: {details}")]
    HardwareFault { unit: String, details: String },

    /// The running task observed a cancellation request at a checkpoint.
    #[error("task cancelled")]
    Cancelled,

    /// The task store rejected or failed a persistence operation.
    #[error("task storage error: {0}")]
    Storage(String),
}

impl RigError {
    /// Whether the error is a cooperative cancellation rather than a
    /// genuine failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RigError::Cancelled)
    }
}
