//! Error types for the configuration and lifecycle layer.

use keel_error::CommonError;
use keel_platform::PlatformError;
use thiserror::Error;

use crate::config::ValidationReport;
use crate::vm::VmState;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while aggregating a configuration or driving a
/// machine's lifecycle.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The configuration failed whole-object validation.
    ///
    /// Carries the complete list of issues, never just the first one, so
    /// a caller can fix everything in one pass.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(ValidationReport),

    /// A lifecycle operation was attempted from the wrong state.
    ///
    /// Always a caller bug; never retried internally.
    #[error("invalid state: expected {expected}, machine is {actual}")]
    InvalidState {
        /// State the operation requires.
        expected: &'static str,
        /// State the machine was actually in.
        actual: VmState,
    },

    /// Another lifecycle control operation is still in flight.
    ///
    /// Concurrent control operations are rejected, not queued.
    #[error("another lifecycle operation is in progress")]
    OperationInProgress,

    /// A pending start was cancelled by a concurrent stop.
    #[error("start cancelled by stop")]
    Cancelled,

    /// The hypervisor handle was already released; the instance cannot
    /// run again.
    #[error("hypervisor handle already released")]
    HandleReleased,

    /// The execution engine reported an unrecoverable fault.
    ///
    /// Surfaces to the operator; the machine is left in the error state.
    #[error("hypervisor fault: {0}")]
    Hypervisor(String),

    /// A machine descriptor could not be serialized or parsed.
    #[error("machine persistence error: {0}")]
    Persistence(String),

    /// Error from the platform layer.
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Shared error from the common layer.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Common(CommonError::Io(err))
    }
}
