//! Error types for the platform layer.

use std::path::PathBuf;

use keel_error::CommonError;
use thiserror::Error;

use crate::host::HostVersion;

/// Result type alias for platform operations.
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Errors that can occur while assembling a platform configuration.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The host OS is older than the feature being constructed requires.
    ///
    /// Raised before any native resource is touched, so a failed
    /// construction never leaves a partial object behind.
    #[error("unsupported host version: requires {required}, host is {actual}")]
    UnsupportedHostVersion {
        /// Minimum host version the feature requires.
        required: HostVersion,
        /// Version the host actually reports.
        actual: HostVersion,
    },

    /// The hardware model cannot run on this host.
    #[error("hardware model {model} is not supported by this host")]
    UnsupportedModel {
        /// Display form of the rejected model.
        model: String,
    },

    /// A required platform field was never supplied to the builder.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The auxiliary storage was created for a different hardware model
    /// than the one bound to the platform.
    #[error("auxiliary storage model {storage} does not match platform model {platform}")]
    IncompatibleModel {
        /// Model the platform is being built with.
        platform: String,
        /// Model the auxiliary storage was created with.
        storage: String,
    },

    /// An identity blob could not be decoded.
    #[error("malformed {what}: {reason}")]
    Malformed {
        /// Which identity object failed to decode.
        what: &'static str,
        /// Why decoding failed.
        reason: String,
    },

    /// Auxiliary storage creation refused to clobber an existing file.
    #[error("auxiliary storage already exists: {}", .0.display())]
    PathExists(PathBuf),

    /// An existing auxiliary storage file failed header validation.
    #[error("auxiliary storage is corrupt: {0}")]
    Corrupt(String),

    /// A restore image exists but its manifest could not be parsed.
    #[error("restore image is unreadable: {0}")]
    Unreadable(String),

    /// A path that was expected to exist does not.
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Shared error from the common layer.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl From<std::io::Error> for PlatformError {
    fn from(err: std::io::Error) -> Self {
        Self::Common(CommonError::Io(err))
    }
}
