//! Common error types for Keel.
//!
//! This crate provides the unified error vocabulary shared across the Keel
//! crates, so that configuration, platform, and lifecycle layers report the
//! same categories of failure in the same shape.
//!
//! # Usage
//!
//! ```rust
//! use keel_error::CommonError;
//!
//! fn example() -> Result<(), CommonError> {
//!     Err(CommonError::not_found("machine descriptor"))
//! }
//! ```
//!
//! # Crate-Specific Errors
//!
//! Each crate defines its own error type that wraps `CommonError`:
//!
//! ```rust,ignore
//! use keel_error::CommonError;
//! use thiserror::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum MyError {
//!     #[error(transparent)]
//!     Common(#[from] CommonError),
//!
//!     #[error("my specific error: {0}")]
//!     Specific(String),
//! }
//! ```

#![warn(missing_docs)]

mod common;

pub use common::CommonError;

/// Result type alias using `CommonError`.
pub type Result<T> = std::result::Result<T, CommonError>;
