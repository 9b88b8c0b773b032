//! Error types for MetaVol
//!
//! One error kind per failure class; callers match on the kind, not on
//! source-specific codes.

use crate::types::{FileDescriptor, VolumeKind};
use thiserror::Error;

/// Common result type for MetaVol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for MetaVol
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not enough space: requested {requested_pages} pages, available {available_pages} pages")]
    NotEnoughSpace {
        requested_pages: u64,
        available_pages: u64,
    },

    #[error("persist failed: {0}")]
    PersistFailed(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("volume still has {active_files} active file(s)")]
    StillActive { active_files: usize },

    #[error("corrupt volume: {0}")]
    CorruptVolume(String),

    #[error("volume {0} is not open")]
    VolumeNotOpen(VolumeKind),

    #[error("file descriptor {0} is already open")]
    AlreadyOpen(FileDescriptor),

    #[error("operation not supported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an already exists error
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    /// Create a persist failed error
    pub fn persist_failed(msg: impl Into<String>) -> Self {
        Self::PersistFailed(msg.into())
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Create a corrupt volume error
    pub fn corrupt_volume(msg: impl Into<String>) -> Self {
        Self::CorruptVolume(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is an out-of-space error
    #[must_use]
    pub fn is_out_of_space(&self) -> bool {
        matches!(self, Self::NotEnoughSpace { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_predicates() {
        assert!(Error::not_found("file x").is_not_found());
        assert!(
            Error::NotEnoughSpace {
                requested_pages: 8,
                available_pages: 0
            }
            .is_out_of_space()
        );
        assert!(!Error::persist_failed("io").is_not_found());
    }

    #[test]
    fn test_error_display() {
        let err = Error::StillActive { active_files: 2 };
        assert_eq!(err.to_string(), "volume still has 2 active file(s)");
    }
}
