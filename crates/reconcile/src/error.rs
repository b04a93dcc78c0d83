//! Error types for the reconcile crate

use thiserror::Error;

/// Errors that abort a unit, an API, an environment or the whole run
#[derive(Error, Debug)]
pub enum Error {
    /// Control plane error on a fatal operation
    #[error(transparent)]
    ControlPlane(#[from] controlplane::Error),

    /// Packaging failed; nothing was deployed
    #[error("packaging failed: {0}")]
    Package(#[from] packager::Error),

    /// A declared spec cannot be deployed as written
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// Worker pool could not be created
    #[error("failed to create thread pool: {0}")]
    ThreadPool(String),
}

impl Error {
    /// Whether this error came from a checksum mismatch on publish.
    pub fn is_checksum_mismatch(&self) -> bool {
        matches!(
            self,
            Error::ControlPlane(e) if e.category() == controlplane::ErrorCategory::ChecksumMismatch
        )
    }
}

/// Result type for reconcile operations
pub type Result<T> = std::result::Result<T, Error>;
