//! Error types for control plane operations.
//!
//! Remote failures are translated into a small taxonomy at the client
//! boundary so that callers can branch on "not found" and "already exists"
//! without inspecting raw error codes.

use thiserror::Error;

/// Categories of control plane errors.
///
/// The category decides whether an error drives create-vs-update branching,
/// is absorbed as success, is retried, or aborts the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// No resource exists under the given name
    NotFound,
    /// A resource with this name or statement id already exists
    AlreadyExists,
    /// Uploaded code does not match the checksum supplied to publish
    ChecksumMismatch,
    /// Caller lacks rights for the operation
    PermissionDenied,
    /// Request rate exceeded (transient, retryable)
    Throttled,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled)
    }

    /// Whether this error can be safely ignored (operation already done).
    pub fn is_ignorable(&self) -> bool {
        matches!(self, Self::AlreadyExists)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NotFound => "Resource not found",
            Self::AlreadyExists => "Resource already exists",
            Self::ChecksumMismatch => "Code checksum mismatch",
            Self::PermissionDenied => "Permission denied",
            Self::Throttled => "Request throttled",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::NotFound => "No action needed - the resource will be created",
            Self::AlreadyExists => "No action needed - the resource is already bound",
            Self::ChecksumMismatch => {
                "Re-run the deployment; another upload may have overwritten the code"
            }
            Self::PermissionDenied => "Check the credentials and policies used for deployment",
            Self::Throttled => "Wait a moment and try again",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur during control plane operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No resource of this kind exists under the given name
    #[error("{kind} not found: {name}")]
    NotFound {
        /// Resource kind (e.g. "function", "alias", "api")
        kind: String,
        /// Human-chosen resource name
        name: String,
    },

    /// A resource of this kind already exists under the given name
    #[error("{kind} already exists: {name}")]
    AlreadyExists {
        /// Resource kind
        kind: String,
        /// Human-chosen resource name or statement id
        name: String,
    },

    /// The platform rejected a publish because stored code has a different checksum
    #[error("checksum mismatch for {function}: expected {expected}, stored {actual}")]
    ChecksumMismatch {
        /// Function whose version was being published
        function: String,
        /// Checksum supplied by the caller
        expected: String,
        /// Checksum of the code the platform holds
        actual: String,
    },

    /// Permission denied
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Details about what permission was denied
        message: String,
    },

    /// Request rate exceeded
    #[error("throttled: {message}")]
    Throttled {
        /// Message returned by the remote
        message: String,
    },

    /// Any other remote failure
    #[error("remote error {code}: {message}")]
    Remote {
        /// Raw remote error code
        code: String,
        /// Message returned by the remote
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a [`Error::NotFound`].
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Shorthand for an [`Error::AlreadyExists`].
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::AlreadyExists { .. } => ErrorCategory::AlreadyExists,
            Error::ChecksumMismatch { .. } => ErrorCategory::ChecksumMismatch,
            Error::PermissionDenied { .. } => ErrorCategory::PermissionDenied,
            Error::Throttled { .. } => ErrorCategory::Throttled,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether this error can be safely ignored.
    pub fn is_ignorable(&self) -> bool {
        self.category().is_ignorable()
    }

    /// Whether the remote reported that no resource exists under the name.
    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }

    /// Whether the remote reported that the resource already exists.
    pub fn is_already_exists(&self) -> bool {
        self.category() == ErrorCategory::AlreadyExists
    }

    /// Translate a raw remote error code into the error taxonomy.
    ///
    /// `kind` and `name` identify the resource the request addressed.
    pub fn from_error_code(code: &str, message: &str, kind: &str, name: &str) -> Self {
        match code {
            "ResourceNotFoundException" | "NotFoundException" | "NoSuchEntity"
            | "NoSuchBucket" => Error::not_found(kind, name),

            "ResourceConflictException"
            | "ConflictException"
            | "ResourceAlreadyExistsException"
            | "EntityAlreadyExists"
            | "BucketAlreadyOwnedByYou" => Error::already_exists(kind, name),

            "CodeVerificationFailedException" | "PreconditionFailedException" => {
                Error::ChecksumMismatch {
                    function: name.to_string(),
                    expected: String::new(),
                    actual: message.trim().to_string(),
                }
            }

            "AccessDeniedException" | "AccessDenied" | "UnauthorizedOperation"
            | "InsufficientPrivilegesException" => Error::PermissionDenied {
                message: message.trim().to_string(),
            },

            "TooManyRequestsException" | "ThrottlingException" | "Throttling"
            | "SlowDown" => Error::Throttled {
                message: message.trim().to_string(),
            },

            _ => Error::Remote {
                code: code.to_string(),
                message: message.trim().to_string(),
            },
        }
    }
}

/// Result type for control plane operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_retryable() {
        assert!(ErrorCategory::Throttled.is_retryable());
        assert!(!ErrorCategory::NotFound.is_retryable());
        assert!(!ErrorCategory::ChecksumMismatch.is_retryable());
    }

    #[test]
    fn test_error_category_ignorable() {
        assert!(ErrorCategory::AlreadyExists.is_ignorable());
        assert!(!ErrorCategory::PermissionDenied.is_ignorable());
        assert!(!ErrorCategory::NotFound.is_ignorable());
    }

    #[test]
    fn test_from_error_code_not_found() {
        let err = Error::from_error_code(
            "ResourceNotFoundException",
            "Function not found: arn:aws:lambda:us-east-1:1:function:f1",
            "function",
            "f1",
        );
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "function not found: f1");
    }

    #[test]
    fn test_from_error_code_conflict() {
        let err = Error::from_error_code(
            "ResourceConflictException",
            "The statement id (abc) provided already exists",
            "permission",
            "abc",
        );
        assert!(err.is_already_exists());
        assert!(err.is_ignorable());
    }

    #[test]
    fn test_from_error_code_checksum() {
        let err = Error::from_error_code(
            "CodeVerificationFailedException",
            "CodeSHA256 does not match",
            "function",
            "f1",
        );
        assert_eq!(err.category(), ErrorCategory::ChecksumMismatch);
    }

    #[test]
    fn test_from_error_code_throttled() {
        let err = Error::from_error_code("TooManyRequestsException", "Rate exceeded", "function", "f1");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_from_error_code_unknown() {
        let err = Error::from_error_code("ServiceException", " boom ", "function", "f1");
        assert_eq!(err.category(), ErrorCategory::Other);
        assert_eq!(err.to_string(), "remote error ServiceException: boom");
    }
}
