//! # controlplane
//!
//! Collaborator interface for serverless deployments.
//!
//! This crate provides:
//! - The [`ControlPlane`] trait: function, alias, permission, schedule,
//!   topic, bucket, HTTP-API and application-environment operations
//! - An error taxonomy that separates "not found" and "already exists"
//!   from real failures
//! - Retry with exponential backoff for throttled requests
//! - [`MemoryControlPlane`], an in-memory implementation for tests and
//!   local emulation
//!
//! ## Example
//!
//! ```
//! use controlplane::{ControlPlane, FunctionSpec, MemoryControlPlane};
//!
//! let plane = MemoryControlPlane::new("us-east-1", "123456789012");
//! let spec = FunctionSpec {
//!     name: "f1".into(),
//!     runtime: "python3.12".into(),
//!     role_arn: plane.role_arn("lambda_basic_execution")?,
//!     handler: "app.handler".into(),
//!     memory_mb: 128,
//!     timeout_secs: 60,
//! };
//!
//! // Updating a unit that does not exist yet reports NotFound
//! let err = plane.update_function_code("f1", b"code").unwrap_err();
//! assert!(err.is_not_found());
//!
//! let record = plane.create_function(&spec, b"code")?;
//! assert!(record.arn.ends_with(":function:f1"));
//! # Ok::<(), controlplane::Error>(())
//! ```

pub mod backend;
pub mod error;
pub mod retry;
pub mod types;

pub use backend::ControlPlane;
pub use backend::memory::{MemoryControlPlane, PlaneState, code_checksum};
pub use error::{Error, ErrorCategory, Result};
pub use retry::{RetryCallback, with_retry, with_retry_logged};
pub use types::{
    AliasRecord, ApiRecord, BasePathMapping, BucketNotification, DomainName, EnvironmentRecord,
    EnvironmentRequest, EnvironmentTier, FunctionConfigUpdate, FunctionNotification,
    FunctionRecord, FunctionSpec, INVOKE_ACTION, OBJECT_CREATED_EVENT, OptionSetting,
    PLATFORM_DOMAIN_SUFFIX, PermissionGrant, Principal, PublishedVersion, RetryConfig,
    RuleRecord, RuleTarget, StageDeployment,
};
