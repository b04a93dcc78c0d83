//! Backend abstraction for control plane operations.
//!
//! The [`ControlPlane`] trait is the narrow collaborator interface the
//! deployment engine consumes. Implementations are thin request/response
//! wrappers; the only one shipped here is the in-memory plane, used for
//! tests and as a local emulator persisted to a state file.

pub mod memory;

use crate::error::Result;
use crate::types::{
    AliasRecord, ApiRecord, BasePathMapping, BucketNotification, DomainName, EnvironmentRecord,
    EnvironmentRequest, FunctionConfigUpdate, FunctionRecord, FunctionSpec, PermissionGrant,
    RuleTarget, StageDeployment,
};
use std::collections::BTreeMap;

/// Remote control plane operations.
///
/// Every mutation is keyed by a human-chosen name. Implementations must
/// report a missing name as [`Error::NotFound`](crate::Error::NotFound) and
/// a duplicate as [`Error::AlreadyExists`](crate::Error::AlreadyExists).
pub trait ControlPlane: Send + Sync {
    // =========================================================================
    // Identity
    // =========================================================================

    /// Resolve an execution role name to its ARN.
    fn role_arn(&self, role_name: &str) -> Result<String>;

    // =========================================================================
    // Compute units
    // =========================================================================

    /// Fetch a compute unit by name.
    fn get_function(&self, name: &str) -> Result<FunctionRecord>;

    /// Create a compute unit with its initial code.
    fn create_function(&self, spec: &FunctionSpec, code: &[u8]) -> Result<FunctionRecord>;

    /// Replace the code of an existing compute unit.
    fn update_function_code(&self, name: &str, code: &[u8]) -> Result<FunctionRecord>;

    /// Update handler, role and limits of an existing compute unit.
    fn update_function_configuration(
        &self,
        name: &str,
        update: &FunctionConfigUpdate,
    ) -> Result<FunctionRecord>;

    /// Publish an immutable version, validated against `code_checksum`.
    ///
    /// Returns the new version number.
    fn publish_version(&self, name: &str, code_checksum: &str) -> Result<String>;

    /// Delete a named alias.
    fn delete_alias(&self, function: &str, alias: &str) -> Result<()>;

    /// Create a named alias pointing at a version number.
    fn create_alias(&self, function: &str, alias: &str, version: &str) -> Result<AliasRecord>;

    /// Attach a permission statement to a compute unit.
    fn add_permission(&self, grant: &PermissionGrant) -> Result<()>;

    // =========================================================================
    // Schedule rules and topics
    // =========================================================================

    /// Create or replace a schedule rule; returns the rule ARN.
    fn put_rule(&self, name: &str, schedule_expression: &str) -> Result<String>;

    /// Set the targets of a schedule rule.
    fn put_targets(&self, rule: &str, targets: &[RuleTarget]) -> Result<()>;

    /// Resolve a topic name to its ARN.
    fn topic_arn(&self, topic: &str) -> Result<String>;

    /// Subscribe a compute unit endpoint to a topic; returns the subscription ARN.
    fn subscribe(&self, topic_arn: &str, endpoint_arn: &str) -> Result<String>;

    // =========================================================================
    // Object storage
    // =========================================================================

    /// Names of every bucket visible to the account, sorted.
    fn list_buckets(&self) -> Result<Vec<String>>;

    /// Fetch the notification configuration of a bucket (empty if unset).
    fn get_bucket_notification(&self, bucket: &str) -> Result<BucketNotification>;

    /// Replace the entire notification configuration of a bucket.
    fn put_bucket_notification(&self, bucket: &str, config: &BucketNotification) -> Result<()>;

    /// Upload an object.
    fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<()>;

    // =========================================================================
    // HTTP APIs
    // =========================================================================

    /// List all API definitions.
    fn list_apis(&self) -> Result<Vec<ApiRecord>>;

    /// Import a new API from a document.
    fn import_api(&self, document: &serde_json::Value) -> Result<ApiRecord>;

    /// Overwrite an existing API with a document.
    fn put_api(&self, api_id: &str, document: &serde_json::Value) -> Result<ApiRecord>;

    /// Deploy an API to a stage with stage variables.
    fn create_deployment(
        &self,
        api_id: &str,
        stage: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<StageDeployment>;

    /// List custom domain names.
    fn list_domain_names(&self) -> Result<Vec<String>>;

    /// Create a custom domain name.
    fn create_domain_name(&self, domain: &DomainName) -> Result<()>;

    /// Delete a base-path mapping.
    fn delete_base_path_mapping(&self, domain: &str, base_path: &str) -> Result<()>;

    /// Create a base-path mapping.
    fn create_base_path_mapping(&self, mapping: &BasePathMapping) -> Result<()>;

    // =========================================================================
    // Application environments
    // =========================================================================

    /// Create an application.
    fn create_application(&self, name: &str) -> Result<()>;

    /// Create (or return) the bucket used for uploaded bundles.
    fn create_storage_location(&self) -> Result<String>;

    /// Register an uploaded bundle as an application version.
    fn create_application_version(
        &self,
        application: &str,
        version_label: &str,
        bucket: &str,
        key: &str,
    ) -> Result<()>;

    /// Update an existing environment.
    fn update_environment(&self, request: &EnvironmentRequest) -> Result<EnvironmentRecord>;

    /// Create a new environment.
    fn create_environment(&self, request: &EnvironmentRequest) -> Result<EnvironmentRecord>;
}
