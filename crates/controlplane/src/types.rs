//! Request and response types for control plane operations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Action granted to invoking principals.
pub const INVOKE_ACTION: &str = "lambda:InvokeFunction";

/// Event class used for bucket notifications.
pub const OBJECT_CREATED_EVENT: &str = "s3:ObjectCreated:*";

/// Domain suffix of platform-generated hostnames.
pub const PLATFORM_DOMAIN_SUFFIX: &str = "amazonaws.com";

/// Service principals allowed to invoke a compute unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Principal {
    /// HTTP gateway
    ApiGateway,
    /// Object-storage bucket events
    Storage,
    /// Notification topic messages
    Topic,
    /// Time-based schedule rules
    Scheduler,
}

impl Principal {
    /// Service principal identifier.
    pub fn service(&self) -> &'static str {
        match self {
            Principal::ApiGateway => "apigateway.amazonaws.com",
            Principal::Storage => "s3.amazonaws.com",
            Principal::Topic => "sns.amazonaws.com",
            Principal::Scheduler => "events.amazonaws.com",
        }
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.service())
    }
}

// ============================================================================
// Compute units
// ============================================================================

/// Full definition used when creating a compute unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    /// Unique function name
    pub name: String,
    /// Runtime identifier (e.g. "python3.12")
    pub runtime: String,
    /// Resolved execution role ARN
    pub role_arn: String,
    /// Handler reference ("module.function")
    pub handler: String,
    /// Memory limit in MB
    pub memory_mb: u32,
    /// Timeout in seconds
    pub timeout_secs: u32,
}

/// Partial configuration update for an existing compute unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionConfigUpdate {
    pub role_arn: Option<String>,
    pub handler: Option<String>,
    pub memory_mb: Option<u32>,
    pub timeout_secs: Option<u32>,
}

impl FunctionConfigUpdate {
    /// Build a full update from a create spec.
    pub fn from_spec(spec: &FunctionSpec) -> Self {
        Self {
            role_arn: Some(spec.role_arn.clone()),
            handler: Some(spec.handler.clone()),
            memory_mb: Some(spec.memory_mb),
            timeout_secs: Some(spec.timeout_secs),
        }
    }

    /// Whether the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.role_arn.is_none()
            && self.handler.is_none()
            && self.memory_mb.is_none()
            && self.timeout_secs.is_none()
    }
}

/// Remote view of a compute unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub name: String,
    pub arn: String,
    pub runtime: String,
    pub role_arn: String,
    pub handler: String,
    pub memory_mb: u32,
    pub timeout_secs: u32,
    /// Checksum of the currently stored code
    pub code_checksum: String,
    /// Immutable versions published so far, in order
    #[serde(default)]
    pub versions: Vec<PublishedVersion>,
}

/// An immutable numbered version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedVersion {
    pub number: String,
    pub code_checksum: String,
}

/// A named pointer at one numbered version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRecord {
    pub function: String,
    pub name: String,
    pub version: String,
    pub arn: String,
}

/// One permission statement attached to a compute unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub function: String,
    pub statement_id: String,
    pub action: String,
    pub principal: Principal,
    pub source_arn: Option<String>,
}

// ============================================================================
// Events
// ============================================================================

/// Target attached to a schedule rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTarget {
    pub id: String,
    pub arn: String,
}

/// Remote view of a schedule rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub name: String,
    pub arn: String,
    pub schedule_expression: String,
    pub enabled: bool,
    #[serde(default)]
    pub targets: Vec<RuleTarget>,
}

/// One filter+target entry of a bucket notification configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionNotification {
    pub function_arn: String,
    pub events: Vec<String>,
    pub prefix: Option<String>,
}

/// The complete notification configuration of one bucket.
///
/// The remote replaces the whole configuration on every put.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketNotification {
    pub function_configurations: Vec<FunctionNotification>,
}

// ============================================================================
// HTTP APIs
// ============================================================================

/// Remote view of an HTTP-API definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRecord {
    pub id: String,
    pub name: String,
    /// Last submitted document
    pub document: serde_json::Value,
}

/// Custom domain name with its certificate material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainName {
    pub name: String,
    pub certificate_name: String,
    pub certificate_body: String,
    pub certificate_private_key: String,
    pub certificate_chain: String,
}

/// Binding of a domain base path to an API stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasePathMapping {
    pub domain: String,
    pub base_path: String,
    pub api_id: String,
    pub stage: String,
}

/// A deployment of an API to a named stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDeployment {
    pub id: String,
    pub api_id: String,
    pub stage: String,
    pub variables: BTreeMap<String, String>,
}

// ============================================================================
// Application environments
// ============================================================================

/// Environment tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentTier {
    /// HTTP serving tier
    Web,
    /// Queue-driven worker tier
    Worker,
}

impl EnvironmentTier {
    /// Tier name as the platform expects it.
    pub fn name(&self) -> &'static str {
        match self {
            EnvironmentTier::Web => "WebServer",
            EnvironmentTier::Worker => "Worker",
        }
    }

    /// Tier type as the platform expects it.
    pub fn tier_type(&self) -> &'static str {
        match self {
            EnvironmentTier::Web => "Standard",
            EnvironmentTier::Worker => "SQS/HTTP",
        }
    }
}

/// A namespaced environment option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSetting {
    pub namespace: String,
    pub option_name: String,
    pub value: String,
    pub resource_name: Option<String>,
}

impl OptionSetting {
    pub fn new(
        namespace: impl Into<String>,
        option_name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            option_name: option_name.into(),
            value: value.into(),
            resource_name: None,
        }
    }

    /// Scope the option to a named platform resource.
    pub fn for_resource(mut self, resource_name: impl Into<String>) -> Self {
        self.resource_name = Some(resource_name.into());
        self
    }
}

/// Create or update request for an application environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRequest {
    pub application: String,
    pub environment: String,
    pub tier: EnvironmentTier,
    pub solution_stack: String,
    pub version_label: String,
    pub option_settings: Vec<OptionSetting>,
}

/// Remote view of an application environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    pub id: String,
    pub application: String,
    pub name: String,
    pub tier: EnvironmentTier,
    pub solution_stack: String,
    pub version_label: String,
    pub option_settings: Vec<OptionSetting>,
}

// ============================================================================
// Retry
// ============================================================================

/// Configuration for retrying throttled requests.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(20),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}
