//! Core types for deployment reconciliation

use crate::policy::Warning;
use controlplane::EnvironmentTier;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Declared specs
// ============================================================================

/// A compute unit as declared in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentUnit {
    /// Unique unit name
    pub name: String,
    pub runtime: String,
    /// Execution role name or ARN
    pub role: String,
    pub handler: String,
    pub memory_mb: u32,
    pub timeout_secs: u32,
    /// `rate(...)` or `cron(...)`
    pub schedule_expression: Option<String>,
    #[serde(default)]
    pub event_sources: EventSources,
    /// Alias label; without one the unit is invoked unqualified
    pub version: Option<String>,
}

/// Event sources bound to a unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSources {
    /// Invoked through the HTTP gateway
    #[serde(default)]
    pub api_gateway: bool,
    pub storage: Option<StorageSource>,
    pub topic: Option<TopicSource>,
}

impl EventSources {
    pub fn is_empty(&self) -> bool {
        !self.api_gateway && self.storage.is_none() && self.topic.is_none()
    }
}

/// Object-created notifications from a bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSource {
    pub bucket: String,
    pub prefix: Option<String>,
}

impl StorageSource {
    /// ARN of the bucket, used to scope the invoke permission.
    pub fn bucket_arn(&self) -> String {
        format!("arn:aws:s3:::{}", self.bucket)
    }
}

/// Messages published to a notification topic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSource {
    /// Topic to subscribe to; without one only the permission is granted
    pub name: Option<String>,
}

/// An HTTP-API as declared in the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpApiSpec {
    /// API name, written to the document's `info.title`
    pub name: String,
    /// OpenAPI/Swagger document
    pub document: serde_json::Value,
    /// Stage to deploy after the API is reconciled
    pub stage: Option<String>,
    /// Unit the stage's `lambda_function` variable points at
    pub function: Option<String>,
    pub domain: Option<DomainSpec>,
}

/// Custom domain for an HTTP-API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSpec {
    pub name: String,
    /// Base path mapped to the stage (empty maps the root)
    pub base_path: String,
    pub certificate_name: String,
    pub certificate_body: String,
    pub certificate_private_key: String,
    pub certificate_chain: String,
}

/// An application environment as declared in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    pub name: String,
    pub application: String,
    pub tier: EnvironmentTier,
    pub solution_stack: String,
    pub instance_type: String,
    /// Autoscaling group bounds (min, max)
    pub autoscaling: (u32, u32),
    pub processes: u32,
    pub threads: u32,
    pub wsgi_path: String,
    pub health_path: String,
    /// Enables an HTTPS listener when set
    pub certificate_arn: Option<String>,
}

/// Everything one run deploys
#[derive(Debug, Clone, Default)]
pub struct DeploymentPlan {
    pub units: Vec<DeploymentUnit>,
    pub apis: Vec<HttpApiSpec>,
    pub environments: Vec<EnvironmentSpec>,
    /// Label for application versions uploaded in this run
    pub environment_version: String,
}

// ============================================================================
// Reconciliation results
// ============================================================================

/// How an upsert converged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Nothing existed under the name; created
    Created,
    /// Existing resource updated in place
    Updated,
    /// Another writer created it first; the existing resource was updated
    AlreadyBound,
}

impl Outcome {
    pub fn is_created(&self) -> bool {
        matches!(self, Outcome::Created)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Created => write!(f, "created"),
            Outcome::Updated => write!(f, "updated"),
            Outcome::AlreadyBound => write!(f, "already bound"),
        }
    }
}

/// Remote identity of a named resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub kind: String,
    pub name: String,
    /// Remote-generated id
    pub id: String,
    /// ARN or other stable identifier
    pub arn: String,
}

/// Result of one upsert
#[derive(Debug, Clone)]
pub struct Reconciled<T> {
    pub record: ResourceRecord,
    pub outcome: Outcome,
    /// The remote's response from the winning path
    pub remote: T,
}

impl<T> Reconciled<T> {
    pub fn identifier(&self) -> &str {
        &self.record.arn
    }

    pub fn created(&self) -> bool {
        self.outcome.is_created()
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Per-unit pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitState {
    Pending,
    Uploaded,
    Aliased,
    PermissionsGranted,
    TriggersWired,
    Done,
    Failed,
}

impl UnitState {
    /// Whether a fatal error may move a unit from this state to `Failed`.
    pub fn can_fail(&self) -> bool {
        matches!(self, UnitState::Pending | UnitState::Uploaded)
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitState::Pending => "pending",
            UnitState::Uploaded => "uploaded",
            UnitState::Aliased => "aliased",
            UnitState::PermissionsGranted => "permissions granted",
            UnitState::TriggersWired => "triggers wired",
            UnitState::Done => "done",
            UnitState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of one unit's pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitReport {
    pub name: String,
    pub state: UnitState,
    pub outcome: Option<Outcome>,
    /// Unqualified compute unit ARN
    pub function_arn: Option<String>,
    /// ARN that triggers and permissions target (alias ARN when aliased)
    pub invoke_arn: Option<String>,
    /// Numbered version the alias points at
    pub version: Option<String>,
    pub warnings: Vec<Warning>,
    pub error: Option<String>,
}

impl UnitReport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: UnitState::Pending,
            outcome: None,
            function_arn: None,
            invoke_arn: None,
            version: None,
            warnings: Vec::new(),
            error: None,
        }
    }

    /// Move to the next pipeline state.
    pub fn advance(&mut self, state: UnitState) {
        log::debug!("{}: {} -> {}", self.name, self.state, state);
        self.state = state;
    }

    /// Record a fatal error. Later states keep their progress.
    pub fn fail(&mut self, error: impl fmt::Display) {
        let message = error.to_string();
        if self.state.can_fail() {
            log::error!("{}: {message}", self.name);
            self.state = UnitState::Failed;
        } else {
            log::warn!("{}: {message} (after {})", self.name, self.state);
        }
        self.error = Some(message);
    }

    pub fn is_failed(&self) -> bool {
        self.state == UnitState::Failed
    }
}

/// Outcome of an API or environment deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReport {
    pub name: String,
    pub record: Option<ResourceRecord>,
    pub outcome: Option<Outcome>,
    pub warnings: Vec<Warning>,
    pub error: Option<String>,
}

impl ResourceReport {
    pub fn succeeded<T>(name: &str, reconciled: &Reconciled<T>, warnings: Vec<Warning>) -> Self {
        Self {
            name: name.to_string(),
            record: Some(reconciled.record.clone()),
            outcome: Some(reconciled.outcome),
            warnings,
            error: None,
        }
    }

    pub fn failed(name: &str, error: impl fmt::Display, warnings: Vec<Warning>) -> Self {
        log::error!("{name}: {error}");
        Self {
            name: name.to_string(),
            record: None,
            outcome: None,
            warnings,
            error: Some(error.to_string()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Summary of one orchestration pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// Unit reports in declaration order
    pub units: Vec<UnitReport>,
    pub apis: Vec<ResourceReport>,
    pub environments: Vec<ResourceReport>,
    /// Warnings not tied to a single unit (bucket notifications)
    pub warnings: Vec<Warning>,
}

impl RunReport {
    /// Total number of advisory failures
    pub fn warning_count(&self) -> usize {
        self.warnings.len()
            + self.units.iter().map(|u| u.warnings.len()).sum::<usize>()
            + self.apis.iter().map(|a| a.warnings.len()).sum::<usize>()
            + self.environments.iter().map(|e| e.warnings.len()).sum::<usize>()
    }

    /// Names of everything that failed fatally
    pub fn failed(&self) -> Vec<&str> {
        self.units
            .iter()
            .filter(|u| u.is_failed())
            .map(|u| u.name.as_str())
            .chain(
                self.apis
                    .iter()
                    .chain(&self.environments)
                    .filter(|r| r.is_failed())
                    .map(|r| r.name.as_str()),
            )
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.failed().is_empty()
    }

    pub fn unit(&self, name: &str) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Operation;

    #[test]
    fn test_fail_only_from_early_states() {
        let mut report = UnitReport::new("f1");
        report.advance(UnitState::Uploaded);
        report.fail("checksum mismatch");
        assert_eq!(report.state, UnitState::Failed);

        let mut report = UnitReport::new("f2");
        report.advance(UnitState::Aliased);
        report.fail("late");
        assert_eq!(report.state, UnitState::Aliased);
        assert!(report.error.is_some());
    }

    #[test]
    fn test_run_report_counts() {
        let mut ok = UnitReport::new("ok");
        ok.advance(UnitState::Done);
        ok.warnings.push(Warning {
            operation: Operation::AddPermission,
            subject: "ok".into(),
            message: "denied".into(),
        });
        let mut bad = UnitReport::new("bad");
        bad.fail("boom");

        let report = RunReport {
            units: vec![ok, bad],
            ..Default::default()
        };
        assert_eq!(report.warning_count(), 1);
        assert_eq!(report.failed(), vec!["bad"]);
        assert!(!report.is_success());
    }

    #[test]
    fn test_bucket_arn() {
        let source = StorageSource {
            bucket: "uploads".into(),
            prefix: None,
        };
        assert_eq!(source.bucket_arn(), "arn:aws:s3:::uploads");
    }
}
