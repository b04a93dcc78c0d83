//! Advisory vs fatal handling, declared per operation.
//!
//! Every remote mutation the engine performs is listed in [`Operation`].
//! Its [`Severity`] decides what a failure does: fatal failures abort the
//! pipeline they belong to, advisory failures become [`Warning`]s and the
//! pipeline carries on. Call sites go through [`absorb`] instead of
//! deciding ad hoc.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a failed operation does to its pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Abort the unit (or API, or environment)
    Fatal,
    /// Report and continue
    Advisory,
}

/// Remote operations performed during a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ResolveRole,
    UploadCode,
    CreateFunction,
    UpdateConfiguration,
    PublishVersion,
    DeleteAlias,
    CreateAlias,
    AddPermission,
    PutRule,
    PutTargets,
    ResolveTopic,
    Subscribe,
    ListBuckets,
    GetBucketNotification,
    PutBucketNotification,
    ListApis,
    ImportApi,
    PutApi,
    CreateDeployment,
    ListDomainNames,
    CreateDomainName,
    DeleteBasePathMapping,
    CreateBasePathMapping,
    CreateApplication,
    CreateStorageLocation,
    UploadBundle,
    CreateApplicationVersion,
    UpdateEnvironment,
    CreateEnvironment,
}

impl Operation {
    /// Severity of a failure of this operation.
    pub fn severity(&self) -> Severity {
        match self {
            Operation::AddPermission
            | Operation::PutRule
            | Operation::PutTargets
            | Operation::ResolveTopic
            | Operation::Subscribe
            | Operation::ListBuckets
            | Operation::GetBucketNotification
            | Operation::PutBucketNotification => Severity::Advisory,
            _ => Severity::Fatal,
        }
    }

    /// Whether "already exists" means the desired state is already in place.
    pub fn tolerates_existing(&self) -> bool {
        matches!(
            self,
            Operation::AddPermission
                | Operation::Subscribe
                | Operation::CreateDomainName
                | Operation::CreateApplication
                | Operation::CreateApplicationVersion
        )
    }

    pub fn is_advisory(&self) -> bool {
        self.severity() == Severity::Advisory
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::ResolveRole => "resolve role",
            Operation::UploadCode => "upload code",
            Operation::CreateFunction => "create function",
            Operation::UpdateConfiguration => "update configuration",
            Operation::PublishVersion => "publish version",
            Operation::DeleteAlias => "delete alias",
            Operation::CreateAlias => "create alias",
            Operation::AddPermission => "add permission",
            Operation::PutRule => "put schedule rule",
            Operation::PutTargets => "put rule targets",
            Operation::ResolveTopic => "resolve topic",
            Operation::Subscribe => "subscribe",
            Operation::ListBuckets => "list buckets",
            Operation::GetBucketNotification => "get bucket notification",
            Operation::PutBucketNotification => "put bucket notification",
            Operation::ListApis => "list APIs",
            Operation::ImportApi => "import API",
            Operation::PutApi => "overwrite API",
            Operation::CreateDeployment => "create stage deployment",
            Operation::ListDomainNames => "list domain names",
            Operation::CreateDomainName => "create domain name",
            Operation::DeleteBasePathMapping => "delete base path mapping",
            Operation::CreateBasePathMapping => "create base path mapping",
            Operation::CreateApplication => "create application",
            Operation::CreateStorageLocation => "create storage location",
            Operation::UploadBundle => "upload bundle",
            Operation::CreateApplicationVersion => "create application version",
            Operation::UpdateEnvironment => "update environment",
            Operation::CreateEnvironment => "create environment",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A non-fatal failure surfaced to the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub operation: Operation,
    /// Resource the operation targeted
    pub subject: String,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.operation, self.subject, self.message)
    }
}

/// Apply the policy of `operation` to `result`.
///
/// Returns `Ok(Some(value))` on success and `Ok(None)` when the failure was
/// absorbed (existing state, or an advisory failure recorded in `warnings`).
/// Fatal failures are returned as errors.
pub fn absorb<T>(
    operation: Operation,
    subject: &str,
    result: controlplane::Result<T>,
    warnings: &mut Vec<Warning>,
) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_already_exists() && operation.tolerates_existing() => {
            log::debug!("{operation} {subject}: already in place");
            Ok(None)
        }
        Err(e) if operation.is_advisory() => {
            log::warn!("{operation} {subject} failed: {e}");
            warnings.push(Warning {
                operation,
                subject: subject.to_string(),
                message: e.to_string(),
            });
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use controlplane::Error as PlaneError;

    #[test]
    fn test_severity_table() {
        let fatal = [
            Operation::UploadCode,
            Operation::CreateFunction,
            Operation::PublishVersion,
            Operation::CreateAlias,
            Operation::ImportApi,
            Operation::CreateEnvironment,
        ];
        let advisory = [
            Operation::AddPermission,
            Operation::PutRule,
            Operation::PutTargets,
            Operation::Subscribe,
            Operation::PutBucketNotification,
        ];
        assert!(fatal.iter().all(|op| op.severity() == Severity::Fatal));
        assert!(advisory.iter().all(|op| op.severity() == Severity::Advisory));
    }

    #[test]
    fn test_absorb_success() {
        let mut warnings = Vec::new();
        let value = absorb(Operation::PutRule, "f2", Ok(7), &mut warnings).unwrap();
        assert_eq!(value, Some(7));
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_absorb_existing_permission_is_silent() {
        let mut warnings = Vec::new();
        let result: controlplane::Result<()> = Err(PlaneError::already_exists("permission", "x"));
        let value = absorb(Operation::AddPermission, "f1", result, &mut warnings).unwrap();
        assert!(value.is_none());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_absorb_advisory_failure_warns() {
        let mut warnings = Vec::new();
        let result: controlplane::Result<()> = Err(PlaneError::PermissionDenied {
            message: "not authorized".into(),
        });
        let value = absorb(Operation::AddPermission, "f1", result, &mut warnings).unwrap();
        assert!(value.is_none());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].operation, Operation::AddPermission);
    }

    #[test]
    fn test_absorb_fatal_failure_propagates() {
        let mut warnings = Vec::new();
        let result: controlplane::Result<()> = Err(PlaneError::Throttled {
            message: "slow down".into(),
        });
        assert!(absorb(Operation::CreateFunction, "f1", result, &mut warnings).is_err());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_existing_alias_is_not_tolerated() {
        let mut warnings = Vec::new();
        let result: controlplane::Result<()> = Err(PlaneError::already_exists("alias", "f1:dev"));
        assert!(absorb(Operation::CreateAlias, "f1", result, &mut warnings).is_err());
    }
}
