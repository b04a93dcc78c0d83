//! Invoke permissions for calling principals.
//!
//! Statement ids are derived from the (unit, principal, source) triple, so
//! granting the same permission twice hits "already exists" instead of
//! accumulating duplicates.

use crate::context::DeployContext;
use crate::policy::{self, Operation, Warning};
use controlplane::{INVOKE_ACTION, PermissionGrant, Principal};

/// Stable statement id for a grant.
pub fn statement_id(unit: &str, principal: Principal, source_arn: Option<&str>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(unit.as_bytes());
    hasher.update(&[0]);
    hasher.update(principal.service().as_bytes());
    if let Some(source) = source_arn {
        hasher.update(&[0]);
        hasher.update(source.as_bytes());
    }
    hasher.finalize().to_hex()[..32].to_string()
}

/// Grants invoke rights on compute units.
///
/// Every failure is advisory: it is recorded as a warning and never
/// blocks the deployment.
pub struct PermissionBinder<'a> {
    ctx: DeployContext<'a>,
}

impl<'a> PermissionBinder<'a> {
    pub fn new(ctx: DeployContext<'a>) -> Self {
        Self { ctx }
    }

    /// Allow `principal` to invoke `unit`, optionally only from `source_arn`.
    ///
    /// Returns whether a new statement was added.
    pub fn grant(
        &self,
        unit: &str,
        principal: Principal,
        source_arn: Option<&str>,
        warnings: &mut Vec<Warning>,
    ) -> bool {
        let grant = PermissionGrant {
            function: unit.to_string(),
            statement_id: statement_id(unit, principal, source_arn),
            action: INVOKE_ACTION.to_string(),
            principal,
            source_arn: source_arn.map(str::to_string),
        };

        let result = self.ctx.call(|p| p.add_permission(&grant));
        match policy::absorb(Operation::AddPermission, unit, result, warnings) {
            Ok(Some(())) => {
                log::info!("Granted {principal} invoke on {unit}");
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use controlplane::{
        ControlPlane, Error as PlaneError, FunctionSpec, MemoryControlPlane, RetryConfig,
    };

    fn plane_with_function() -> MemoryControlPlane {
        let plane = MemoryControlPlane::new("us-east-1", "123456789012");
        let spec = FunctionSpec {
            name: "f1".into(),
            runtime: "python3.12".into(),
            role_arn: "arn:aws:iam::123456789012:role/basic".into(),
            handler: "app.handler".into(),
            memory_mb: 128,
            timeout_secs: 60,
        };
        plane.create_function(&spec, b"code").unwrap();
        plane
    }

    #[test]
    fn test_statement_id_is_stable_and_distinct() {
        let a = statement_id("f1", Principal::Storage, Some("arn:aws:s3:::b"));
        let b = statement_id("f1", Principal::Storage, Some("arn:aws:s3:::b"));
        let c = statement_id("f1", Principal::ApiGateway, None);
        let d = statement_id("f1", Principal::Storage, Some("arn:aws:s3:::other"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_grant_twice_yields_one_statement() {
        let plane = plane_with_function();
        let retry = RetryConfig::no_retry();
        let binder = PermissionBinder::new(DeployContext::new(&plane, &retry));
        let mut warnings = Vec::new();

        assert!(binder.grant("f1", Principal::ApiGateway, None, &mut warnings));
        assert!(!binder.grant("f1", Principal::ApiGateway, None, &mut warnings));

        assert!(warnings.is_empty());
        assert_eq!(plane.snapshot().permissions["f1"].len(), 1);
    }

    #[test]
    fn test_grant_failure_is_a_warning() {
        let plane = plane_with_function();
        let retry = RetryConfig::no_retry();
        let binder = PermissionBinder::new(DeployContext::new(&plane, &retry));
        plane.fail_next(
            "add_permission",
            PlaneError::PermissionDenied {
                message: "not authorized".into(),
            },
        );
        let mut warnings = Vec::new();

        assert!(!binder.grant("f1", Principal::Topic, None, &mut warnings));

        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].subject, "f1");
    }
}
