//! Application environment deployment.
//!
//! Ensures the application exists, uploads the bundle to the platform's
//! storage location as `<label>.zip`, registers it as an application
//! version, then upserts the environment pointing at that version.

use crate::context::DeployContext;
use crate::error::Result;
use crate::policy::{self, Operation, Warning};
use crate::reconciler::{EnvironmentKind, upsert};
use crate::types::{EnvironmentSpec, Reconciled};
use controlplane::{EnvironmentRecord, EnvironmentRequest, OptionSetting};
use packager::Artifact;

const PYTHON_CONTAINER: &str = "aws:elasticbeanstalk:container:python";
const AUTOSCALING_GROUP: &str = "aws:autoscaling:asg";
const LAUNCH_CONFIGURATION: &str = "aws:autoscaling:launchconfiguration";
const LISTENER_HTTP: &str = "aws:elb:listener:80";
const LISTENER_HTTPS: &str = "aws:elb:listener:443";
const APPLICATION: &str = "aws:elasticbeanstalk:application";
const HEALTH_CHECK: &str = "aws:elb:healthcheck";

/// Option settings for an environment spec.
pub fn option_settings(spec: &EnvironmentSpec) -> Vec<OptionSetting> {
    let (min, max) = spec.autoscaling;
    let mut settings = vec![
        OptionSetting::new(PYTHON_CONTAINER, "NumProcesses", spec.processes.to_string()),
        OptionSetting::new(PYTHON_CONTAINER, "NumThreads", spec.threads.to_string()),
        OptionSetting::new(AUTOSCALING_GROUP, "MinSize", min.to_string())
            .for_resource("AWSEBAutoScalingGroup"),
        OptionSetting::new(AUTOSCALING_GROUP, "MaxSize", max.to_string())
            .for_resource("AWSEBAutoScalingGroup"),
        OptionSetting::new(LAUNCH_CONFIGURATION, "InstanceType", &spec.instance_type),
        OptionSetting::new(PYTHON_CONTAINER, "WSGIPath", &spec.wsgi_path),
        OptionSetting::new(LISTENER_HTTP, "InstancePort", "80"),
        OptionSetting::new(LISTENER_HTTP, "InstanceProtocol", "HTTP"),
        OptionSetting::new(APPLICATION, "Application Healthcheck URL", &spec.health_path),
        OptionSetting::new(HEALTH_CHECK, "Target", &spec.health_path)
            .for_resource("AWSEBLoadBalancer"),
    ];

    if let Some(certificate_arn) = &spec.certificate_arn {
        settings.extend([
            OptionSetting::new(LISTENER_HTTPS, "ListenerProtocol", "HTTPS"),
            OptionSetting::new(LISTENER_HTTPS, "SSLCertificateId", certificate_arn),
            OptionSetting::new(LISTENER_HTTPS, "InstancePort", "80"),
            OptionSetting::new(LISTENER_HTTPS, "InstanceProtocol", "HTTP"),
        ]);
    }

    settings
}

/// Deploys bundles to application environments
pub struct EnvironmentDeployer<'a> {
    ctx: DeployContext<'a>,
}

impl<'a> EnvironmentDeployer<'a> {
    pub fn new(ctx: DeployContext<'a>) -> Self {
        Self { ctx }
    }

    /// Upload `artifact` as version `label` and converge the environment.
    pub fn deploy(
        &self,
        spec: &EnvironmentSpec,
        artifact: &Artifact,
        label: &str,
        warnings: &mut Vec<Warning>,
    ) -> Result<Reconciled<EnvironmentRecord>> {
        let application = spec.application.as_str();

        let result = self.ctx.call(|p| p.create_application(application));
        if policy::absorb(Operation::CreateApplication, application, result, warnings)?.is_some() {
            log::info!("Created application {application}");
        }

        let bucket = self.ctx.call(|p| p.create_storage_location())?;
        let key = format!("{label}.zip");
        self.ctx.call(|p| p.put_object(&bucket, &key, artifact.bytes()))?;
        log::info!("Uploaded {bucket}/{key}");

        let result = self
            .ctx
            .call(|p| p.create_application_version(application, label, &bucket, &key));
        policy::absorb(Operation::CreateApplicationVersion, label, result, warnings)?;

        let request = EnvironmentRequest {
            application: application.to_string(),
            environment: spec.name.clone(),
            tier: spec.tier,
            solution_stack: spec.solution_stack.clone(),
            version_label: label.to_string(),
            option_settings: option_settings(spec),
        };
        upsert(&self.ctx, &EnvironmentKind, &spec.name, &request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Outcome;
    use controlplane::{EnvironmentTier, MemoryControlPlane, RetryConfig, code_checksum};

    fn spec() -> EnvironmentSpec {
        EnvironmentSpec {
            name: "web".into(),
            application: "web-app".into(),
            tier: EnvironmentTier::Web,
            solution_stack: "64bit Amazon Linux 2023 v4.0.0 running Python 3.11".into(),
            instance_type: "t2.micro".into(),
            autoscaling: (1, 4),
            processes: 1,
            threads: 15,
            wsgi_path: "application.py".into(),
            health_path: "/".into(),
            certificate_arn: None,
        }
    }

    fn find<'s>(settings: &'s [OptionSetting], namespace: &str, name: &str) -> Option<&'s OptionSetting> {
        settings
            .iter()
            .find(|s| s.namespace == namespace && s.option_name == name)
    }

    #[test]
    fn test_option_settings_defaults() {
        let settings = option_settings(&spec());
        let max = find(&settings, AUTOSCALING_GROUP, "MaxSize").unwrap();
        assert_eq!(max.value, "4");
        assert_eq!(max.resource_name.as_deref(), Some("AWSEBAutoScalingGroup"));
        assert_eq!(find(&settings, PYTHON_CONTAINER, "NumThreads").unwrap().value, "15");
        assert!(find(&settings, LISTENER_HTTPS, "ListenerProtocol").is_none());
    }

    #[test]
    fn test_option_settings_https_listener() {
        let mut spec = spec();
        spec.certificate_arn = Some("arn:aws:iam::1:server-certificate/web".into());
        let settings = option_settings(&spec);
        assert_eq!(
            find(&settings, LISTENER_HTTPS, "SSLCertificateId").unwrap().value,
            "arn:aws:iam::1:server-certificate/web"
        );
        assert_eq!(find(&settings, LISTENER_HTTPS, "InstancePort").unwrap().value, "80");
    }

    #[test]
    fn test_deploy_creates_then_updates() {
        let plane = MemoryControlPlane::new("us-east-1", "123456789012");
        let retry = RetryConfig::no_retry();
        let deployer = EnvironmentDeployer::new(DeployContext::new(&plane, &retry));
        let artifact = Artifact::from_bytes(b"bundle".to_vec());
        let mut warnings = Vec::new();

        let first = deployer
            .deploy(&spec(), &artifact, "20240101120000", &mut warnings)
            .unwrap();
        let second = deployer
            .deploy(&spec(), &artifact, "20240101130000", &mut warnings)
            .unwrap();

        assert_eq!(first.outcome, Outcome::Created);
        assert_eq!(second.outcome, Outcome::Updated);
        assert_eq!(first.record.id, second.record.id);
        assert!(warnings.is_empty());

        let state = plane.snapshot();
        let bucket = "elasticbeanstalk-us-east-1-123456789012";
        assert_eq!(
            state.objects[&format!("{bucket}/20240101120000.zip")],
            code_checksum(b"bundle")
        );
        assert_eq!(state.environments["web-app/web"].version_label, "20240101130000");
        assert_eq!(plane.count("create_application"), 2);
    }

    #[test]
    fn test_redeploying_same_label_is_tolerated() {
        let plane = MemoryControlPlane::new("us-east-1", "123456789012");
        let retry = RetryConfig::no_retry();
        let deployer = EnvironmentDeployer::new(DeployContext::new(&plane, &retry));
        let artifact = Artifact::from_bytes(b"bundle".to_vec());
        let mut warnings = Vec::new();

        deployer.deploy(&spec(), &artifact, "v1", &mut warnings).unwrap();
        let again = deployer.deploy(&spec(), &artifact, "v1", &mut warnings).unwrap();

        assert_eq!(again.outcome, Outcome::Updated);
    }
}
