//! Deployment orchestrator - runs every unit's pipeline, then APIs and
//! environments

use crate::alias::VersionAliasPublisher;
use crate::api::ApiDeployer;
use crate::context::{DeployContext, ProgressCallback};
use crate::environment::EnvironmentDeployer;
use crate::error::{Error, Result};
use crate::permission::PermissionBinder;
use crate::reconciler::{FunctionKind, upsert};
use crate::trigger::{BucketBinding, TriggerBinder};
use crate::types::{
    DeploymentPlan, DeploymentUnit, ResourceReport, RunReport, UnitReport, UnitState,
};
use controlplane::{ControlPlane, Principal, RetryConfig};
use packager::Artifact;
use rayon::prelude::*;

/// Options for a deployment run
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Number of units processed in parallel
    pub jobs: usize,
    /// Retry policy for throttled requests
    pub retry: RetryConfig,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            retry: RetryConfig::default(),
        }
    }
}

/// A finished unit pipeline plus the bucket bindings it declared
struct UnitOutcome {
    report: UnitReport,
    bucket_bindings: Vec<BucketBinding>,
}

/// Drives one orchestration pass over a deployment plan.
pub struct DeploymentOrchestrator<'a> {
    plane: &'a dyn ControlPlane,
    options: OrchestratorOptions,
}

impl<'a> DeploymentOrchestrator<'a> {
    pub fn new(plane: &'a dyn ControlPlane, options: OrchestratorOptions) -> Self {
        Self { plane, options }
    }

    /// Package once, then deploy the plan with the artifact.
    ///
    /// A packaging failure aborts the run before any remote call.
    pub fn run<F, P>(&self, package: F, plan: &DeploymentPlan, progress: &mut P) -> Result<RunReport>
    where
        F: FnOnce() -> packager::Result<Artifact>,
        P: ProgressCallback,
    {
        let artifact = package()?;
        log::info!("Artifact checksum {}", artifact.checksum());
        self.deploy(&artifact, plan, progress)
    }

    /// Deploy every unit, then bucket notifications, APIs and environments.
    ///
    /// Unit failures are reported per unit and never abort the run.
    pub fn deploy<P: ProgressCallback>(
        &self,
        artifact: &Artifact,
        plan: &DeploymentPlan,
        progress: &mut P,
    ) -> Result<RunReport> {
        let ctx = DeployContext::new(self.plane, &self.options.retry);
        let mut report = RunReport::default();

        progress.on_units_start(plan.units.len());
        let outcomes = self.deploy_units(ctx, artifact, &plan.units)?;

        let mut bindings = Vec::new();
        let mut owners = Vec::new();
        for outcome in outcomes {
            progress.on_unit_complete(&outcome.report);
            bindings.extend(outcome.bucket_bindings);
            // Failed units keep whatever notifications they had
            if outcome.report.state == UnitState::Done
                && let Some(arn) = &outcome.report.function_arn
            {
                owners.push(arn.clone());
            }
            report.units.push(outcome.report);
        }

        if !bindings.is_empty() || !owners.is_empty() {
            TriggerBinder::new(ctx).bind_buckets(&bindings, &owners, &mut report.warnings);
        }

        let apis = ApiDeployer::new(ctx);
        for spec in &plan.apis {
            progress.on_resource_start("api", &spec.name);
            let alias = spec
                .function
                .as_deref()
                .and_then(|f| plan.units.iter().find(|u| u.name == f))
                .and_then(|u| u.version.as_deref());

            let mut warnings = Vec::new();
            let resource = match apis.deploy(spec, alias, &mut warnings) {
                Ok(deployment) => ResourceReport::succeeded(&spec.name, &deployment.api, warnings),
                Err(e) => ResourceReport::failed(&spec.name, e, warnings),
            };
            report.apis.push(resource);
        }

        let environments = EnvironmentDeployer::new(ctx);
        for spec in &plan.environments {
            progress.on_resource_start("environment", &spec.name);
            let mut warnings = Vec::new();
            let resource = match environments.deploy(
                spec,
                artifact,
                &plan.environment_version,
                &mut warnings,
            ) {
                Ok(reconciled) => ResourceReport::succeeded(&spec.name, &reconciled, warnings),
                Err(e) => ResourceReport::failed(&spec.name, e, warnings),
            };
            report.environments.push(resource);
        }

        log::info!(
            "Run finished: {} units, {} failed, {} warnings",
            report.units.len(),
            report.failed().len(),
            report.warning_count()
        );
        Ok(report)
    }

    fn deploy_units(
        &self,
        ctx: DeployContext<'_>,
        artifact: &Artifact,
        units: &[DeploymentUnit],
    ) -> Result<Vec<UnitOutcome>> {
        if self.options.jobs <= 1 || units.len() <= 1 {
            return Ok(units
                .iter()
                .map(|unit| deploy_unit(ctx, artifact, unit))
                .collect());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs)
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))?;

        // par_iter keeps declaration order in the collected results
        Ok(pool.install(|| {
            units
                .par_iter()
                .map(|unit| deploy_unit(ctx, artifact, unit))
                .collect()
        }))
    }
}

/// Run one unit's pipeline: upload, alias, permissions, triggers.
fn deploy_unit(ctx: DeployContext<'_>, artifact: &Artifact, unit: &DeploymentUnit) -> UnitOutcome {
    let mut report = UnitReport::new(&unit.name);
    let mut bucket_bindings = Vec::new();

    let uploaded = match upsert(&ctx, &FunctionKind { code: artifact.bytes() }, &unit.name, unit) {
        Ok(uploaded) => uploaded,
        Err(e) => {
            report.fail(e);
            return UnitOutcome {
                report,
                bucket_bindings,
            };
        }
    };
    let function_arn = uploaded.record.arn.clone();
    report.outcome = Some(uploaded.outcome);
    report.function_arn = Some(function_arn.clone());
    report.advance(UnitState::Uploaded);

    let invoke_arn = match &unit.version {
        Some(label) => {
            let publisher = VersionAliasPublisher::new(ctx);
            match publisher.publish(&unit.name, label, &uploaded.remote.code_checksum) {
                Ok(binding) => {
                    report.version = Some(binding.version);
                    binding.alias.arn
                }
                Err(e) => {
                    report.fail(e);
                    return UnitOutcome {
                        report,
                        bucket_bindings,
                    };
                }
            }
        }
        None => function_arn.clone(),
    };
    report.invoke_arn = Some(invoke_arn.clone());
    report.advance(UnitState::Aliased);

    let sources = &unit.event_sources;
    let permissions = PermissionBinder::new(ctx);
    if sources.api_gateway {
        permissions.grant(&unit.name, Principal::ApiGateway, None, &mut report.warnings);
    }
    if let Some(storage) = &sources.storage {
        let bucket_arn = storage.bucket_arn();
        permissions.grant(
            &unit.name,
            Principal::Storage,
            Some(&bucket_arn),
            &mut report.warnings,
        );
    }
    report.advance(UnitState::PermissionsGranted);

    let triggers = TriggerBinder::new(ctx);
    if let Some(expression) = &unit.schedule_expression {
        triggers.bind_schedule(&unit.name, expression, &invoke_arn, &mut report.warnings);
    }
    if let Some(topic) = &sources.topic {
        triggers.bind_topic(&unit.name, topic, &invoke_arn, &mut report.warnings);
    }
    if let Some(storage) = &sources.storage {
        bucket_bindings.push(BucketBinding {
            unit: unit.name.clone(),
            bucket: storage.bucket.clone(),
            prefix: storage.prefix.clone(),
            function_arn,
            target_arn: invoke_arn,
        });
    }
    report.advance(UnitState::TriggersWired);
    report.advance(UnitState::Done);

    UnitOutcome {
        report,
        bucket_bindings,
    }
}
