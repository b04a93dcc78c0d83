//! # reconcile
//!
//! Idempotent deployment of compute units, HTTP-APIs and application
//! environments against a [`ControlPlane`](controlplane::ControlPlane).
//!
//! ## Core Concepts
//!
//! - **Reconciler**: [`upsert`] tries a kind's update path and falls back to
//!   create when the remote reports "not found"
//! - **Policy**: every remote operation is declared fatal or advisory
//!   ([`Operation::severity`]); advisory failures become [`Warning`]s
//! - **Orchestrator**: runs each unit through upload, alias, permissions and
//!   triggers, then binds buckets, APIs and environments
//!
//! ## Unit pipeline
//!
//! ```text
//! Pending -> Uploaded -> Aliased -> PermissionsGranted -> TriggersWired -> Done
//!    |          |
//!    +----------+--> Failed
//! ```
//!
//! ## Example
//!
//! ```
//! use controlplane::MemoryControlPlane;
//! use packager::Artifact;
//! use reconcile::{
//!     DeploymentOrchestrator, DeploymentPlan, DeploymentUnit, NoProgress, OrchestratorOptions,
//!     UnitState,
//! };
//!
//! let plane = MemoryControlPlane::new("us-east-1", "123456789012");
//! let plan = DeploymentPlan {
//!     units: vec![DeploymentUnit {
//!         name: "f1".into(),
//!         runtime: "python3.12".into(),
//!         role: "lambda_basic_execution".into(),
//!         handler: "app.handler".into(),
//!         memory_mb: 128,
//!         timeout_secs: 60,
//!         schedule_expression: Some("rate(5 minutes)".into()),
//!         event_sources: Default::default(),
//!         version: Some("dev".into()),
//!     }],
//!     ..Default::default()
//! };
//!
//! let orchestrator = DeploymentOrchestrator::new(&plane, OrchestratorOptions::default());
//! let report = orchestrator.run(
//!     || Ok(Artifact::from_bytes(b"bundle".to_vec())),
//!     &plan,
//!     &mut NoProgress,
//! )?;
//! assert_eq!(report.units[0].state, UnitState::Done);
//! # Ok::<(), reconcile::Error>(())
//! ```

pub mod alias;
pub mod api;
pub mod context;
pub mod environment;
pub mod error;
pub mod orchestrator;
pub mod permission;
pub mod policy;
pub mod reconciler;
pub mod trigger;
pub mod types;

pub use alias::{AliasBinding, VersionAliasPublisher};
pub use api::{ApiDeployer, ApiDeployment};
pub use context::{DeployContext, NoProgress, ProgressCallback};
pub use environment::EnvironmentDeployer;
pub use error::{Error, Result};
pub use orchestrator::{DeploymentOrchestrator, OrchestratorOptions};
pub use permission::PermissionBinder;
pub use policy::{Operation, Severity, Warning, absorb};
pub use reconciler::{
    EnvironmentKind, FunctionKind, HttpApiKind, LookupCache, ResourceKind, upsert,
};
pub use trigger::{BucketBinding, TriggerBinder};
pub use types::{
    DeploymentPlan, DeploymentUnit, DomainSpec, EnvironmentSpec, EventSources, HttpApiSpec,
    Outcome, Reconciled, ResourceRecord, ResourceReport, RunReport, StorageSource, TopicSource,
    UnitReport, UnitState,
};
