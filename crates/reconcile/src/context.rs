//! Deployment context and progress reporting
//!
//! The context bundles the control plane with the retry policy so every
//! component issues remote calls the same way.

use crate::types::UnitReport;
use controlplane::{ControlPlane, RetryConfig, with_retry_logged};

/// Shared handle used by every reconciliation component
#[derive(Clone, Copy)]
pub struct DeployContext<'a> {
    pub plane: &'a dyn ControlPlane,
    pub retry: &'a RetryConfig,
}

impl<'a> DeployContext<'a> {
    pub fn new(plane: &'a dyn ControlPlane, retry: &'a RetryConfig) -> Self {
        Self { plane, retry }
    }

    /// Issue a remote call, retrying throttled requests.
    pub fn call<T, F>(&self, mut operation: F) -> controlplane::Result<T>
    where
        F: FnMut(&dyn ControlPlane) -> controlplane::Result<T>,
    {
        with_retry_logged(self.retry, || operation(self.plane))
    }
}

/// Progress callback for orchestration
///
/// Implement this trait to receive progress updates during a run.
pub trait ProgressCallback: Send {
    /// Called once units are about to be processed
    fn on_units_start(&mut self, count: usize);

    /// Called when a unit's pipeline finishes (in declaration order)
    fn on_unit_complete(&mut self, report: &UnitReport);

    /// Called before an API or environment is deployed
    fn on_resource_start(&mut self, kind: &str, name: &str);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_units_start(&mut self, _count: usize) {}
    fn on_unit_complete(&mut self, _report: &UnitReport) {}
    fn on_resource_start(&mut self, _kind: &str, _name: &str) {}
}
