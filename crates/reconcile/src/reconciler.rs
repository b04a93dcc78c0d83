//! Generic idempotent upsert.
//!
//! Every kind tries its update path first. A "not found" from the remote
//! switches to the create path; an "already exists" on create means another
//! writer got there first, so the update path runs once more. Name to id
//! lookups go through a [`LookupCache`] owned by a single [`upsert`] call.

use crate::context::DeployContext;
use crate::error::Result;
use crate::types::{DeploymentUnit, Outcome, Reconciled, ResourceRecord};
use controlplane::{
    ApiRecord, EnvironmentRecord, EnvironmentRequest, Error as PlaneError, FunctionConfigUpdate,
    FunctionRecord, FunctionSpec, PLATFORM_DOMAIN_SUFFIX,
};
use serde_json::Value;
use std::collections::HashMap;

/// Name to id lookups made during one reconciliation call
#[derive(Debug, Default)]
pub struct LookupCache {
    entries: HashMap<(&'static str, String), String>,
}

impl LookupCache {
    /// Return the cached id for `(kind, name)` or run `lookup` once.
    pub fn resolve<F>(&mut self, kind: &'static str, name: &str, lookup: F) -> controlplane::Result<String>
    where
        F: FnOnce() -> controlplane::Result<String>,
    {
        let key = (kind, name.to_string());
        if let Some(id) = self.entries.get(&key) {
            return Ok(id.clone());
        }
        let id = lookup()?;
        log::debug!("Resolved {kind} {name} -> {id}");
        self.entries.insert(key, id.clone());
        Ok(id)
    }

    pub fn insert(&mut self, kind: &'static str, name: &str, id: impl Into<String>) {
        self.entries.insert((kind, name.to_string()), id.into());
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One kind of remotely named resource
pub trait ResourceKind {
    /// Desired configuration
    type Spec: ?Sized;
    /// Remote response
    type Remote;

    /// Kind name for logs and records
    fn kind(&self) -> &'static str;

    /// Update the resource named `name`; must report absence as "not found".
    fn update(
        &self,
        ctx: &DeployContext<'_>,
        cache: &mut LookupCache,
        name: &str,
        spec: &Self::Spec,
    ) -> controlplane::Result<Self::Remote>;

    /// Create the resource from the full spec.
    fn create(
        &self,
        ctx: &DeployContext<'_>,
        cache: &mut LookupCache,
        name: &str,
        spec: &Self::Spec,
    ) -> controlplane::Result<Self::Remote>;

    /// Remote identity of the response.
    fn record(&self, name: &str, remote: &Self::Remote) -> ResourceRecord;
}

/// Create or update the resource `name` of `kind`.
pub fn upsert<K: ResourceKind>(
    ctx: &DeployContext<'_>,
    kind: &K,
    name: &str,
    spec: &K::Spec,
) -> Result<Reconciled<K::Remote>> {
    let mut cache = LookupCache::default();

    let (remote, outcome) = match kind.update(ctx, &mut cache, name, spec) {
        Ok(remote) => {
            log::info!("Updated {} {name}", kind.kind());
            (remote, Outcome::Updated)
        }
        Err(e) if e.is_not_found() => {
            log::debug!("{} {name} not found: {e}", kind.kind());
            match kind.create(ctx, &mut cache, name, spec) {
                Ok(remote) => {
                    log::info!("Created {} {name}", kind.kind());
                    (remote, Outcome::Created)
                }
                Err(e) if e.is_already_exists() => {
                    log::info!("{} {name} appeared concurrently, updating", kind.kind());
                    cache.clear();
                    (kind.update(ctx, &mut cache, name, spec)?, Outcome::AlreadyBound)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Reconciled {
        record: kind.record(name, &remote),
        outcome,
        remote,
    })
}

// ============================================================================
// Compute units
// ============================================================================

/// Compute units: upload `code`, then apply handler, role and limits
pub struct FunctionKind<'a> {
    pub code: &'a [u8],
}

impl FunctionKind<'_> {
    fn role_arn(
        ctx: &DeployContext<'_>,
        cache: &mut LookupCache,
        role: &str,
    ) -> controlplane::Result<String> {
        cache.resolve("role", role, || ctx.call(|p| p.role_arn(role)))
    }
}

impl ResourceKind for FunctionKind<'_> {
    type Spec = DeploymentUnit;
    type Remote = FunctionRecord;

    fn kind(&self) -> &'static str {
        "function"
    }

    fn update(
        &self,
        ctx: &DeployContext<'_>,
        cache: &mut LookupCache,
        name: &str,
        unit: &DeploymentUnit,
    ) -> controlplane::Result<FunctionRecord> {
        let role_arn = Self::role_arn(ctx, cache, &unit.role)?;
        let uploaded = ctx.call(|p| p.update_function_code(name, self.code))?;

        let update = FunctionConfigUpdate {
            role_arn: Some(role_arn),
            handler: Some(unit.handler.clone()),
            memory_mb: Some(unit.memory_mb),
            timeout_secs: Some(unit.timeout_secs),
        };
        let mut record = ctx.call(|p| p.update_function_configuration(name, &update))?;

        // Publish must be validated against what the upload stored
        record.code_checksum = uploaded.code_checksum;
        Ok(record)
    }

    fn create(
        &self,
        ctx: &DeployContext<'_>,
        cache: &mut LookupCache,
        name: &str,
        unit: &DeploymentUnit,
    ) -> controlplane::Result<FunctionRecord> {
        let function = FunctionSpec {
            name: name.to_string(),
            runtime: unit.runtime.clone(),
            role_arn: Self::role_arn(ctx, cache, &unit.role)?,
            handler: unit.handler.clone(),
            memory_mb: unit.memory_mb,
            timeout_secs: unit.timeout_secs,
        };
        ctx.call(|p| p.create_function(&function, self.code))
    }

    fn record(&self, name: &str, remote: &FunctionRecord) -> ResourceRecord {
        ResourceRecord {
            kind: self.kind().to_string(),
            name: name.to_string(),
            id: remote.arn.clone(),
            arn: remote.arn.clone(),
        }
    }
}

// ============================================================================
// HTTP APIs
// ============================================================================

/// Rewrite a platform-generated host so it starts with `api_id`.
///
/// Hosts outside the platform domain, and hosts already carrying the id,
/// are left alone.
pub fn rewrite_host(document: &Value, api_id: &str) -> Value {
    let mut document = document.clone();
    let rewritten = match document.get("host").and_then(Value::as_str) {
        Some(host) if host.ends_with(PLATFORM_DOMAIN_SUFFIX) && !host.starts_with(api_id) => {
            let rest = host.split_once('.').map_or(host, |(_, rest)| rest);
            Some(format!("{api_id}.{rest}"))
        }
        _ => None,
    };
    if let Some(host) = rewritten {
        log::debug!("Rewriting API host to {host}");
        document["host"] = Value::String(host);
    }
    document
}

/// Find an API id by listing APIs by name.
pub fn lookup_api_id(ctx: &DeployContext<'_>, name: &str) -> controlplane::Result<String> {
    ctx.call(|p| p.list_apis())?
        .into_iter()
        .find(|api| api.name == name)
        .map(|api| api.id)
        .ok_or_else(|| PlaneError::not_found("api", name))
}

/// HTTP-API definitions: overwrite by id, or import
pub struct HttpApiKind;

impl ResourceKind for HttpApiKind {
    type Spec = Value;
    type Remote = ApiRecord;

    fn kind(&self) -> &'static str {
        "api"
    }

    fn update(
        &self,
        ctx: &DeployContext<'_>,
        cache: &mut LookupCache,
        name: &str,
        document: &Value,
    ) -> controlplane::Result<ApiRecord> {
        let api_id = cache.resolve("api", name, || lookup_api_id(ctx, name))?;
        let document = rewrite_host(document, &api_id);
        ctx.call(|p| p.put_api(&api_id, &document))
    }

    fn create(
        &self,
        ctx: &DeployContext<'_>,
        cache: &mut LookupCache,
        name: &str,
        document: &Value,
    ) -> controlplane::Result<ApiRecord> {
        let imported = ctx.call(|p| p.import_api(document))?;
        cache.insert("api", name, imported.id.clone());

        // The id only exists now, so the host can only be fixed after import
        let rewritten = rewrite_host(document, &imported.id);
        if rewritten == *document {
            return Ok(imported);
        }
        ctx.call(|p| p.put_api(&imported.id, &rewritten))
    }

    fn record(&self, name: &str, remote: &ApiRecord) -> ResourceRecord {
        ResourceRecord {
            kind: self.kind().to_string(),
            name: name.to_string(),
            id: remote.id.clone(),
            arn: remote.id.clone(),
        }
    }
}

// ============================================================================
// Application environments
// ============================================================================

/// Application environments: update in place, or create
pub struct EnvironmentKind;

impl ResourceKind for EnvironmentKind {
    type Spec = EnvironmentRequest;
    type Remote = EnvironmentRecord;

    fn kind(&self) -> &'static str {
        "environment"
    }

    fn update(
        &self,
        ctx: &DeployContext<'_>,
        _cache: &mut LookupCache,
        _name: &str,
        request: &EnvironmentRequest,
    ) -> controlplane::Result<EnvironmentRecord> {
        ctx.call(|p| p.update_environment(request))
    }

    fn create(
        &self,
        ctx: &DeployContext<'_>,
        _cache: &mut LookupCache,
        _name: &str,
        request: &EnvironmentRequest,
    ) -> controlplane::Result<EnvironmentRecord> {
        ctx.call(|p| p.create_environment(request))
    }

    fn record(&self, name: &str, remote: &EnvironmentRecord) -> ResourceRecord {
        ResourceRecord {
            kind: self.kind().to_string(),
            name: name.to_string(),
            id: remote.id.clone(),
            arn: format!("{}/{}", remote.application, remote.name),
        }
    }
}
