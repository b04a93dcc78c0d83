//! In-memory control plane.
//!
//! Emulates the naming semantics of the remote control plane: missing
//! names raise `NotFound`, duplicate names raise `AlreadyExists`, publish
//! validates the stored checksum. Every call is recorded so tests can
//! assert which path (create or update) was taken, and faults can be
//! injected per operation.

use super::ControlPlane;
use crate::error::{Error, Result};
use crate::types::{
    AliasRecord, ApiRecord, BasePathMapping, BucketNotification, DomainName, EnvironmentRecord,
    EnvironmentRequest, FunctionConfigUpdate, FunctionRecord, FunctionSpec, PermissionGrant,
    PublishedVersion, RuleRecord, RuleTarget, StageDeployment,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Checksum the plane records for uploaded code.
pub fn code_checksum(code: &[u8]) -> String {
    blake3::hash(code).to_hex().to_string()
}

/// A registered application version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationVersion {
    pub bucket: String,
    pub key: String,
}

/// Serializable snapshot of all remote resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaneState {
    pub region: String,
    pub account: String,
    pub functions: BTreeMap<String, FunctionRecord>,
    /// Keyed by "function:alias"
    pub aliases: BTreeMap<String, AliasRecord>,
    /// Keyed by function name
    pub permissions: BTreeMap<String, Vec<PermissionGrant>>,
    pub rules: BTreeMap<String, RuleRecord>,
    /// Topic ARN to subscribed endpoint ARNs
    pub subscriptions: BTreeMap<String, Vec<String>>,
    pub bucket_notifications: BTreeMap<String, BucketNotification>,
    /// "bucket/key" to content checksum
    pub objects: BTreeMap<String, String>,
    /// Keyed by API id
    pub apis: BTreeMap<String, ApiRecord>,
    pub deployments: Vec<StageDeployment>,
    pub domain_names: BTreeSet<String>,
    /// Keyed by "domain/base_path"
    pub base_path_mappings: BTreeMap<String, BasePathMapping>,
    pub applications: BTreeSet<String>,
    /// Keyed by "application:label"
    pub application_versions: BTreeMap<String, ApplicationVersion>,
    /// Keyed by "application/environment"
    pub environments: BTreeMap<String, EnvironmentRecord>,
    pub storage_location: Option<String>,
    pub sequence: u64,
}

impl PlaneState {
    /// Create an empty state for a region and account.
    pub fn new(region: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account: account.into(),
            ..Default::default()
        }
    }

    fn function_arn(&self, name: &str) -> String {
        format!(
            "arn:aws:lambda:{}:{}:function:{}",
            self.region, self.account, name
        )
    }

    fn next_id(&mut self) -> String {
        self.sequence += 1;
        let seed = format!("{}:{}", self.account, self.sequence);
        blake3::hash(seed.as_bytes()).to_hex()[..10].to_string()
    }
}

/// Control plane held entirely in memory.
pub struct MemoryControlPlane {
    state: Mutex<PlaneState>,
    calls: Mutex<Vec<String>>,
    faults: Mutex<HashMap<String, VecDeque<Error>>>,
    api_ids: Mutex<VecDeque<String>>,
}

impl MemoryControlPlane {
    /// Create an empty plane.
    pub fn new(region: impl Into<String>, account: impl Into<String>) -> Self {
        Self::from_state(PlaneState::new(region, account))
    }

    /// Restore a plane from a snapshot.
    pub fn from_state(state: PlaneState) -> Self {
        Self {
            state: Mutex::new(state),
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(HashMap::new()),
            api_ids: Mutex::new(VecDeque::new()),
        }
    }

    /// Snapshot of the current state.
    pub fn snapshot(&self) -> PlaneState {
        self.state().clone()
    }

    /// Make the next call of `operation` fail with `error`.
    pub fn fail_next(&self, operation: &str, error: Error) {
        lock(&self.faults)
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    /// Use `id` for the next imported API instead of a generated one.
    pub fn queue_api_id(&self, id: impl Into<String>) {
        lock(&self.api_ids).push_back(id.into());
    }

    /// All recorded calls, formatted as "operation subject".
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Number of recorded calls of one operation.
    pub fn count(&self, operation: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.split(' ').next() == Some(operation))
            .count()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn state(&self) -> MutexGuard<'_, PlaneState> {
        lock(&self.state)
    }

    /// Record a call and return an injected fault, if any.
    fn enter(&self, operation: &str, subject: &str) -> Result<()> {
        log::trace!("memory plane: {operation} {subject}");
        lock(&self.calls).push(format!("{operation} {subject}"));
        match lock(&self.faults)
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn api_title(document: &serde_json::Value) -> Result<String> {
    document
        .pointer("/info/title")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Remote {
            code: "BadRequestException".to_string(),
            message: "document has no info.title".to_string(),
        })
}

impl ControlPlane for MemoryControlPlane {
    fn role_arn(&self, role_name: &str) -> Result<String> {
        self.enter("role_arn", role_name)?;
        if role_name.starts_with("arn:") {
            return Ok(role_name.to_string());
        }
        let state = self.state();
        Ok(format!("arn:aws:iam::{}:role/{}", state.account, role_name))
    }

    fn get_function(&self, name: &str) -> Result<FunctionRecord> {
        self.enter("get_function", name)?;
        self.state()
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("function", name))
    }

    fn create_function(&self, spec: &FunctionSpec, code: &[u8]) -> Result<FunctionRecord> {
        self.enter("create_function", &spec.name)?;
        let mut state = self.state();
        if state.functions.contains_key(&spec.name) {
            return Err(Error::already_exists("function", &spec.name));
        }
        let record = FunctionRecord {
            name: spec.name.clone(),
            arn: state.function_arn(&spec.name),
            runtime: spec.runtime.clone(),
            role_arn: spec.role_arn.clone(),
            handler: spec.handler.clone(),
            memory_mb: spec.memory_mb,
            timeout_secs: spec.timeout_secs,
            code_checksum: code_checksum(code),
            versions: Vec::new(),
        };
        state.functions.insert(spec.name.clone(), record.clone());
        Ok(record)
    }

    fn update_function_code(&self, name: &str, code: &[u8]) -> Result<FunctionRecord> {
        self.enter("update_function_code", name)?;
        let mut state = self.state();
        let record = state
            .functions
            .get_mut(name)
            .ok_or_else(|| Error::not_found("function", name))?;
        record.code_checksum = code_checksum(code);
        Ok(record.clone())
    }

    fn update_function_configuration(
        &self,
        name: &str,
        update: &FunctionConfigUpdate,
    ) -> Result<FunctionRecord> {
        self.enter("update_function_configuration", name)?;
        let mut state = self.state();
        let record = state
            .functions
            .get_mut(name)
            .ok_or_else(|| Error::not_found("function", name))?;
        if let Some(role) = &update.role_arn {
            record.role_arn = role.clone();
        }
        if let Some(handler) = &update.handler {
            record.handler = handler.clone();
        }
        if let Some(memory) = update.memory_mb {
            record.memory_mb = memory;
        }
        if let Some(timeout) = update.timeout_secs {
            record.timeout_secs = timeout;
        }
        Ok(record.clone())
    }

    fn publish_version(&self, name: &str, code_checksum: &str) -> Result<String> {
        self.enter("publish_version", name)?;
        let mut state = self.state();
        let record = state
            .functions
            .get_mut(name)
            .ok_or_else(|| Error::not_found("function", name))?;
        if record.code_checksum != code_checksum {
            return Err(Error::ChecksumMismatch {
                function: name.to_string(),
                expected: code_checksum.to_string(),
                actual: record.code_checksum.clone(),
            });
        }
        let number = (record.versions.len() + 1).to_string();
        record.versions.push(PublishedVersion {
            number: number.clone(),
            code_checksum: code_checksum.to_string(),
        });
        Ok(number)
    }

    fn delete_alias(&self, function: &str, alias: &str) -> Result<()> {
        let key = format!("{function}:{alias}");
        self.enter("delete_alias", &key)?;
        self.state()
            .aliases
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("alias", key))
    }

    fn create_alias(&self, function: &str, alias: &str, version: &str) -> Result<AliasRecord> {
        let key = format!("{function}:{alias}");
        self.enter("create_alias", &key)?;
        let mut state = self.state();
        let record = state
            .functions
            .get(function)
            .ok_or_else(|| Error::not_found("function", function))?;
        if !record.versions.iter().any(|v| v.number == version) {
            return Err(Error::not_found("version", format!("{function}:{version}")));
        }
        let arn = format!("{}:{}", record.arn, alias);
        if state.aliases.contains_key(&key) {
            return Err(Error::already_exists("alias", key));
        }
        let alias = AliasRecord {
            function: function.to_string(),
            name: alias.to_string(),
            version: version.to_string(),
            arn,
        };
        state.aliases.insert(key, alias.clone());
        Ok(alias)
    }

    fn add_permission(&self, grant: &PermissionGrant) -> Result<()> {
        self.enter("add_permission", &format!("{} {}", grant.function, grant.statement_id))?;
        let mut state = self.state();
        if !state.functions.contains_key(&grant.function) {
            return Err(Error::not_found("function", &grant.function));
        }
        let grants = state.permissions.entry(grant.function.clone()).or_default();
        if grants.iter().any(|g| g.statement_id == grant.statement_id) {
            return Err(Error::already_exists("permission", &grant.statement_id));
        }
        grants.push(grant.clone());
        Ok(())
    }

    fn put_rule(&self, name: &str, schedule_expression: &str) -> Result<String> {
        self.enter("put_rule", name)?;
        let mut state = self.state();
        let arn = format!(
            "arn:aws:events:{}:{}:rule/{}",
            state.region, state.account, name
        );
        let rule = state.rules.entry(name.to_string()).or_insert_with(|| RuleRecord {
            name: name.to_string(),
            arn: arn.clone(),
            schedule_expression: String::new(),
            enabled: true,
            targets: Vec::new(),
        });
        rule.schedule_expression = schedule_expression.to_string();
        rule.enabled = true;
        Ok(arn)
    }

    fn put_targets(&self, rule: &str, targets: &[RuleTarget]) -> Result<()> {
        self.enter("put_targets", rule)?;
        let mut state = self.state();
        let record = state
            .rules
            .get_mut(rule)
            .ok_or_else(|| Error::not_found("rule", rule))?;
        for target in targets {
            match record.targets.iter_mut().find(|t| t.id == target.id) {
                Some(existing) => existing.arn = target.arn.clone(),
                None => record.targets.push(target.clone()),
            }
        }
        Ok(())
    }

    fn topic_arn(&self, topic: &str) -> Result<String> {
        self.enter("topic_arn", topic)?;
        let state = self.state();
        Ok(format!("arn:aws:sns:{}:{}:{}", state.region, state.account, topic))
    }

    fn subscribe(&self, topic_arn: &str, endpoint_arn: &str) -> Result<String> {
        self.enter("subscribe", &format!("{topic_arn} {endpoint_arn}"))?;
        let mut state = self.state();
        let endpoints = state.subscriptions.entry(topic_arn.to_string()).or_default();
        let index = match endpoints.iter().position(|e| e == endpoint_arn) {
            Some(index) => index,
            None => {
                endpoints.push(endpoint_arn.to_string());
                endpoints.len() - 1
            }
        };
        Ok(format!("{topic_arn}:{index}"))
    }

    fn list_buckets(&self) -> Result<Vec<String>> {
        self.enter("list_buckets", "")?;
        let state = self.state();
        let buckets: BTreeSet<String> = state
            .bucket_notifications
            .keys()
            .cloned()
            .chain(
                state
                    .objects
                    .keys()
                    .filter_map(|key| key.split_once('/').map(|(bucket, _)| bucket.to_string())),
            )
            .chain(state.storage_location.iter().cloned())
            .collect();
        Ok(buckets.into_iter().collect())
    }

    fn get_bucket_notification(&self, bucket: &str) -> Result<BucketNotification> {
        self.enter("get_bucket_notification", bucket)?;
        Ok(self
            .state()
            .bucket_notifications
            .get(bucket)
            .cloned()
            .unwrap_or_default())
    }

    fn put_bucket_notification(&self, bucket: &str, config: &BucketNotification) -> Result<()> {
        self.enter("put_bucket_notification", bucket)?;
        self.state()
            .bucket_notifications
            .insert(bucket.to_string(), config.clone());
        Ok(())
    }

    fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<()> {
        self.enter("put_object", &format!("{bucket}/{key}"))?;
        self.state()
            .objects
            .insert(format!("{bucket}/{key}"), code_checksum(body));
        Ok(())
    }

    fn list_apis(&self) -> Result<Vec<ApiRecord>> {
        self.enter("list_apis", "")?;
        Ok(self.state().apis.values().cloned().collect())
    }

    fn import_api(&self, document: &serde_json::Value) -> Result<ApiRecord> {
        let name = api_title(document)?;
        self.enter("import_api", &name)?;
        let queued = lock(&self.api_ids).pop_front();
        let mut state = self.state();
        let id = queued.unwrap_or_else(|| state.next_id());
        let record = ApiRecord {
            id: id.clone(),
            name,
            document: document.clone(),
        };
        state.apis.insert(id, record.clone());
        Ok(record)
    }

    fn put_api(&self, api_id: &str, document: &serde_json::Value) -> Result<ApiRecord> {
        self.enter("put_api", api_id)?;
        let name = api_title(document)?;
        let mut state = self.state();
        let record = state
            .apis
            .get_mut(api_id)
            .ok_or_else(|| Error::not_found("api", api_id))?;
        record.name = name;
        record.document = document.clone();
        Ok(record.clone())
    }

    fn create_deployment(
        &self,
        api_id: &str,
        stage: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<StageDeployment> {
        self.enter("create_deployment", &format!("{api_id} {stage}"))?;
        let mut state = self.state();
        if !state.apis.contains_key(api_id) {
            return Err(Error::not_found("api", api_id));
        }
        let deployment = StageDeployment {
            id: state.next_id(),
            api_id: api_id.to_string(),
            stage: stage.to_string(),
            variables: variables.clone(),
        };
        state.deployments.push(deployment.clone());
        Ok(deployment)
    }

    fn list_domain_names(&self) -> Result<Vec<String>> {
        self.enter("list_domain_names", "")?;
        Ok(self.state().domain_names.iter().cloned().collect())
    }

    fn create_domain_name(&self, domain: &DomainName) -> Result<()> {
        self.enter("create_domain_name", &domain.name)?;
        if !self.state().domain_names.insert(domain.name.clone()) {
            return Err(Error::already_exists("domain name", &domain.name));
        }
        Ok(())
    }

    fn delete_base_path_mapping(&self, domain: &str, base_path: &str) -> Result<()> {
        let key = format!("{domain}/{base_path}");
        self.enter("delete_base_path_mapping", &key)?;
        self.state()
            .base_path_mappings
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("base path mapping", key))
    }

    fn create_base_path_mapping(&self, mapping: &BasePathMapping) -> Result<()> {
        let key = format!("{}/{}", mapping.domain, mapping.base_path);
        self.enter("create_base_path_mapping", &key)?;
        let mut state = self.state();
        if !state.domain_names.contains(&mapping.domain) {
            return Err(Error::not_found("domain name", &mapping.domain));
        }
        if !state.apis.contains_key(&mapping.api_id) {
            return Err(Error::not_found("api", &mapping.api_id));
        }
        if state.base_path_mappings.contains_key(&key) {
            return Err(Error::already_exists("base path mapping", key));
        }
        state.base_path_mappings.insert(key, mapping.clone());
        Ok(())
    }

    fn create_application(&self, name: &str) -> Result<()> {
        self.enter("create_application", name)?;
        if !self.state().applications.insert(name.to_string()) {
            return Err(Error::already_exists("application", name));
        }
        Ok(())
    }

    fn create_storage_location(&self) -> Result<String> {
        self.enter("create_storage_location", "")?;
        let mut state = self.state();
        let bucket = state
            .storage_location
            .clone()
            .unwrap_or_else(|| format!("elasticbeanstalk-{}-{}", state.region, state.account));
        state.storage_location = Some(bucket.clone());
        Ok(bucket)
    }

    fn create_application_version(
        &self,
        application: &str,
        version_label: &str,
        bucket: &str,
        key: &str,
    ) -> Result<()> {
        let id = format!("{application}:{version_label}");
        self.enter("create_application_version", &id)?;
        let mut state = self.state();
        if !state.applications.contains(application) {
            return Err(Error::not_found("application", application));
        }
        if state.application_versions.contains_key(&id) {
            return Err(Error::already_exists("application version", id));
        }
        state.application_versions.insert(
            id,
            ApplicationVersion {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
        );
        Ok(())
    }

    fn update_environment(&self, request: &EnvironmentRequest) -> Result<EnvironmentRecord> {
        let key = format!("{}/{}", request.application, request.environment);
        self.enter("update_environment", &key)?;
        let mut state = self.state();
        let version = format!("{}:{}", request.application, request.version_label);
        if !state.application_versions.contains_key(&version) {
            return Err(Error::not_found("application version", version));
        }
        let record = state
            .environments
            .get_mut(&key)
            .ok_or_else(|| Error::not_found("environment", &request.environment))?;
        record.version_label = request.version_label.clone();
        record.option_settings = request.option_settings.clone();
        Ok(record.clone())
    }

    fn create_environment(&self, request: &EnvironmentRequest) -> Result<EnvironmentRecord> {
        let key = format!("{}/{}", request.application, request.environment);
        self.enter("create_environment", &key)?;
        let mut state = self.state();
        if !state.applications.contains(&request.application) {
            return Err(Error::not_found("application", &request.application));
        }
        if state.environments.contains_key(&key) {
            return Err(Error::already_exists("environment", &request.environment));
        }
        let record = EnvironmentRecord {
            id: format!("e-{}", state.next_id()),
            application: request.application.clone(),
            name: request.environment.clone(),
            tier: request.tier,
            solution_stack: request.solution_stack.clone(),
            version_label: request.version_label.clone(),
            option_settings: request.option_settings.clone(),
        };
        state.environments.insert(key, record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plane() -> MemoryControlPlane {
        MemoryControlPlane::new("us-east-1", "123456789012")
    }

    fn spec(name: &str) -> FunctionSpec {
        FunctionSpec {
            name: name.to_string(),
            runtime: "python3.12".to_string(),
            role_arn: "arn:aws:iam::123456789012:role/basic".to_string(),
            handler: "app.handler".to_string(),
            memory_mb: 128,
            timeout_secs: 60,
        }
    }

    #[test]
    fn test_update_missing_function_is_not_found() {
        let plane = plane();
        let err = plane.update_function_code("f1", b"code").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_create_twice_is_already_exists() {
        let plane = plane();
        let record = plane.create_function(&spec("f1"), b"code").unwrap();
        assert_eq!(
            record.arn,
            "arn:aws:lambda:us-east-1:123456789012:function:f1"
        );
        let err = plane.create_function(&spec("f1"), b"code").unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_publish_rejects_stale_checksum() {
        let plane = plane();
        let created = plane.create_function(&spec("f1"), b"v1").unwrap();
        plane.update_function_code("f1", b"v2").unwrap();
        let err = plane
            .publish_version("f1", &created.code_checksum)
            .unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_alias_requires_published_version() {
        let plane = plane();
        let created = plane.create_function(&spec("f1"), b"v1").unwrap();
        assert!(plane.create_alias("f1", "dev", "1").unwrap_err().is_not_found());

        let version = plane.publish_version("f1", &created.code_checksum).unwrap();
        let alias = plane.create_alias("f1", "dev", &version).unwrap();
        assert_eq!(alias.arn, format!("{}:dev", created.arn));
        assert!(plane.create_alias("f1", "dev", &version).unwrap_err().is_already_exists());
    }

    #[test]
    fn test_duplicate_statement_id() {
        let plane = plane();
        plane.create_function(&spec("f1"), b"v1").unwrap();
        let grant = PermissionGrant {
            function: "f1".into(),
            statement_id: "sid".into(),
            action: crate::types::INVOKE_ACTION.into(),
            principal: crate::types::Principal::ApiGateway,
            source_arn: None,
        };
        plane.add_permission(&grant).unwrap();
        assert!(plane.add_permission(&grant).unwrap_err().is_already_exists());
        assert_eq!(plane.snapshot().permissions["f1"].len(), 1);
    }

    #[test]
    fn test_queued_api_id_and_put() {
        let plane = plane();
        plane.queue_api_id("abc123");
        let record = plane.import_api(&json!({"info": {"title": "Sample"}})).unwrap();
        assert_eq!(record.id, "abc123");

        let updated = plane
            .put_api("abc123", &json!({"info": {"title": "Sample"}, "host": "x"}))
            .unwrap();
        assert_eq!(updated.document["host"], "x");
        assert!(plane.put_api("missing", &json!({"info": {"title": "S"}})).unwrap_err().is_not_found());
    }

    #[test]
    fn test_injected_fault_is_consumed_once() {
        let plane = plane();
        plane.fail_next(
            "put_rule",
            Error::PermissionDenied {
                message: "no".into(),
            },
        );
        assert!(plane.put_rule("r", "rate(1 minute)").is_err());
        assert!(plane.put_rule("r", "rate(1 minute)").is_ok());
        assert_eq!(plane.count("put_rule"), 2);
    }

    #[test]
    fn test_list_buckets_from_notifications_and_objects() {
        let plane = plane();
        plane
            .put_bucket_notification("uploads", &BucketNotification::default())
            .unwrap();
        plane.put_object("artifacts", "app/v1.zip", b"zip").unwrap();
        plane.put_object("artifacts", "app/v2.zip", b"zip").unwrap();

        assert_eq!(plane.list_buckets().unwrap(), vec!["artifacts", "uploads"]);
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let plane = plane();
        plane.create_function(&spec("f1"), b"v1").unwrap();
        let json = serde_json::to_string(&plane.snapshot()).unwrap();
        let restored = MemoryControlPlane::from_state(serde_json::from_str(&json).unwrap());
        assert!(restored.get_function("f1").is_ok());
    }
}
