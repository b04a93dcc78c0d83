//! Deployment manifest: raw serde schema, loading and validation.
//!
//! A manifest is parsed once into raw structs and validated into a
//! [`Manifest`], which carries the packaging request and the deployment
//! plan. Nothing downstream re-checks what is validated here.

use anyhow::{Context, Result};
use controlplane::EnvironmentTier;
use packager::{NativeDependency, PackageRequest, SourceRef};
use reconcile::{
    DeploymentPlan, DeploymentUnit, DomainSpec, EnvironmentSpec, EventSources, HttpApiSpec,
    StorageSource, TopicSource,
};
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

const DEFAULT_RUNTIME: &str = "python3.12";
const DEFAULT_MEMORY_MB: u32 = 128;
const DEFAULT_TIMEOUT_SECS: u32 = 60;
const MEMORY_RANGE: std::ops::RangeInclusive<u32> = 128..=10240;
const TIMEOUT_RANGE: std::ops::RangeInclusive<u32> = 1..=900;

/// Format of generated application version labels
pub const VERSION_LABEL_FORMAT: &str = "%Y%m%d%H%M%S";

/// Valid compute unit names
static UNIT_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").ok());

/// Schedule expressions accepted by the rule service
static SCHEDULE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(rate|cron)\(.+\)$").ok());

fn matches(pattern: &LazyLock<Option<Regex>>, value: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(value))
}

// ============================================================================
// Raw Schema
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    /// Alias label bound to every unit's published version
    version: Option<String>,
    /// Label for uploaded application versions
    version_label: Option<String>,
    #[serde(default = "default_source")]
    source: String,
    runtime_libs: Option<String>,
    #[serde(default)]
    ignored_packages: Vec<String>,
    #[serde(default)]
    extra_files: Vec<String>,
    #[serde(default)]
    binary_requirements: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    functions: BTreeMap<String, RawFunction>,
    #[serde(default)]
    apis: BTreeMap<String, RawApi>,
    #[serde(default)]
    environments: BTreeMap<String, RawEnvironment>,
}

fn default_source() -> String {
    ".".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFunction {
    role: String,
    handler: String,
    memory: Option<u32>,
    timeout: Option<u32>,
    runtime: Option<String>,
    schedule_expression: Option<String>,
    #[serde(default)]
    event_sources: RawEventSources,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEventSources {
    api_gateway: Option<Marker>,
    storage: Option<RawStorage>,
    topic: Option<RawTopic>,
}

/// An event source that takes no options (`api_gateway = {}`)
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Marker {}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStorage {
    bucket: Option<String>,
    prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTopic {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawApi {
    document: String,
    stage: Option<String>,
    function: Option<String>,
    domain: Option<RawDomain>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDomain {
    name: String,
    #[serde(default)]
    base_path: String,
    certificate_name: Option<String>,
    certificate_body: String,
    certificate_private_key: String,
    certificate_chain: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEnvironment {
    application: String,
    #[serde(default = "default_tier")]
    tier: EnvironmentTier,
    stack: String,
    #[serde(default = "default_instance_type")]
    instance_type: String,
    #[serde(default = "default_autoscaling")]
    autoscaling: [u32; 2],
    #[serde(default = "default_processes")]
    processes: u32,
    #[serde(default = "default_threads")]
    threads: u32,
    #[serde(default = "default_wsgi")]
    wsgi: String,
    #[serde(default = "default_health")]
    health: String,
    certificate_arn: Option<String>,
}

fn default_tier() -> EnvironmentTier {
    EnvironmentTier::Web
}

fn default_instance_type() -> String {
    "t2.micro".to_string()
}

fn default_autoscaling() -> [u32; 2] {
    [1, 4]
}

fn default_processes() -> u32 {
    1
}

fn default_threads() -> u32 {
    15
}

fn default_wsgi() -> String {
    "application.py".to_string()
}

fn default_health() -> String {
    "/".to_string()
}

// ============================================================================
// Validated Manifest
// ============================================================================

/// A loaded and validated manifest
#[derive(Debug, Clone)]
pub struct Manifest {
    /// File the manifest was read from
    pub path: PathBuf,
    pub package: PackageRequest,
    pub plan: DeploymentPlan,
}

impl Manifest {
    /// Load a manifest, choosing JSON or TOML by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;

        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let raw: RawManifest = if is_json {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse manifest: {}", path.display()))?
        } else {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse manifest: {}", path.display()))?
        };

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let manifest = raw
            .validate(base)
            .with_context(|| format!("Invalid manifest: {}", path.display()))?;

        log::debug!(
            "Loaded manifest {} ({} units, {} APIs, {} environments)",
            path.display(),
            manifest.plan.units.len(),
            manifest.plan.apis.len(),
            manifest.plan.environments.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            ..manifest
        })
    }

    /// Restrict the plan to the named units and the APIs bound to them.
    ///
    /// Environments deploy the whole bundle and are skipped by a filtered run.
    pub fn retain_units(&mut self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }

        let declared: BTreeSet<&str> = self.plan.units.iter().map(|u| u.name.as_str()).collect();
        if let Some(unknown) = names.iter().find(|n| !declared.contains(n.as_str())) {
            anyhow::bail!("Unknown unit '{unknown}'");
        }

        let keep = |name: &str| names.iter().any(|n| n == name);
        self.plan.units.retain(|unit| keep(&unit.name));
        self.plan
            .apis
            .retain(|api| api.function.as_deref().is_some_and(keep));
        self.plan.environments.clear();
        Ok(())
    }
}

// ============================================================================
// Validation
// ============================================================================

impl RawManifest {
    fn validate(self, base: &Path) -> Result<Manifest> {
        let source = match SourceRef::parse(&self.source) {
            SourceRef::Directory(dir) => SourceRef::Directory(resolve_path(base, &dir.to_string_lossy())),
            remote => remote,
        };

        for ignored in &self.ignored_packages {
            if ignored.is_empty() {
                anyhow::bail!("Ignored package path cannot be empty");
            }
        }

        let native_dependencies = self
            .binary_requirements
            .into_iter()
            .map(|(package, library_fragments)| {
                if library_fragments.is_empty() {
                    anyhow::bail!("Binary requirement '{package}' lists no libraries");
                }
                Ok(NativeDependency {
                    package,
                    library_fragments,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let package = PackageRequest {
            source,
            runtime_libs: self.runtime_libs.as_deref().map(|p| resolve_path(base, p)),
            ignored_paths: self.ignored_packages,
            extra_files: self
                .extra_files
                .iter()
                .map(|p| resolve_path(base, p))
                .collect(),
            native_dependencies,
        };

        let units = self
            .functions
            .into_iter()
            .map(|(name, raw)| {
                raw.validate(&name, self.version.as_deref())
                    .with_context(|| format!("Invalid function '{name}'"))
            })
            .collect::<Result<Vec<_>>>()?;

        let declared: BTreeSet<&str> = units.iter().map(|u| u.name.as_str()).collect();
        let apis = self
            .apis
            .into_iter()
            .map(|(name, raw)| {
                raw.validate(&name, base, &declared)
                    .with_context(|| format!("Invalid API '{name}'"))
            })
            .collect::<Result<Vec<_>>>()?;

        let environments = self
            .environments
            .into_iter()
            .map(|(name, raw)| {
                raw.validate(&name)
                    .with_context(|| format!("Invalid environment '{name}'"))
            })
            .collect::<Result<Vec<_>>>()?;

        let environment_version = self
            .version_label
            .unwrap_or_else(|| chrono::Utc::now().format(VERSION_LABEL_FORMAT).to_string());

        Ok(Manifest {
            path: PathBuf::new(),
            package,
            plan: DeploymentPlan {
                units,
                apis,
                environments,
                environment_version,
            },
        })
    }
}

impl RawFunction {
    fn validate(self, name: &str, version: Option<&str>) -> Result<DeploymentUnit> {
        if !matches(&UNIT_NAME, name) {
            anyhow::bail!("Name must be 1-64 letters, digits, '-' or '_'");
        }
        if self.role.is_empty() {
            anyhow::bail!("Role cannot be empty");
        }
        if self.handler.is_empty() {
            anyhow::bail!("Handler cannot be empty");
        }

        let memory_mb = self.memory.unwrap_or(DEFAULT_MEMORY_MB);
        if !MEMORY_RANGE.contains(&memory_mb) {
            anyhow::bail!(
                "Memory {memory_mb} MB outside {}..={}",
                MEMORY_RANGE.start(),
                MEMORY_RANGE.end()
            );
        }

        let timeout_secs = self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if !TIMEOUT_RANGE.contains(&timeout_secs) {
            anyhow::bail!(
                "Timeout {timeout_secs}s outside {}..={}",
                TIMEOUT_RANGE.start(),
                TIMEOUT_RANGE.end()
            );
        }

        if let Some(expr) = &self.schedule_expression {
            if !matches(&SCHEDULE, expr) {
                anyhow::bail!("Schedule '{expr}' must be rate(...) or cron(...)");
            }
        }

        let storage = match self.event_sources.storage {
            Some(raw) => {
                let bucket = raw
                    .bucket
                    .filter(|b| !b.is_empty())
                    .context("Storage event source requires a bucket")?;
                Some(StorageSource {
                    bucket,
                    prefix: raw.prefix.filter(|p| !p.is_empty()),
                })
            }
            None => None,
        };

        Ok(DeploymentUnit {
            name: name.to_string(),
            runtime: self.runtime.unwrap_or_else(|| DEFAULT_RUNTIME.to_string()),
            role: self.role,
            handler: self.handler,
            memory_mb,
            timeout_secs,
            schedule_expression: self.schedule_expression,
            event_sources: EventSources {
                api_gateway: self.event_sources.api_gateway.is_some(),
                storage,
                topic: self
                    .event_sources
                    .topic
                    .map(|t| TopicSource { name: t.name }),
            },
            version: version.map(str::to_string),
        })
    }
}

impl RawApi {
    fn validate(self, name: &str, base: &Path, declared: &BTreeSet<&str>) -> Result<HttpApiSpec> {
        if let Some(function) = &self.function {
            if !declared.contains(function.as_str()) {
                anyhow::bail!("Function '{function}' is not declared");
            }
        }

        let document_path = resolve_path(base, &self.document);
        let content = fs::read_to_string(&document_path)
            .with_context(|| format!("Failed to read API document: {}", document_path.display()))?;
        let document: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse API document: {}", document_path.display()))?;
        if !document.is_object() {
            anyhow::bail!("API document must be a JSON object");
        }

        let domain = match self.domain {
            Some(raw) => {
                if self.stage.is_none() {
                    anyhow::bail!("A custom domain requires a stage");
                }
                Some(raw.validate(base)?)
            }
            None => None,
        };

        Ok(HttpApiSpec {
            name: name.to_string(),
            document,
            stage: self.stage,
            function: self.function,
            domain,
        })
    }
}

impl RawDomain {
    fn validate(self, base: &Path) -> Result<DomainSpec> {
        if self.name.is_empty() {
            anyhow::bail!("Domain name cannot be empty");
        }

        let certificate_chain = match &self.certificate_chain {
            Some(path) => read_material(base, path)?,
            None => String::new(),
        };

        Ok(DomainSpec {
            certificate_name: self.certificate_name.unwrap_or_else(|| self.name.clone()),
            certificate_body: read_material(base, &self.certificate_body)?,
            certificate_private_key: read_material(base, &self.certificate_private_key)?,
            certificate_chain,
            name: self.name,
            base_path: self.base_path,
        })
    }
}

impl RawEnvironment {
    fn validate(self, name: &str) -> Result<EnvironmentSpec> {
        if self.application.is_empty() {
            anyhow::bail!("Application name cannot be empty");
        }
        if self.stack.is_empty() {
            anyhow::bail!("Solution stack cannot be empty");
        }

        let [min, max] = self.autoscaling;
        if min > max {
            anyhow::bail!("Autoscaling minimum {min} exceeds maximum {max}");
        }
        if self.processes == 0 || self.threads == 0 {
            anyhow::bail!("Processes and threads must be positive");
        }

        Ok(EnvironmentSpec {
            name: name.to_string(),
            application: self.application,
            tier: self.tier,
            solution_stack: self.stack,
            instance_type: self.instance_type,
            autoscaling: (min, max),
            processes: self.processes,
            threads: self.threads,
            wsgi_path: self.wsgi,
            health_path: self.health,
            certificate_arn: self.certificate_arn.filter(|arn| !arn.is_empty()),
        })
    }
}

/// Expand `~` and resolve a path against the manifest directory.
fn resolve_path(base: &Path, raw: &str) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn read_material(base: &Path, raw: &str) -> Result<String> {
    let path = resolve_path(base, raw);
    fs::read_to_string(&path)
        .with_context(|| format!("Failed to read certificate material: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_manifest(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    const FULL: &str = r#"
version = "dev"
version_label = "v42"
source = "app"
ignored_packages = ["tests"]
extra_files = ["settings.json"]

[binary_requirements]
"psycopg2==2.9.9" = ["libpq.so"]

[functions.f1]
role = "lambda_basic_execution"
handler = "app.handler"
[functions.f1.event_sources]
api_gateway = {}
storage = { bucket = "uploads", prefix = "a/" }

[functions.f2]
role = "arn:aws:iam::1:role/r"
handler = "jobs.run"
memory = 512
timeout = 300
schedule_expression = "rate(5 minutes)"
[functions.f2.event_sources]
topic = { name = "alerts" }

[apis.Sample]
document = "swagger.json"
stage = "test"
function = "f1"
[apis.Sample.domain]
name = "api.example.com"
base_path = "v1"
certificate_body = "cert.pem"
certificate_private_key = "key.pem"

[environments.web]
application = "web-app"
stack = "64bit Amazon Linux 2023 running Python 3.11"
autoscaling = [2, 6]
"#;

    fn full_fixture() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("swagger.json"), r#"{"swagger": "2.0"}"#).unwrap();
        fs::write(dir.path().join("cert.pem"), "CERT").unwrap();
        fs::write(dir.path().join("key.pem"), "KEY").unwrap();
        let path = write_manifest(&dir, "skyward.toml", FULL);
        (dir, path)
    }

    #[test]
    fn test_load_full_manifest() {
        let (dir, path) = full_fixture();
        let manifest = Manifest::load(&path).unwrap();

        assert_eq!(
            manifest.package.source,
            SourceRef::Directory(dir.path().join("app"))
        );
        assert_eq!(manifest.package.extra_files, vec![dir.path().join("settings.json")]);
        assert_eq!(manifest.package.native_dependencies[0].package, "psycopg2==2.9.9");

        let plan = &manifest.plan;
        assert_eq!(plan.environment_version, "v42");
        assert_eq!(plan.units.len(), 2);

        let f1 = &plan.units[0];
        assert_eq!(f1.name, "f1");
        assert_eq!(f1.memory_mb, DEFAULT_MEMORY_MB);
        assert_eq!(f1.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(f1.runtime, DEFAULT_RUNTIME);
        assert_eq!(f1.version.as_deref(), Some("dev"));
        assert!(f1.event_sources.api_gateway);
        assert_eq!(f1.event_sources.storage.as_ref().unwrap().bucket, "uploads");

        let f2 = &plan.units[1];
        assert_eq!(f2.schedule_expression.as_deref(), Some("rate(5 minutes)"));
        assert_eq!(
            f2.event_sources.topic.as_ref().unwrap().name.as_deref(),
            Some("alerts")
        );

        let api = &plan.apis[0];
        assert_eq!(api.name, "Sample");
        let domain = api.domain.as_ref().unwrap();
        assert_eq!(domain.certificate_name, "api.example.com");
        assert_eq!(domain.certificate_body, "CERT");
        assert!(domain.certificate_chain.is_empty());

        let env = &plan.environments[0];
        assert_eq!(env.tier, EnvironmentTier::Web);
        assert_eq!(env.autoscaling, (2, 6));
        assert_eq!(env.instance_type, "t2.micro");
        assert_eq!(env.threads, 15);
    }

    #[test]
    fn test_load_json_manifest() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(
            &dir,
            "skyward.json",
            r#"{"functions": {"f1": {"role": "r", "handler": "app.handler"}}}"#,
        );
        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.plan.units[0].name, "f1");
        assert!(manifest.plan.units[0].version.is_none());
        assert_eq!(manifest.plan.environment_version.len(), 14);
    }

    #[test]
    fn test_rejects_out_of_range_memory() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(
            &dir,
            "skyward.toml",
            "[functions.f1]\nrole = \"r\"\nhandler = \"h\"\nmemory = 64\n",
        );
        let err = Manifest::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Memory 64 MB"));
    }

    #[test]
    fn test_rejects_bad_schedule() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(
            &dir,
            "skyward.toml",
            "[functions.f1]\nrole = \"r\"\nhandler = \"h\"\nschedule_expression = \"every 5 minutes\"\n",
        );
        let err = Manifest::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("rate(...) or cron(...)"));
    }

    #[test]
    fn test_rejects_storage_without_bucket() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(
            &dir,
            "skyward.toml",
            "[functions.f1]\nrole = \"r\"\nhandler = \"h\"\n[functions.f1.event_sources]\nstorage = { prefix = \"a/\" }\n",
        );
        let err = Manifest::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("requires a bucket"));
    }

    #[test]
    fn test_rejects_undeclared_api_function() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("api.json"), "{}").unwrap();
        let path = write_manifest(
            &dir,
            "skyward.toml",
            "[apis.Sample]\ndocument = \"api.json\"\nfunction = \"missing\"\n",
        );
        let err = Manifest::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("'missing' is not declared"));
    }

    #[test]
    fn test_rejects_inverted_autoscaling() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(
            &dir,
            "skyward.toml",
            "[environments.web]\napplication = \"a\"\nstack = \"s\"\nautoscaling = [5, 2]\n",
        );
        let err = Manifest::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("exceeds maximum"));
    }

    #[test]
    fn test_rejects_invalid_unit_name() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(
            &dir,
            "skyward.toml",
            "[functions.\"bad name\"]\nrole = \"r\"\nhandler = \"h\"\n",
        );
        assert!(Manifest::load(&path).is_err());
    }

    #[test]
    fn test_remote_source_is_not_resolved() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(
            &dir,
            "skyward.toml",
            "source = \"https://example.com/app.git#v1\"\n",
        );
        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(
            manifest.package.source,
            SourceRef::Git {
                url: "https://example.com/app.git".into(),
                rev: Some("v1".into()),
            }
        );
    }

    #[test]
    fn test_retain_units() {
        let (_dir, path) = full_fixture();
        let mut manifest = Manifest::load(&path).unwrap();

        manifest.retain_units(&["f2".to_string()]).unwrap();
        assert_eq!(manifest.plan.units.len(), 1);
        assert!(manifest.plan.apis.is_empty());
        assert!(manifest.plan.environments.is_empty());

        assert!(manifest.retain_units(&["nope".to_string()]).is_err());
    }

    #[test]
    fn test_resolve_path() {
        let base = Path::new("/srv/app");
        assert_eq!(resolve_path(base, "lib"), PathBuf::from("/srv/app/lib"));
        assert_eq!(resolve_path(base, "/opt/lib"), PathBuf::from("/opt/lib"));
    }
}
