//! HTTP-API deployment: document upsert, stage deployment and custom
//! domain binding.

use crate::context::DeployContext;
use crate::error::{Error, Result};
use crate::policy::{self, Operation, Warning};
use crate::reconciler::{HttpApiKind, upsert};
use crate::types::{DomainSpec, HttpApiSpec, Reconciled};
use controlplane::{ApiRecord, BasePathMapping, DomainName, StageDeployment};
use serde_json::Value;
use std::collections::BTreeMap;

/// Stage variable naming the unit the stage invokes
pub const FUNCTION_STAGE_VARIABLE: &str = "lambda_function";

/// Result of deploying one API
#[derive(Debug, Clone)]
pub struct ApiDeployment {
    pub api: Reconciled<ApiRecord>,
    pub stage: Option<StageDeployment>,
}

/// Prepare the document submitted for `spec`.
///
/// The title is always the declared name; a custom domain replaces the host.
pub fn prepare_document(spec: &HttpApiSpec) -> Result<Value> {
    let mut document = spec.document.clone();
    let Some(object) = document.as_object_mut() else {
        return Err(Error::InvalidSpec(format!(
            "API {} document is not an object",
            spec.name
        )));
    };

    let info = object
        .entry("info")
        .or_insert_with(|| Value::Object(Default::default()));
    match info.as_object_mut() {
        Some(info) => {
            info.insert("title".to_string(), Value::String(spec.name.clone()));
        }
        None => {
            return Err(Error::InvalidSpec(format!(
                "API {} info is not an object",
                spec.name
            )));
        }
    }

    if let Some(domain) = &spec.domain {
        object.insert("host".to_string(), Value::String(domain.name.clone()));
    }
    Ok(document)
}

/// Stage variables pointing a stage at `function`, qualified by `alias`.
pub fn stage_variables(function: &str, alias: Option<&str>) -> BTreeMap<String, String> {
    let target = match alias {
        Some(alias) => format!("{function}:{alias}"),
        None => function.to_string(),
    };
    BTreeMap::from([(FUNCTION_STAGE_VARIABLE.to_string(), target)])
}

/// Deploys HTTP-APIs
pub struct ApiDeployer<'a> {
    ctx: DeployContext<'a>,
}

impl<'a> ApiDeployer<'a> {
    pub fn new(ctx: DeployContext<'a>) -> Self {
        Self { ctx }
    }

    /// Upsert the API, deploy its stage, and bind its custom domain.
    ///
    /// `alias` qualifies the stage's function variable.
    pub fn deploy(
        &self,
        spec: &HttpApiSpec,
        alias: Option<&str>,
        warnings: &mut Vec<Warning>,
    ) -> Result<ApiDeployment> {
        let document = prepare_document(spec)?;
        let api = upsert(&self.ctx, &HttpApiKind, &spec.name, &document)?;
        let api_id = api.record.id.clone();

        let stage = match &spec.stage {
            Some(stage) => {
                let variables = match &spec.function {
                    Some(function) => stage_variables(function, alias),
                    None => BTreeMap::new(),
                };
                let deployment = self
                    .ctx
                    .call(|p| p.create_deployment(&api_id, stage, &variables))?;
                log::info!("Deployed {} to stage {stage}", spec.name);
                Some(deployment)
            }
            None => None,
        };

        if let (Some(domain), Some(stage)) = (&spec.domain, &spec.stage) {
            self.ensure_domain(domain, warnings)?;
            self.replace_mapping(domain, &api_id, stage)?;
        }

        Ok(ApiDeployment { api, stage })
    }

    /// Create the custom domain unless it is already listed.
    fn ensure_domain(&self, domain: &DomainSpec, warnings: &mut Vec<Warning>) -> Result<()> {
        let existing = self.ctx.call(|p| p.list_domain_names())?;
        if existing.iter().any(|name| *name == domain.name) {
            log::debug!("Domain {} already exists", domain.name);
            return Ok(());
        }

        let request = DomainName {
            name: domain.name.clone(),
            certificate_name: domain.certificate_name.clone(),
            certificate_body: domain.certificate_body.clone(),
            certificate_private_key: domain.certificate_private_key.clone(),
            certificate_chain: domain.certificate_chain.clone(),
        };
        let result = self.ctx.call(|p| p.create_domain_name(&request));
        if policy::absorb(Operation::CreateDomainName, &domain.name, result, warnings)?.is_some() {
            log::info!("Created domain {}", domain.name);
        }
        Ok(())
    }

    /// Point the domain's base path at the stage, replacing any prior mapping.
    fn replace_mapping(&self, domain: &DomainSpec, api_id: &str, stage: &str) -> Result<()> {
        let mapping = BasePathMapping {
            domain: domain.name.clone(),
            base_path: domain.base_path.clone(),
            api_id: api_id.to_string(),
            stage: stage.to_string(),
        };

        for attempt in 0..2 {
            self.delete_mapping(domain)?;
            match self.ctx.call(|p| p.create_base_path_mapping(&mapping)) {
                Ok(()) => {
                    log::info!("Mapped {}/{} -> {stage}", domain.name, domain.base_path);
                    return Ok(());
                }
                Err(e) if e.is_already_exists() && attempt == 0 => {
                    log::debug!("Mapping reappeared, replacing again");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn delete_mapping(&self, domain: &DomainSpec) -> Result<()> {
        match self
            .ctx
            .call(|p| p.delete_base_path_mapping(&domain.name, &domain.base_path))
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
