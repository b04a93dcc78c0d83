use anyhow::Result;
use std::path::Path;

use crate::Context;
use crate::manifest::Manifest;
use crate::ui;

pub fn run(ctx: &Context, path: &Path) -> Result<()> {
    let manifest = Manifest::load(path)?;
    ui::success(&format!("{} is valid", path.display()));

    if ctx.quiet {
        return Ok(());
    }

    ui::kv("source", &manifest.package.source.to_string());

    let plan = &manifest.plan;
    ui::section("Functions");
    for unit in &plan.units {
        let mut sources = Vec::new();
        if unit.event_sources.api_gateway {
            sources.push("api".to_string());
        }
        if let Some(storage) = &unit.event_sources.storage {
            sources.push(format!("storage:{}", storage.bucket));
        }
        if let Some(topic) = &unit.event_sources.topic {
            sources.push(format!("topic:{}", topic.name.as_deref().unwrap_or("*")));
        }
        if let Some(schedule) = &unit.schedule_expression {
            sources.push(schedule.clone());
        }
        let alias = unit.version.as_deref().unwrap_or("-");
        ui::kv(
            &unit.name,
            &format!(
                "{} {}MB {}s alias={alias} [{}]",
                unit.handler,
                unit.memory_mb,
                unit.timeout_secs,
                sources.join(", ")
            ),
        );
    }

    if !plan.apis.is_empty() {
        ui::section("APIs");
        for api in &plan.apis {
            let stage = api.stage.as_deref().unwrap_or("-");
            let domain = api.domain.as_ref().map_or("-", |d| d.name.as_str());
            ui::kv(&api.name, &format!("stage={stage} domain={domain}"));
        }
    }

    if !plan.environments.is_empty() {
        ui::section("Environments");
        for env in &plan.environments {
            ui::kv(
                &env.name,
                &format!(
                    "{}/{} {} label={}",
                    env.application,
                    env.tier.name(),
                    env.instance_type,
                    plan.environment_version
                ),
            );
        }
    }

    println!();
    Ok(())
}
