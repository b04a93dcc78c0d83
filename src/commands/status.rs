use anyhow::{Context as _, Result};
use colored::Colorize;
use controlplane::PlaneState;

use crate::Context;
use crate::cli::StatusArgs;
use crate::state;
use crate::ui;

pub fn run(ctx: &Context, args: StatusArgs) -> Result<()> {
    let path = state::state_file(args.state.as_deref())?;
    let snapshot = state::load(&path)?;

    if args.json {
        let json = serde_json::to_string_pretty(&snapshot).context("Failed to serialize state")?;
        println!("{json}");
        return Ok(());
    }

    ui::header("Remote state");
    ui::kv("file", &path.display().to_string());
    ui::kv("region", &snapshot.region);
    ui::kv("account", &snapshot.account);

    show_functions(&snapshot, ctx.verbose > 0);
    show_events(&snapshot);
    show_apis(&snapshot);
    show_environments(&snapshot);

    println!();
    Ok(())
}

fn show_functions(snapshot: &PlaneState, verbose: bool) {
    ui::section("Functions");
    if snapshot.functions.is_empty() {
        ui::dim("none");
        return;
    }

    for function in snapshot.functions.values() {
        println!(
            "  {} {} {}",
            function.name.bold(),
            function.handler,
            format!(
                "{}MB {}s code {}",
                function.memory_mb,
                function.timeout_secs,
                ui::short_checksum(&function.code_checksum)
            )
            .dimmed()
        );

        for alias in snapshot.aliases.values().filter(|a| a.function == function.name) {
            ui::dim(&format!("alias {} -> version {}", alias.name, alias.version));
        }

        let grants = snapshot.permissions.get(&function.name).map_or(0, Vec::len);
        if verbose {
            ui::dim(&format!(
                "{} version(s), {grants} permission(s)",
                function.versions.len()
            ));
        }
    }
}

fn show_events(snapshot: &PlaneState) {
    if snapshot.rules.is_empty()
        && snapshot.subscriptions.is_empty()
        && snapshot.bucket_notifications.is_empty()
    {
        return;
    }

    ui::section("Triggers");
    for rule in snapshot.rules.values() {
        let targets: Vec<&str> = rule.targets.iter().map(|t| t.arn.as_str()).collect();
        ui::kv(
            &rule.name,
            &format!("{} -> {}", rule.schedule_expression, targets.join(", ")),
        );
    }
    for (topic, endpoints) in &snapshot.subscriptions {
        ui::kv(topic, &endpoints.join(", "));
    }
    for (bucket, config) in &snapshot.bucket_notifications {
        for entry in &config.function_configurations {
            let prefix = entry.prefix.as_deref().unwrap_or("");
            ui::kv(bucket, &format!("{prefix}* -> {}", entry.function_arn));
        }
    }
}

fn show_apis(snapshot: &PlaneState) {
    if snapshot.apis.is_empty() {
        return;
    }

    ui::section("APIs");
    for api in snapshot.apis.values() {
        let stages: Vec<&str> = snapshot
            .deployments
            .iter()
            .filter(|d| d.api_id == api.id)
            .map(|d| d.stage.as_str())
            .collect();
        ui::kv(&api.name, &format!("{} stages: {}", api.id, stages.join(", ")));
    }
    for (key, mapping) in &snapshot.base_path_mappings {
        ui::kv(key, &format!("{} ({})", mapping.api_id, mapping.stage));
    }
}

fn show_environments(snapshot: &PlaneState) {
    if snapshot.environments.is_empty() {
        return;
    }

    ui::section("Environments");
    for env in snapshot.environments.values() {
        ui::kv(
            &format!("{}/{}", env.application, env.name),
            &format!("{} version {}", env.tier.name(), env.version_label),
        );
    }
}
