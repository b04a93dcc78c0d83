use anyhow::{Context as _, Result};
use colored::Colorize;
use packager::{Artifact, ArtifactPackager};
use reconcile::{DeploymentOrchestrator, OrchestratorOptions, ResourceReport, RunReport, UnitState};
use std::env;

use crate::Context;
use crate::cli::DeployArgs;
use crate::manifest::Manifest;
use crate::progress::{DeployPrinter, PackageSpinner};
use crate::state;
use crate::ui;

pub fn run(ctx: &Context, args: DeployArgs) -> Result<()> {
    let mut manifest = Manifest::load(&args.manifest)?;
    manifest.retain_units(&args.only)?;

    let state_path = state::state_file(args.state.as_deref())?;
    let plane = state::open_plane(&state_path)?;

    if !ctx.quiet {
        ui::header("Deployment plan");
        ui::kv("source", &manifest.package.source.to_string());
        ui::kv("state", &state_path.display().to_string());
        ui::kv("units", &manifest.plan.units.len().to_string());
        ui::kv("apis", &manifest.plan.apis.len().to_string());
        ui::kv("environments", &manifest.plan.environments.len().to_string());
        println!();
    }

    if !ui::confirm("Deploy?", args.yes)? {
        ui::info("Aborted");
        return Ok(());
    }

    let options = OrchestratorOptions {
        jobs: args.jobs.max(1),
        ..Default::default()
    };
    let orchestrator = DeploymentOrchestrator::new(&plane, options);
    let mut printer = DeployPrinter::new(ctx.quiet);

    let result = match &args.artifact {
        Some(path) => {
            let artifact = Artifact::read_from(path)
                .with_context(|| format!("Failed to read artifact: {}", path.display()))?;
            log::info!("Using prebuilt artifact {}", path.display());
            orchestrator.deploy(&artifact, &manifest.plan, &mut printer)
        }
        None => {
            let packager = ArtifactPackager::new(&env::temp_dir());
            let quiet = ctx.quiet;
            orchestrator.run(
                || {
                    let mut spinner = PackageSpinner::new(quiet);
                    packager.build(&manifest.package, &mut spinner)
                },
                &manifest.plan,
                &mut printer,
            )
        }
    };

    // Record whatever reached the remote, even when the run aborted
    state::save(&state_path, &plane.snapshot())?;

    let report = result.context("Deployment aborted")?;
    if !ctx.quiet {
        print_report(&report);
    }

    let failed = report.failed();
    if !failed.is_empty() {
        anyhow::bail!("{} resource(s) failed: {}", failed.len(), failed.join(", "));
    }

    ui::success(&format!(
        "Deployed {} unit(s) with {} warning(s)",
        report.units.len(),
        report.warning_count()
    ));
    Ok(())
}

fn print_report(report: &RunReport) {
    ui::section("Units");
    for unit in &report.units {
        let state = match unit.state {
            UnitState::Done => unit.state.to_string().green(),
            UnitState::Failed => unit.state.to_string().red(),
            _ => unit.state.to_string().yellow(),
        };
        let outcome = unit.outcome.map(|o| o.to_string()).unwrap_or_default();
        println!("  {} {state} {}", unit.name.bold(), outcome.dimmed());
        if let Some(arn) = &unit.invoke_arn {
            ui::dim(arn);
        }
        if let Some(error) = &unit.error {
            ui::error(&format!("{}: {error}", unit.name));
        }
        for warning in &unit.warnings {
            ui::warn(&warning.to_string());
        }
    }

    print_resources("APIs", &report.apis);
    print_resources("Environments", &report.environments);

    for warning in &report.warnings {
        ui::warn(&warning.to_string());
    }
    println!();
}

fn print_resources(title: &str, resources: &[ResourceReport]) {
    if resources.is_empty() {
        return;
    }

    ui::section(title);
    for resource in resources {
        match (&resource.record, &resource.error) {
            (_, Some(error)) => ui::error(&format!("{}: {error}", resource.name)),
            (Some(record), None) => {
                let outcome = resource.outcome.map(|o| o.to_string()).unwrap_or_default();
                ui::success(&format!("{} {} ({outcome})", resource.name, record.id));
            }
            (None, None) => ui::dim(&resource.name),
        }
        for warning in &resource.warnings {
            ui::warn(&warning.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn fixture(dir: &Path) -> std::path::PathBuf {
        let app = dir.join("app");
        fs::create_dir_all(&app).unwrap();
        fs::write(app.join("app.py"), "def handler(event, context):\n    return 1\n").unwrap();

        let manifest = dir.join("skyward.toml");
        fs::write(
            &manifest,
            r#"
version = "dev"
source = "app"

[functions.f1]
role = "lambda_basic_execution"
handler = "app.handler"
[functions.f1.event_sources]
api_gateway = {}

[functions.f2]
role = "lambda_basic_execution"
handler = "app.handler"
schedule_expression = "rate(5 minutes)"
"#,
        )
        .unwrap();
        manifest
    }

    fn args(manifest: &Path, state: &Path) -> DeployArgs {
        DeployArgs {
            manifest: manifest.to_path_buf(),
            jobs: 2,
            state: Some(state.to_path_buf()),
            only: Vec::new(),
            artifact: None,
            yes: true,
        }
    }

    #[test]
    fn test_deploy_records_state() {
        let dir = TempDir::new().unwrap();
        let manifest = fixture(dir.path());
        let state_path = dir.path().join("state.json");
        let ctx = Context {
            verbose: 0,
            quiet: true,
        };

        run(&ctx, args(&manifest, &state_path)).unwrap();

        let state = state::load(&state_path).unwrap();
        assert!(state.functions.contains_key("f1"));
        assert!(state.functions.contains_key("f2"));
        assert_eq!(state.aliases.len(), 2);
        assert_eq!(state.rules.len(), 1);

        // A second run converges on the same resources
        run(&ctx, args(&manifest, &state_path)).unwrap();
        let state = state::load(&state_path).unwrap();
        assert_eq!(state.functions.len(), 2);
        assert_eq!(state.aliases.len(), 2);
    }

    #[test]
    fn test_deploy_only_filters_units() {
        let dir = TempDir::new().unwrap();
        let manifest = fixture(dir.path());
        let state_path = dir.path().join("state.json");
        let ctx = Context {
            verbose: 0,
            quiet: true,
        };

        let mut only = args(&manifest, &state_path);
        only.only = vec!["f2".to_string()];
        run(&ctx, only).unwrap();

        let state = state::load(&state_path).unwrap();
        assert!(!state.functions.contains_key("f1"));
        assert!(state.functions.contains_key("f2"));
    }

    #[test]
    fn test_deploy_missing_source_aborts_without_remote_changes() {
        let dir = TempDir::new().unwrap();
        let manifest = fixture(dir.path());
        fs::remove_dir_all(dir.path().join("app")).unwrap();
        let state_path = dir.path().join("state.json");
        let ctx = Context {
            verbose: 0,
            quiet: true,
        };

        assert!(run(&ctx, args(&manifest, &state_path)).is_err());
        let state = state::load(&state_path).unwrap();
        assert!(state.functions.is_empty());
    }
}
