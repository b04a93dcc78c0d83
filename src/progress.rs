//! Terminal progress for packaging and deployment runs.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use packager::{Artifact, PackageStep};
use reconcile::{UnitReport, UnitState};
use std::time::Duration;

/// Spinner shown while the artifact is built.
///
/// Hidden when stderr is not a terminal or output is quiet.
pub struct PackageSpinner {
    bar: ProgressBar,
}

impl PackageSpinner {
    pub fn new(quiet: bool) -> Self {
        let bar = if quiet || !console::Term::stderr().is_term() {
            ProgressBar::hidden()
        } else {
            ProgressBar::new_spinner()
        };
        if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_message("Packaging");
        Self { bar }
    }
}

impl packager::ProgressCallback for PackageSpinner {
    fn on_step(&mut self, step: &PackageStep) {
        log::debug!("Packaging step: {step}");
        self.bar.set_message(format!("Packaging: {step}"));
    }

    fn on_complete(&mut self, artifact: &Artifact) {
        self.bar.set_message(format!("Packaged {} bytes", artifact.len()));
    }
}

/// Clears the spinner line, including on early error returns.
impl Drop for PackageSpinner {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

/// Prints one status line per finished unit and resource.
pub struct DeployPrinter {
    quiet: bool,
}

impl DeployPrinter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl reconcile::ProgressCallback for DeployPrinter {
    fn on_units_start(&mut self, count: usize) {
        if !self.quiet {
            println!("{} Deploying {count} unit(s)", "→".blue());
        }
    }

    fn on_unit_complete(&mut self, report: &UnitReport) {
        if self.quiet {
            return;
        }
        let marker = match report.state {
            UnitState::Done if report.warnings.is_empty() => "✓".green(),
            UnitState::Done => "⚠".yellow(),
            UnitState::Failed => "✗".red(),
            _ => "•".yellow(),
        };
        println!("  {marker} {} ({})", report.name, report.state);
    }

    fn on_resource_start(&mut self, kind: &str, name: &str) {
        if !self.quiet {
            println!("{} Deploying {kind} {name}", "→".blue());
        }
    }
}
