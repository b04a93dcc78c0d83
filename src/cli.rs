use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "skyward")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Package and deploy serverless compute units from a manifest", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build the deployment artifact without deploying
    Package(PackageArgs),

    /// Package the source and reconcile every declared resource
    Deploy(DeployArgs),

    /// Load and validate a manifest
    Validate {
        /// Path to the manifest (TOML or JSON)
        manifest: PathBuf,
    },

    /// Show the recorded remote state
    Status(StatusArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Package
// ============================================================================

#[derive(Parser)]
pub struct PackageArgs {
    /// Path to the manifest (TOML or JSON)
    pub manifest: PathBuf,

    /// Where to write the artifact
    #[arg(short, long, default_value = "bundle.zip")]
    pub output: PathBuf,
}

// ============================================================================
// Deploy
// ============================================================================

#[derive(Parser)]
pub struct DeployArgs {
    /// Path to the manifest (TOML or JSON)
    pub manifest: PathBuf,

    /// Number of units deployed in parallel
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,

    /// Control plane state file
    #[arg(long, env = "SKYWARD_STATE")]
    pub state: Option<PathBuf>,

    /// Only deploy the named units (repeatable)
    #[arg(long)]
    pub only: Vec<String>,

    /// Deploy a prebuilt artifact instead of packaging
    #[arg(long)]
    pub artifact: Option<PathBuf>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

// ============================================================================
// Status
// ============================================================================

#[derive(Parser)]
pub struct StatusArgs {
    /// Control plane state file
    #[arg(long, env = "SKYWARD_STATE")]
    pub state: Option<PathBuf>,

    /// Print the raw state as JSON
    #[arg(long)]
    pub json: bool,
}
