use anyhow::{Context as _, Result};
use packager::ArtifactPackager;
use std::env;

use crate::Context;
use crate::cli::PackageArgs;
use crate::manifest::Manifest;
use crate::progress::PackageSpinner;
use crate::ui;

pub fn run(ctx: &Context, args: PackageArgs) -> Result<()> {
    let manifest = Manifest::load(&args.manifest)?;

    let artifact = {
        let mut spinner = PackageSpinner::new(ctx.quiet);
        ArtifactPackager::new(&env::temp_dir())
            .build(&manifest.package, &mut spinner)
            .with_context(|| format!("Failed to package {}", manifest.package.source))?
    };

    artifact
        .write_to(&args.output)
        .with_context(|| format!("Failed to write artifact: {}", args.output.display()))?;

    let entries = artifact.entries().context("Failed to read back artifact")?;

    ui::success(&format!("Packaged {}", args.output.display()));
    if !ctx.quiet {
        ui::kv("size", &ui::format_size(artifact.len() as u64));
        ui::kv("entries", &entries.len().to_string());
        ui::kv("checksum", artifact.checksum());
    }
    if ctx.verbose > 1 {
        for name in entries.keys() {
            ui::dim(name);
        }
    }

    Ok(())
}
