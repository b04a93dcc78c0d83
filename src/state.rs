//! Local control plane state.
//!
//! The in-memory control plane is persisted between runs as a JSON file,
//! which makes `skyward` usable as a local emulator of the remote platform.

use anyhow::{Context, Result};
use controlplane::{MemoryControlPlane, PlaneState};
use std::fs;
use std::path::{Path, PathBuf};

/// Region recorded in a fresh state file
pub const DEFAULT_REGION: &str = "us-east-1";

/// Account recorded in a fresh state file
pub const DEFAULT_ACCOUNT: &str = "000000000000";

/// Get the state directory path (~/.local/state/skyward)
pub fn state_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".local").join("state").join("skyward"))
}

/// Resolve the state file, falling back to the default location.
pub fn state_file(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(state_dir()?.join("state.json")),
    }
}

/// Load state from disk, or return a fresh state if the file doesn't exist
pub fn load(path: &Path) -> Result<PlaneState> {
    if !path.exists() {
        log::debug!("State file {} does not exist, starting fresh", path.display());
        return Ok(PlaneState::new(DEFAULT_REGION, DEFAULT_ACCOUNT));
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read state file: {}", path.display()))?;

    let state: PlaneState = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

    log::debug!("Loaded state from {}", path.display());
    Ok(state)
}

/// Save state to disk
pub fn save(path: &Path, state: &PlaneState) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
    }

    let content = serde_json::to_string_pretty(state).context("Failed to serialize state")?;

    fs::write(path, content)
        .with_context(|| format!("Failed to write state file: {}", path.display()))?;

    log::debug!("Saved state to {}", path.display());
    Ok(())
}

/// Open the control plane recorded at `path`.
pub fn open_plane(path: &Path) -> Result<MemoryControlPlane> {
    Ok(MemoryControlPlane::from_state(load(path)?))
}
