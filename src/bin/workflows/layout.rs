use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use release_pipeline::config::CONFIG_FILENAME;

/// Nearest ancestor of the current directory holding `release.toml` or `Cargo.toml`.
pub(crate) fn locate_project_root() -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("resolving current directory")?;
    locate_project_root_from(&cwd)
}

pub(crate) fn locate_project_root_from(start: &Path) -> Result<PathBuf> {
    for marker in [CONFIG_FILENAME, "Cargo.toml"] {
        if let Some(root) = start
            .ancestors()
            .find(|candidate| candidate.join(marker).is_file())
        {
            return Ok(root.to_path_buf());
        }
    }
    bail!(
        "unable to locate project root from '{}': no {} or Cargo.toml in any parent directory",
        start.display(),
        CONFIG_FILENAME
    )
}

/// Project root given on the command line, e.g. by the conversion bridge.
pub(crate) fn explicit_project_root(raw: &str) -> Result<PathBuf> {
    let path = PathBuf::from(raw);
    if !path.is_dir() {
        bail!("project root '{}' is not a directory", path.display());
    }
    path.canonicalize()
        .with_context(|| format!("resolving project root '{}'", path.display()))
}
