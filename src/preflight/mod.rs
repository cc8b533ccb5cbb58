//! Preflight checks for release runs.
//!
//! Validates that the host has every tool the pipeline will invoke before the
//! first stage starts, so a missing emulator is reported up front instead of
//! after a full compile.
//!
//! # Example
//!
//! ```rust
//! use release_pipeline::preflight::{command_exists, check_required_tools};
//!
//! if !command_exists("qemu-system-x86_64") {
//!     println!("qemu not installed");
//! }
//!
//! let tools = [("cargo", "rustup".to_string())];
//! if let Err(e) = check_required_tools(&tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};

use crate::config::ReleaseConfig;
use crate::platform::{ConversionEnvironment, StageCommands};

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Tools a release run needs on this host, as (command, install hint).
///
/// The conversion tool is only required on the host when conversion runs
/// natively; across a bridge only the launcher is.
pub fn required_tools(config: &ReleaseConfig, commands: &StageCommands) -> Vec<(String, String)> {
    let mut tools = vec![
        (config.compile.program.clone(), "rustup".to_string()),
        (
            config.bootloader.program.clone(),
            "cargo install bootimage".to_string(),
        ),
        (config.emulator.program.clone(), "qemu".to_string()),
    ];
    match &commands.conversion {
        ConversionEnvironment::Native => {
            tools.push((config.conversion.tool.clone(), "virtualbox".to_string()));
        }
        ConversionEnvironment::Bridged { program, .. } => {
            tools.push((program.clone(), "wsl".to_string()));
        }
    }
    tools.sort();
    tools.dedup_by(|a, b| a.0 == b.0);
    tools
}

/// Check that specific tools are available.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` with list of missing tools and their install hints
pub fn check_required_tools<S: AsRef<str>>(tools: &[(S, String)]) -> Result<()> {
    let missing: Vec<String> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool.as_ref()))
        .map(|(tool, hint)| format!("  {} (install: {})", tool.as_ref(), hint))
        .collect();

    if !missing.is_empty() {
        bail!("Missing required host tools:\n{}", missing.join("\n"));
    }

    Ok(())
}

/// Check every tool the configured pipeline will run on this host.
pub fn check_host_tools(config: &ReleaseConfig, commands: &StageCommands) -> Result<()> {
    check_required_tools(&required_tools(config, commands))
}
