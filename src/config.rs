//! `release.toml` loading.
//!
//! Every table and field is optional; a project with no config file gets the
//! defaults below. Unknown keys are rejected so typos do not silently fall
//! back to defaults.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::artifact::paths::ArtifactLayout;
use crate::artifact::raw::{RawSizing, DEFAULT_BLOCK_SIZE};

pub const CONFIG_FILENAME: &str = "release.toml";

/// Exit code QEMU reports when the kernel writes `0x10` to the debug-exit port.
pub const QEMU_SUCCESS_EXIT_CODE: i32 = (0x10 << 1) | 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReleaseConfig {
    pub project: ProjectConfig,
    pub compile: ToolConfig,
    pub bootloader: ToolConfig,
    pub conversion: ConversionConfig,
    pub emulator: EmulatorConfig,
    pub reveal: RevealConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    pub binary_name: String,
    pub target: String,
    pub target_dir: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            binary_name: "dbos".to_string(),
            target: "x86_64-dbos".to_string(),
            target_dir: PathBuf::from("target"),
        }
    }
}

/// A program plus leading arguments; the profile flag is appended.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: "cargo".to_string(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConversionConfig {
    pub tool: String,
    pub format: String,
    pub block_size: u64,
    pub block_count: Option<u64>,
    /// Secondary environment used to run the conversion. `None` picks the host default.
    pub bridge: Option<BridgeConfig>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            tool: "VBoxManage".to_string(),
            format: "VDI".to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
            block_count: None,
            bridge: None,
        }
    }
}

impl ConversionConfig {
    pub fn sizing(&self) -> RawSizing {
        RawSizing {
            block_size: self.block_size,
            block_count: self.block_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Launcher for the secondary environment, e.g. `wsl`. Empty disables bridging.
    pub program: String,
    pub args: Vec<String>,
    /// This tool's executable as seen from inside the secondary environment.
    pub exe: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            program: "wsl".to_string(),
            args: vec!["--".to_string()],
            exe: "release-pipeline".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmulatorConfig {
    pub program: String,
    pub iobase: u16,
    pub iosize: u16,
    pub extra_args: Vec<String>,
    pub success_exit_codes: Vec<i32>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            program: "qemu-system-x86_64".to_string(),
            iobase: 0xf4,
            iosize: 0x04,
            extra_args: Vec::new(),
            success_exit_codes: vec![0, QEMU_SUCCESS_EXIT_CODE],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RevealConfig {
    /// Overrides the platform file browser.
    pub program: Option<String>,
}

impl ReleaseConfig {
    /// Default compile command: `cargo build`.
    pub fn with_default_commands(mut self) -> Self {
        if self.compile.args.is_empty() && self.compile.program == "cargo" {
            self.compile.args = vec!["build".to_string()];
        }
        if self.bootloader.args.is_empty() && self.bootloader.program == "cargo" {
            self.bootloader.args = vec!["bootimage".to_string()];
        }
        self
    }

    pub fn parse(raw: &str, origin: &Path) -> Result<Self> {
        let parsed: ReleaseConfig = toml::from_str(raw)
            .with_context(|| format!("parsing release config '{}'", origin.display()))?;
        let config = parsed.with_default_commands();
        config
            .validate()
            .with_context(|| format!("invalid release config '{}'", origin.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("project.binary_name", &self.project.binary_name),
            ("project.target", &self.project.target),
            ("compile.program", &self.compile.program),
            ("bootloader.program", &self.bootloader.program),
            ("conversion.tool", &self.conversion.tool),
            ("conversion.format", &self.conversion.format),
            ("emulator.program", &self.emulator.program),
        ] {
            if value.trim().is_empty() {
                bail!("{field} must not be empty");
            }
        }
        if self.conversion.block_size == 0 {
            bail!("conversion.block_size must be greater than zero");
        }
        if self.conversion.block_count == Some(0) {
            bail!("conversion.block_count must be greater than zero when set");
        }
        if let Some(count) = self.conversion.block_count {
            if count.checked_mul(self.conversion.block_size).is_none() {
                bail!(
                    "conversion.block_count * conversion.block_size overflows ({count} * {})",
                    self.conversion.block_size
                );
            }
        }
        if self.emulator.success_exit_codes.is_empty() {
            bail!("emulator.success_exit_codes must list at least one code");
        }
        if let Some(bridge) = &self.conversion.bridge {
            if !bridge.program.trim().is_empty() && bridge.exe.trim().is_empty() {
                bail!("conversion.bridge.exe must not be empty when a bridge program is set");
            }
        }
        Ok(())
    }

    pub fn layout(&self, project_root: &Path) -> ArtifactLayout {
        ArtifactLayout {
            project_root: project_root.to_path_buf(),
            target_dir: self.project.target_dir.clone(),
            target: self.project.target.clone(),
            binary_name: self.project.binary_name.clone(),
            format: self.conversion.format.clone(),
        }
    }
}

/// Where the config for `project_root` would be read from, if anywhere.
pub fn locate_config(project_root: &Path) -> Option<PathBuf> {
    let local = project_root.join(CONFIG_FILENAME);
    if local.is_file() {
        return Some(local);
    }
    let user = dirs::config_dir()?
        .join(env!("CARGO_PKG_NAME"))
        .join(CONFIG_FILENAME);
    user.is_file().then_some(user)
}

/// Load the config for `project_root`, falling back to defaults.
pub fn load_config(project_root: &Path) -> Result<ReleaseConfig> {
    let Some(path) = locate_config(project_root) else {
        log::debug!(
            "no {CONFIG_FILENAME} for '{}'; using defaults",
            project_root.display()
        );
        return Ok(ReleaseConfig::default().with_default_commands());
    };
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("reading release config '{}'", path.display()))?;
    log::debug!("loaded release config from '{}'", path.display());
    ReleaseConfig::parse(&raw, &path)
}
