//! Host platform dispatch.
//!
//! The host is detected once at startup and turned into [`StageCommands`]:
//! how to reach the conversion environment and how to reveal a directory.
//! Nothing downstream inspects the host again.

use std::fmt;
use std::path::Path;

use crate::artifact::paths::Profile;
use crate::config::{BridgeConfig, ReleaseConfig};
use crate::process::Cmd;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Windows,
    MacOs,
    /// Linux and other POSIX hosts.
    Posix,
}

impl HostPlatform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Posix
        }
    }

    /// Program that opens a directory in the platform file browser.
    pub fn reveal_program(self) -> &'static str {
        match self {
            Self::Windows => "explorer",
            Self::MacOs => "open",
            Self::Posix => "xdg-open",
        }
    }

    /// `explorer` exits 1 even when the window opened.
    pub fn reveal_ok_codes(self) -> &'static [i32] {
        match self {
            Self::Windows => &[0, 1],
            Self::MacOs | Self::Posix => &[0],
        }
    }

    /// Conversion tooling lives in WSL on Windows hosts.
    pub fn default_bridge(self) -> Option<BridgeConfig> {
        match self {
            Self::Windows => Some(BridgeConfig::default()),
            Self::MacOs | Self::Posix => None,
        }
    }
}

impl fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Windows => "windows",
            Self::MacOs => "macos",
            Self::Posix => "posix",
        })
    }
}

/// How paths are written when handed to the secondary environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStyle {
    Verbatim,
    /// `C:\dev\os` becomes `/mnt/c/dev/os`.
    Wsl,
}

impl PathStyle {
    pub fn translate(self, path: &Path) -> String {
        let raw = path.display().to_string();
        match self {
            Self::Verbatim => raw,
            Self::Wsl => to_wsl_path(&raw),
        }
    }
}

/// Where the conversion stage runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionEnvironment {
    /// In this process, on the host.
    Native,
    /// By re-entering this tool inside another environment.
    Bridged {
        program: String,
        args: Vec<String>,
        exe: String,
        path_style: PathStyle,
    },
}

impl ConversionEnvironment {
    /// Command that runs `convert <profile> <project_root>` across the bridge.
    ///
    /// Returns `None` for [`ConversionEnvironment::Native`].
    pub fn bridge_command(&self, profile: Profile, project_root: &Path) -> Option<Cmd> {
        match self {
            Self::Native => None,
            Self::Bridged {
                program,
                args,
                exe,
                path_style,
            } => Some(
                Cmd::new(program.clone())
                    .args(args.iter().cloned())
                    .arg(exe.clone())
                    .arg("convert")
                    .arg(profile.dir_name())
                    .arg(path_style.translate(project_root))
                    .current_dir(project_root),
            ),
        }
    }
}

/// Per-host command selection, resolved once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommands {
    pub host: HostPlatform,
    pub conversion: ConversionEnvironment,
    pub reveal_program: String,
}

impl StageCommands {
    pub fn for_host(host: HostPlatform, config: &ReleaseConfig) -> Self {
        let bridge = config
            .conversion
            .bridge
            .clone()
            .or_else(|| host.default_bridge())
            .filter(|bridge| !bridge.program.trim().is_empty());

        let conversion = match bridge {
            None => ConversionEnvironment::Native,
            Some(bridge) => {
                let path_style = if is_wsl_launcher(&bridge.program) {
                    PathStyle::Wsl
                } else {
                    PathStyle::Verbatim
                };
                ConversionEnvironment::Bridged {
                    program: bridge.program,
                    args: bridge.args,
                    exe: bridge.exe,
                    path_style,
                }
            }
        };

        let reveal_program = config
            .reveal
            .program
            .clone()
            .unwrap_or_else(|| host.reveal_program().to_string());

        Self {
            host,
            conversion,
            reveal_program,
        }
    }

    pub fn detect(config: &ReleaseConfig) -> Self {
        Self::for_host(HostPlatform::current(), config)
    }
}

fn is_wsl_launcher(program: &str) -> bool {
    let name = Path::new(program)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(program);
    name.eq_ignore_ascii_case("wsl")
}

/// Translate a Windows path to its WSL mount form. Non-drive paths pass through
/// with separators normalised.
pub fn to_wsl_path(raw: &str) -> String {
    let trimmed = raw
        .strip_prefix(r"\\?\")
        .or_else(|| raw.strip_prefix("//?/"))
        .unwrap_or(raw);
    let normalised = trimmed.replace('\\', "/");

    let mut chars = normalised.chars();
    match (chars.next(), chars.next()) {
        (Some(drive), Some(':')) if drive.is_ascii_alphabetic() => {
            let rest = chars.as_str().trim_start_matches('/');
            let drive = drive.to_ascii_lowercase();
            if rest.is_empty() {
                format!("/mnt/{drive}")
            } else {
                format!("/mnt/{drive}/{rest}")
            }
        }
        _ => normalised,
    }
}
