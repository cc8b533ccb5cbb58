//! Canonical artifact locations per build profile.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// A named build configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    Debug,
    Release,
}

impl Profile {
    pub const ALL: [Profile; 2] = [Profile::Debug, Profile::Release];

    /// Directory segment cargo uses for this profile.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    /// Flag passed to the compile and bootloader commands.
    pub fn cargo_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::Release => Some("--release"),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Profile {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" | "dev" => Ok(Self::Debug),
            "release" => Ok(Self::Release),
            other => bail!(
                "unsupported profile '{}'; expected 'debug' (alias 'dev') or 'release'",
                other
            ),
        }
    }
}

/// Everything needed to derive artifact paths, independent of the profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    pub project_root: PathBuf,
    pub target_dir: PathBuf,
    pub target: String,
    pub binary_name: String,
    /// Virtual disk format, e.g. `VDI`. Its lowercase form is the file extension.
    pub format: String,
}

/// Resolved artifact locations for one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactPaths {
    pub profile: Profile,
    pub artifact_dir: PathBuf,
    pub binary: PathBuf,
    pub bootable_image: PathBuf,
    pub raw_disk_image: PathBuf,
    pub virtual_disk_image: PathBuf,
}

impl ArtifactLayout {
    pub fn artifact_dir(&self, profile: Profile) -> PathBuf {
        let target_dir = if self.target_dir.is_absolute() {
            self.target_dir.clone()
        } else {
            self.project_root.join(&self.target_dir)
        };
        target_dir.join(&self.target).join(profile.dir_name())
    }

    pub fn paths(&self, profile: Profile) -> ArtifactPaths {
        let artifact_dir = self.artifact_dir(profile);
        let name = &self.binary_name;
        ArtifactPaths {
            profile,
            binary: artifact_dir.join(name),
            bootable_image: artifact_dir.join(format!("bootimage-{name}.bin")),
            raw_disk_image: artifact_dir.join(format!("{name}.img")),
            virtual_disk_image: artifact_dir
                .join(format!("{name}.{}", self.format.to_ascii_lowercase())),
            artifact_dir,
        }
    }
}
