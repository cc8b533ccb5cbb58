//! Error taxonomy for pipeline stages.
//!
//! Every fatal variant carries the [`StageFailed`] (or the I/O error) that
//! caused it, so the operator sees the failing command, its arguments and its
//! exit status. [`RevealFailed`] is the only non-fatal kind.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::artifact::paths::ArtifactPaths;
use crate::pipeline::Stage;

/// Exit codes of `release-pipeline convert`, one per conversion failure kind,
/// so the host can rebuild the error from across the bridge.
pub const CONVERT_EXIT_RAW_COPY: u8 = 41;
pub const CONVERT_EXIT_STALE_IMAGE: u8 = 42;
pub const CONVERT_EXIT_FORMAT: u8 = 43;

/// An external command did not finish with an acceptable exit status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailed {
    pub program: String,
    pub args: Vec<String>,
    /// `None` when the child could not be spawned or was killed by a signal.
    pub exit_code: Option<i32>,
    /// Tail of the child's stderr, or the spawn error text.
    pub diagnostic: String,
}

impl StageFailed {
    /// Full command line, for messages.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for StageFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "`{}` exited with code {}", self.command_line(), code)?,
            None => write!(f, "`{}` did not exit normally", self.command_line())?,
        }
        let diagnostic = self.diagnostic.trim();
        if !diagnostic.is_empty() {
            write!(f, "\n  stderr: {}", diagnostic.replace('\n', "\n          "))?;
        }
        Ok(())
    }
}

impl std::error::Error for StageFailed {}

/// Failures inside the conversion stage.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error(
        "copying bootable image '{}' to raw disk image '{}' failed: {}",
        .bootable.display(),
        .raw.display(),
        .source
    )]
    RawCopyFailed {
        bootable: PathBuf,
        raw: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("removing stale virtual disk image '{}' failed: {}", .path.display(), .reason)]
    StaleImageDeletionFailed { path: PathBuf, reason: String },

    #[error("virtual disk conversion failed: {0}")]
    FormatConversionFailed(#[source] StageFailed),

    #[error("cross-environment conversion failed: {0}")]
    BridgeFailed(#[source] StageFailed),
}

impl ConversionError {
    /// Exit code for `release-pipeline convert` when it fails with this error.
    pub fn convert_exit_code(&self) -> u8 {
        match self {
            Self::RawCopyFailed { .. } => CONVERT_EXIT_RAW_COPY,
            Self::StaleImageDeletionFailed { .. } => CONVERT_EXIT_STALE_IMAGE,
            Self::FormatConversionFailed(_) => CONVERT_EXIT_FORMAT,
            Self::BridgeFailed(_) => 4,
        }
    }

    /// Rebuild the failure kind from a bridged `convert` that exited non-zero.
    ///
    /// Unknown codes (the launcher itself failing) stay [`Self::BridgeFailed`].
    pub fn from_bridge_failure(failed: StageFailed, paths: &ArtifactPaths) -> Self {
        let code = failed.exit_code.and_then(|code| u8::try_from(code).ok());
        match code {
            Some(CONVERT_EXIT_RAW_COPY) => Self::RawCopyFailed {
                bootable: paths.bootable_image.clone(),
                raw: paths.raw_disk_image.clone(),
                source: std::io::Error::other(failed.to_string()),
            },
            Some(CONVERT_EXIT_STALE_IMAGE) => Self::StaleImageDeletionFailed {
                path: paths.virtual_disk_image.clone(),
                reason: failed.to_string(),
            },
            Some(CONVERT_EXIT_FORMAT) => Self::FormatConversionFailed(failed),
            _ => Self::BridgeFailed(failed),
        }
    }
}

/// A fatal pipeline failure, tagged by the stage that produced it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("compile stage failed: {0}")]
    CompileFailed(#[source] StageFailed),

    #[error("bootloader stage failed: {0}")]
    BootloaderInjectionFailed(#[source] StageFailed),

    #[error("convert stage failed: {0}")]
    ConversionFailed(#[from] ConversionError),

    #[error("emulate stage failed: {0}")]
    EmulationLaunchFailed(#[source] StageFailed),
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::CompileFailed(_) => Stage::Compile,
            Self::BootloaderInjectionFailed(_) => Stage::Bootloader,
            Self::ConversionFailed(_) => Stage::Convert,
            Self::EmulationLaunchFailed(_) => Stage::Emulate,
        }
    }

    /// Process exit code for this failure. Never zero.
    pub fn exit_code(&self) -> u8 {
        match self.stage() {
            Stage::Compile => 2,
            Stage::Bootloader => 3,
            Stage::Convert => 4,
            Stage::Emulate => 5,
            // Reveal never produces a PipelineError.
            Stage::Reveal => 1,
        }
    }
}

/// The artifact directory could not be opened. Logged, never fatal.
#[derive(Debug, Clone, Error)]
#[error("revealing '{}' failed: {}", .dir.display(), .cause)]
pub struct RevealFailed {
    pub dir: PathBuf,
    pub cause: StageFailed,
}
