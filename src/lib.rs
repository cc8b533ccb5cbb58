//! Release-build orchestration for a bare-metal kernel image.
//!
//! Turns a compiled kernel into a bootable image, converts it to a virtual
//! disk, boots it under QEMU and opens the artifact directory:
//!
//! ```text
//! compile ──► bootloader ──► convert ──► emulate ──► reveal
//!  cargo      cargo          raw copy    qemu        file browser
//!  build      bootimage      + VBoxManage            (non-fatal)
//! ```
//!
//! - **Artifact paths** - [`artifact::paths`], one lookup per profile
//! - **Stage runner** - [`process`], the [`CommandRunner`] seam
//! - **Conversion** - [`conversion`], raw image + virtual disk
//! - **Pipeline** - [`pipeline`], fail-fast stage sequencing
//! - **Host dispatch** - [`platform`], chosen once at startup
//!
//! # Example
//!
//! ```rust,no_run
//! use release_pipeline::{load_config, ProcessRunner, Profile, ReleasePipeline, StageCommands};
//! use std::path::Path;
//!
//! let root = Path::new(".");
//! let config = load_config(root)?;
//! let commands = StageCommands::detect(&config);
//! let pipeline = ReleasePipeline::new(&ProcessRunner, &config, &commands, config.layout(root));
//! let run = pipeline.run(Profile::Release);
//! std::process::exit(run.exit_code().into());
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod artifact;
pub mod config;
pub mod conversion;
pub mod error;
pub mod pipeline;
pub mod platform;
pub mod preflight;
pub mod process;
pub mod qemu;
pub mod run_manifest;

pub use artifact::{ArtifactLayout, ArtifactPaths, Profile};
pub use config::{load_config, ReleaseConfig};
pub use error::{ConversionError, PipelineError, RevealFailed, StageFailed};
pub use pipeline::{PipelineRun, ReleasePipeline, Stage};
pub use platform::{HostPlatform, StageCommands};
pub use process::{Cmd, CommandRunner, ProcessRunner};
