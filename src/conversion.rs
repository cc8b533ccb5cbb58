//! Bootable image -> raw disk image -> virtual disk image.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;

use fs2::FileExt;

use crate::artifact::paths::ArtifactPaths;
use crate::artifact::raw::{copy_block_aligned, RawCopy};
use crate::config::ConversionConfig;
use crate::error::ConversionError;
use crate::process::{Cmd, CommandRunner};

/// What a successful conversion did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionOutcome {
    pub raw: RawCopy,
    pub removed_stale_image: bool,
}

/// Run the conversion stage for `paths` in the current environment.
///
/// Order matters: the raw copy must succeed before the previous virtual disk
/// is removed, and the removal must succeed before the tool runs.
pub fn convert(
    runner: &dyn CommandRunner,
    paths: &ArtifactPaths,
    config: &ConversionConfig,
) -> Result<ConversionOutcome, ConversionError> {
    let raw = copy_block_aligned(&paths.bootable_image, &paths.raw_disk_image, config.sizing())
        .map_err(|source| ConversionError::RawCopyFailed {
            bootable: paths.bootable_image.clone(),
            raw: paths.raw_disk_image.clone(),
            source,
        })?;
    if raw.truncated() {
        log::warn!(
            "bootable image '{}' ({} bytes) truncated to {} bytes in '{}'",
            paths.bootable_image.display(),
            raw.input_len,
            raw.output_len,
            paths.raw_disk_image.display()
        );
    }
    log::info!(
        "raw disk image '{}' written ({} bytes)",
        paths.raw_disk_image.display(),
        raw.output_len
    );

    let removed_stale_image = remove_stale_image(&paths.virtual_disk_image)?;
    if removed_stale_image {
        log::info!(
            "removed previous virtual disk image '{}'",
            paths.virtual_disk_image.display()
        );
    }

    let cmd = conversion_command(paths, config);
    if let Err(failed) = runner.run(&cmd) {
        // The tool may leave a partial image behind.
        if let Err(err) = fs::remove_file(&paths.virtual_disk_image) {
            if err.kind() != io::ErrorKind::NotFound {
                log::warn!(
                    "could not remove partial image '{}': {err}",
                    paths.virtual_disk_image.display()
                );
            }
        }
        return Err(ConversionError::FormatConversionFailed(failed));
    }

    Ok(ConversionOutcome {
        raw,
        removed_stale_image,
    })
}

/// `<tool> convertfromraw <raw> <virtual> --format <FORMAT>`
pub fn conversion_command(paths: &ArtifactPaths, config: &ConversionConfig) -> Cmd {
    Cmd::new(config.tool.clone())
        .arg("convertfromraw")
        .arg_path(&paths.raw_disk_image)
        .arg_path(&paths.virtual_disk_image)
        .args(["--format".to_string(), config.format.clone()])
        .current_dir(&paths.artifact_dir)
}

/// Delete `path` if present. Returns whether a file was removed.
///
/// A missing file is not an error. A file another process holds locked, or
/// one that cannot be removed, is.
pub fn remove_stale_image(path: &Path) -> Result<bool, ConversionError> {
    let deletion_failed = |reason: String| ConversionError::StaleImageDeletionFailed {
        path: path.to_path_buf(),
        reason,
    };

    let file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(deletion_failed(format!("opening for removal: {err}"))),
    };
    if let Err(err) = file.try_lock_exclusive() {
        return Err(deletion_failed(format!("image is in use by another process: {err}")));
    }
    // Windows refuses to delete open files.
    let _ = file.unlock();
    drop(file);

    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(deletion_failed(err.to_string())),
    }
}
