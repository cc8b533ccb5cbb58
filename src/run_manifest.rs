//! `release-run.json`: what the last pipeline run did.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use time::OffsetDateTime;

use crate::artifact::checksum::{digest_if_present, ArtifactDigest};
use crate::artifact::paths::{ArtifactPaths, Profile};
use crate::pipeline::{PipelineRun, Stage, StageRecord};

pub const RUN_MANIFEST_FILENAME: &str = "release-run.json";

#[derive(Debug, Serialize)]
pub struct RunManifest {
    pub profile: Profile,
    pub host: String,
    pub status: &'static str,
    pub failed_stage: Option<Stage>,
    pub error: Option<String>,
    pub reveal_warning: Option<String>,
    pub started_at_utc: String,
    pub finished_at_utc: String,
    pub stages: Vec<StageRecord>,
    pub artifacts: ManifestArtifacts,
}

#[derive(Debug, Serialize)]
pub struct ManifestArtifacts {
    pub bootable_image: Option<ArtifactDigest>,
    pub raw_disk_image: Option<ArtifactDigest>,
    pub virtual_disk_image: Option<ArtifactDigest>,
}

impl ManifestArtifacts {
    pub fn collect(paths: &ArtifactPaths) -> Result<Self> {
        Ok(Self {
            bootable_image: digest_if_present(&paths.bootable_image)?,
            raw_disk_image: digest_if_present(&paths.raw_disk_image)?,
            virtual_disk_image: digest_if_present(&paths.virtual_disk_image)?,
        })
    }
}

impl RunManifest {
    pub fn from_run(
        run: &PipelineRun,
        host: &str,
        started_at_utc: String,
        finished_at_utc: String,
    ) -> Result<Self> {
        let (status, error, reveal_warning) = match &run.outcome {
            Ok(report) => (
                "success",
                None,
                report.reveal_warning.as_ref().map(ToString::to_string),
            ),
            Err(err) => ("failed", Some(err.to_string()), None),
        };
        Ok(Self {
            profile: run.profile,
            host: host.to_string(),
            status,
            failed_stage: run.failed_stage(),
            error,
            reveal_warning,
            started_at_utc,
            finished_at_utc,
            stages: run.stages.clone(),
            artifacts: ManifestArtifacts::collect(&run.paths)?,
        })
    }
}

pub fn manifest_path(artifact_dir: &Path) -> PathBuf {
    artifact_dir.join(RUN_MANIFEST_FILENAME)
}

/// Replace the manifest at `path`. Readers never see a half-written file.
pub fn write_run_manifest(path: &Path, manifest: &RunManifest) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("run manifest path '{}' has no directory", path.display()))?;
    fs::create_dir_all(dir)
        .with_context(|| format!("creating artifact directory '{}'", dir.display()))?;

    let payload = serde_json::to_vec_pretty(manifest).context("serializing run manifest")?;
    let staging = dir.join(format!(".{RUN_MANIFEST_FILENAME}.{}", std::process::id()));
    let mut file = File::create(&staging)
        .with_context(|| format!("creating '{}'", staging.display()))?;
    file.write_all(&payload)
        .and_then(|()| file.sync_all())
        .with_context(|| format!("writing '{}'", staging.display()))?;
    drop(file);
    fs::rename(&staging, path)
        .with_context(|| format!("publishing run manifest '{}'", path.display()))
}

pub fn now_utc_compact() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}
