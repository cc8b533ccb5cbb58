use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Size and digest of an artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactDigest {
    pub path: String,
    pub sha256: String,
    pub size_bytes: u64,
}

/// Hash `path`, or `None` if it does not exist.
pub fn digest_if_present(path: &Path) -> Result<Option<ArtifactDigest>> {
    if !path.is_file() {
        return Ok(None);
    }
    let (sha256, size_bytes) = sha256_file(path)?;
    Ok(Some(ArtifactDigest {
        path: path.display().to_string(),
        sha256,
        size_bytes,
    }))
}

pub fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let f = File::open(path).with_context(|| format!("opening '{}' for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut BufReader::new(f), &mut hasher)
        .with_context(|| format!("reading '{}' for hashing", path.display()))?;
    Ok((format!("{:x}", hasher.finalize()), size))
}
