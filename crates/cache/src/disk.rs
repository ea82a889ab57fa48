//! On-disk artifact store.

use crate::artifact::CompiledArtifact;
use crate::fingerprint::ArtifactFingerprint;
use anyhow::{ensure, Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// One JSON file per fingerprint under a directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, fingerprint: &ArtifactFingerprint) -> PathBuf {
        self.dir.join(format!("{}.json", fingerprint))
    }

    pub fn load(&self, fingerprint: &ArtifactFingerprint) -> Result<Option<CompiledArtifact>> {
        let path = self.entry_path(fingerprint);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        let artifact: CompiledArtifact = serde_json::from_slice(&data)
            .with_context(|| format!("decoding {}", path.display()))?;
        ensure!(
            artifact.fingerprint() == fingerprint,
            "{} holds artifact {}",
            path.display(),
            artifact.fingerprint()
        );
        Ok(Some(artifact))
    }

    /// Writes through a temporary file so readers never see a partial entry.
    pub fn store(&self, artifact: &CompiledArtifact) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.entry_path(artifact.fingerprint());
        let blob = serde_json::to_vec_pretty(artifact)?;
        let mut file = NamedTempFile::new_in(&self.dir)?;
        file.write_all(&blob)?;
        file.persist(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}
