//! Compiled artifacts and compilation failures.

use crate::fingerprint::ArtifactFingerprint;
use forgejit_target::{Backend, ResolvedTarget};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Output of one compilation. Immutable once built; the cache owns it and
/// hands out `Arc`s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledArtifact {
    kernel_name: String,
    fingerprint: ArtifactFingerprint,
    target: ResolvedTarget,
    source: String,
    binary: Option<Vec<u8>>,
    outputs: Vec<usize>,
}

impl CompiledArtifact {
    pub fn new(
        kernel_name: impl Into<String>,
        fingerprint: ArtifactFingerprint,
        target: ResolvedTarget,
        source: String,
        binary: Option<Vec<u8>>,
        outputs: Vec<usize>,
    ) -> Self {
        Self {
            kernel_name: kernel_name.into(),
            fingerprint,
            target,
            source,
            binary,
            outputs,
        }
    }

    pub fn kernel_name(&self) -> &str {
        &self.kernel_name
    }

    pub fn fingerprint(&self) -> &ArtifactFingerprint {
        &self.fingerprint
    }

    pub fn target(&self) -> ResolvedTarget {
        self.target
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn binary(&self) -> Option<&[u8]> {
        self.binary.as_deref()
    }

    /// Parameter indices the runtime should treat as outputs.
    pub fn outputs(&self) -> &[usize] {
        &self.outputs
    }

    pub fn size_bytes(&self) -> usize {
        self.source.len() + self.binary.as_ref().map_or(0, Vec::len)
    }
}

/// The compiler backend rejected a kernel. The backend's error chain is kept
/// as-is and shared between every caller that waited on the attempt.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to compile `{kernel}` for {backend} [{}]: {cause:#}", .fingerprint.short())]
pub struct CompilationError {
    pub kernel: String,
    pub backend: Backend,
    pub fingerprint: ArtifactFingerprint,
    pub cause: Arc<anyhow::Error>,
}

impl CompilationError {
    pub fn new(
        kernel: impl Into<String>,
        backend: Backend,
        fingerprint: ArtifactFingerprint,
        cause: anyhow::Error,
    ) -> Self {
        Self {
            kernel: kernel.into(),
            backend,
            fingerprint,
            cause: Arc::new(cause),
        }
    }
}
