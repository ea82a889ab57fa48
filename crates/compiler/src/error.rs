//! Errors surfaced by JIT handles.

use forgejit_cache::{ArtifactFingerprint, CompilationError};
use forgejit_target::{Backend, TargetError};
use std::sync::Arc;

#[derive(Debug, Clone, thiserror::Error)]
pub enum JitError {
    #[error(transparent)]
    Target(#[from] TargetError),

    #[error(transparent)]
    Compilation(#[from] CompilationError),

    /// The artifact was built with the hardware check bypassed, so there is no
    /// evidence the device exists. Source and binary remain available.
    #[error(
        "kernel compiled for {backend} with the hardware check bypassed [{}]; \
         only source and binary inspection are available",
        .fingerprint.short()
    )]
    ExecutionUnavailable {
        backend: Backend,
        fingerprint: ArtifactFingerprint,
    },

    #[error("no kernel executor attached for {backend}")]
    NoExecutor { backend: Backend },

    #[error("launch of `{kernel}` failed: {cause:#}")]
    Launch {
        kernel: String,
        cause: Arc<anyhow::Error>,
    },
}

impl JitError {
    /// True when the failure came from resolving the target rather than from
    /// compiling or running the kernel.
    pub fn is_target_error(&self) -> bool {
        matches!(self, JitError::Target(_))
    }
}
