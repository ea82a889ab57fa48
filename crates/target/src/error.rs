//! Target resolution errors.

use crate::backend::{format_backends, Backend};
use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// The hardware query itself failed. Distinct from "nothing found", which is
/// an empty probe result.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to query {} while probing for {backend}", .path.display())]
pub struct ProbeError {
    pub backend: Backend,
    pub path: PathBuf,
    #[source]
    pub source: Arc<io::Error>,
}

impl ProbeError {
    pub fn new(backend: Backend, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            backend,
            path: path.into(),
            source: Arc::new(source),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TargetError {
    #[error("unknown target `{name}`; expected auto, cuda, hip, metal, webgpu or c")]
    UnknownBackend { name: String },

    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// An explicit target was requested in checked mode but not detected.
    #[error(
        "target `{requested}` requested but no matching hardware was detected (detected: {})",
        format_backends(.detected)
    )]
    NoHardware {
        requested: Backend,
        detected: BTreeSet<Backend>,
    },

    /// `auto` was requested in checked mode and no accelerator was detected.
    #[error(
        "no accelerator backend detected for target `auto` (detected: {}); \
         pass an explicit target with the hardware check skipped to compile anyway",
        format_backends(.detected)
    )]
    NoHardwareDetected { detected: BTreeSet<Backend> },
}
