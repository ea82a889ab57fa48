//! Hardware probing.
//!
//! Accelerator discovery reads driver device nodes rather than linking vendor
//! runtimes, so probing works (and reports nothing) on machines without any
//! vendor software installed.

use crate::backend::Backend;
use crate::error::ProbeError;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Queries the local machine for usable backends.
///
/// An empty set means "no hardware", not failure. Implementations must not
/// mutate program state.
pub trait HardwareProber: Send + Sync {
    fn probe(&self) -> Result<BTreeSet<Backend>, ProbeError>;
}

impl<P: HardwareProber + ?Sized> HardwareProber for Arc<P> {
    fn probe(&self) -> Result<BTreeSet<Backend>, ProbeError> {
        (**self).probe()
    }
}

const NVIDIA_CONTROL_NODE: &str = "dev/nvidiactl";
const NVIDIA_PROC_GPUS: &str = "proc/driver/nvidia/gpus";
const ROCM_KFD_NODE: &str = "dev/kfd";

/// Probes the running system through device nodes and platform APIs.
#[derive(Debug, Clone)]
pub struct SystemProber {
    root: PathBuf,
    platform_apis: bool,
}

impl SystemProber {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/"),
            platform_apis: true,
        }
    }

    /// Probes device nodes below `root` instead of `/`. Platform API checks
    /// (Metal, wgpu adapters) are disabled so results depend only on the
    /// directory contents.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            platform_apis: false,
        }
    }

    fn path_exists(&self, backend: Backend, relative: &str) -> Result<bool, ProbeError> {
        let path = self.root.join(relative);
        path.try_exists()
            .map_err(|source| ProbeError::new(backend, path.clone(), source))
    }

    fn dir_has_entries(&self, backend: Backend, relative: &str) -> Result<bool, ProbeError> {
        let path = self.root.join(relative);
        match fs::read_dir(&path) {
            Ok(mut entries) => Ok(entries.next().is_some()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(ProbeError::new(backend, path, err)),
        }
    }

    fn cuda_present(&self) -> Result<bool, ProbeError> {
        Ok(self.path_exists(Backend::Cuda, NVIDIA_CONTROL_NODE)?
            || self.dir_has_entries(Backend::Cuda, NVIDIA_PROC_GPUS)?)
    }

    fn hip_present(&self) -> Result<bool, ProbeError> {
        self.path_exists(Backend::Hip, ROCM_KFD_NODE)
    }

    fn metal_present(&self) -> bool {
        self.platform_apis && cfg!(target_os = "macos")
    }

    #[cfg(feature = "wgpu")]
    fn webgpu_present(&self) -> bool {
        if !self.platform_apis {
            return false;
        }
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        instance
            .enumerate_adapters(wgpu::Backends::all())
            .into_iter()
            .any(|adapter| adapter.get_info().device_type != wgpu::DeviceType::Cpu)
    }

    #[cfg(not(feature = "wgpu"))]
    fn webgpu_present(&self) -> bool {
        false
    }
}

impl Default for SystemProber {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareProber for SystemProber {
    fn probe(&self) -> Result<BTreeSet<Backend>, ProbeError> {
        let mut detected = BTreeSet::new();
        detected.insert(Backend::C);
        if self.cuda_present()? {
            detected.insert(Backend::Cuda);
        }
        if self.hip_present()? {
            detected.insert(Backend::Hip);
        }
        if self.metal_present() {
            detected.insert(Backend::Metal);
        }
        if self.webgpu_present() {
            detected.insert(Backend::WebGpu);
        }
        debug!(root = %self.root.display(), detected = ?detected, "hardware probe finished");
        Ok(detected)
    }
}

/// Reports a fixed backend set. Useful for pinning resolution in tests and
/// for machines whose inventory is known ahead of time.
#[derive(Debug, Clone, Default)]
pub struct FixedProber {
    backends: BTreeSet<Backend>,
}

impl FixedProber {
    pub fn new(backends: impl IntoIterator<Item = Backend>) -> Self {
        Self {
            backends: backends.into_iter().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl HardwareProber for FixedProber {
    fn probe(&self) -> Result<BTreeSet<Backend>, ProbeError> {
        Ok(self.backends.clone())
    }
}
