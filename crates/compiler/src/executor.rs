//! Launch interface for compiled artifacts.

use anyhow::Result;
use forgejit_cache::CompiledArtifact;

/// One kernel argument, in parameter order.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelArg {
    F32(Vec<f32>),
    /// Raw half or bfloat16 bits.
    U16(Vec<u16>),
    I32(Vec<i32>),
    Bytes(Vec<u8>),
}

impl KernelArg {
    pub fn len(&self) -> usize {
        match self {
            KernelArg::F32(v) => v.len(),
            KernelArg::U16(v) => v.len(),
            KernelArg::I32(v) => v.len(),
            KernelArg::Bytes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            KernelArg::F32(v) => Some(v),
            _ => None,
        }
    }
}

/// Runs a compiled artifact on a device. Only called for artifacts whose
/// target was resolved with the hardware check in place.
///
/// Output buffers are written in place; `artifact.outputs()` lists which
/// arguments those are.
pub trait KernelExecutor: Send + Sync {
    fn launch(&self, artifact: &CompiledArtifact, args: &mut [KernelArg]) -> Result<()>;
}
