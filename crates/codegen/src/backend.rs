//! Compiler backend interface.

use crate::toolchain::Toolchain;
use crate::{clike, wgsl};
use anyhow::{ensure, Result};
use forgejit_ir::{CompileOptions, LoweredKernel, TensorSpec};
use forgejit_target::Backend;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerOutput {
    pub source: String,
    pub binary: Option<Vec<u8>>,
}

/// Turns a lowered kernel into source text and, optionally, a binary.
///
/// Errors are backend-defined and passed through to the caller untouched.
pub trait CompilerBackend: Send + Sync {
    fn name(&self) -> &str;

    fn compile(
        &self,
        kernel: &LoweredKernel,
        target: Backend,
        options: &CompileOptions,
    ) -> Result<CompilerOutput>;
}

/// Emits device source directly from the lowered operations.
#[derive(Debug, Clone, Default)]
pub struct SourceBackend {
    toolchain: Toolchain,
}

impl SourceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_toolchain(toolchain: Toolchain) -> Self {
        Self { toolchain }
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    pub fn emit_source(
        &self,
        kernel: &LoweredKernel,
        target: Backend,
        options: &CompileOptions,
    ) -> Result<String> {
        ensure!(
            kernel.backend == target,
            "kernel `{}` was lowered for {} but compiled for {}",
            kernel.name,
            kernel.backend,
            target
        );
        ensure!(options.threads > 0, "threads per block must be positive");
        match target {
            Backend::WebGpu => wgsl::emit(kernel, options),
            Backend::Cuda => clike::emit(kernel, clike::Dialect::Cuda, options),
            Backend::Hip => clike::emit(kernel, clike::Dialect::Hip, options),
            Backend::Metal => clike::emit(kernel, clike::Dialect::Metal, options),
            Backend::C => clike::emit(kernel, clike::Dialect::Host, options),
        }
    }
}

impl CompilerBackend for SourceBackend {
    fn name(&self) -> &str {
        "source"
    }

    fn compile(
        &self,
        kernel: &LoweredKernel,
        target: Backend,
        options: &CompileOptions,
    ) -> Result<CompilerOutput> {
        let source = self.emit_source(kernel, target, options)?;
        debug!(
            kernel = %kernel.name,
            backend = %target,
            bytes = source.len(),
            "emitted kernel source"
        );
        let binary = if options.emit_binary {
            Some(
                self.toolchain
                    .build(target, &source, options.arch.as_deref())?,
            )
        } else {
            None
        };
        Ok(CompilerOutput { source, binary })
    }
}

/// Element count of `tensor`, or an error when it overflows `usize`.
pub(crate) fn element_count(tensor: &TensorSpec) -> Result<usize> {
    tensor.numel().ok_or_else(|| {
        anyhow::anyhow!(
            "element count of `{}` {:?} overflows",
            tensor.name,
            tensor.shape
        )
    })
}

/// Symbol name for one operation of a kernel.
pub(crate) fn entry_name(kernel: &str, op: &str) -> String {
    let raw = format!("{}_{}", kernel, op);
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}
