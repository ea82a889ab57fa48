//! Lowering plus code generation for one resolved target.

use anyhow::Result;
use forgejit_cache::{ArtifactFingerprint, CompiledArtifact};
use forgejit_codegen::CompilerBackend;
use forgejit_ir::{CompileOptions, KernelModule, LoweredKernel};
use forgejit_target::ResolvedTarget;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct CompilerPipeline {
    backend: Arc<dyn CompilerBackend>,
}

impl CompilerPipeline {
    pub fn new(backend: Arc<dyn CompilerBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &dyn CompilerBackend {
        self.backend.as_ref()
    }

    /// Lowers `module` for `target` and runs the backend. Errors from the
    /// passes and the backend come back untouched.
    pub fn compile(
        &self,
        module: &KernelModule,
        options: &CompileOptions,
        target: ResolvedTarget,
        fingerprint: ArtifactFingerprint,
    ) -> Result<CompiledArtifact> {
        let lowered = LoweredKernel::lower(module, target.backend, options)?;
        let output = self.backend.compile(&lowered, target.backend, options)?;
        debug!(
            kernel = %module.name,
            backend = %target.backend,
            compiler = self.backend.name(),
            source_bytes = output.source.len(),
            binary_bytes = output.binary.as_ref().map(Vec::len),
            "pipeline produced artifact"
        );
        Ok(CompiledArtifact::new(
            lowered.name,
            fingerprint,
            target,
            output.source,
            output.binary,
            lowered.outputs,
        ))
    }
}
