//! Lazily compiled kernel handles.

use crate::error::JitError;
use crate::executor::{KernelArg, KernelExecutor};
use crate::pipeline::CompilerPipeline;
use forgejit_cache::{ArtifactCache, ArtifactFingerprint, CompilationError, CompiledArtifact};
use forgejit_ir::{CompileOptions, KernelIdentity, KernelModule};
use forgejit_target::{HardwarePolicy, ResolvedTarget, TargetResolver, TargetSpec};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{debug, info, warn};

/// Where a handle is in its lifecycle.
#[derive(Debug, Clone)]
pub enum HandleState {
    Uninitialized,
    Compiled,
    /// The latest attempt failed. The next request tries again.
    Failed(JitError),
}

impl HandleState {
    pub fn is_compiled(&self) -> bool {
        matches!(self, HandleState::Compiled)
    }
}

/// A kernel module bound to a target policy and compile options.
///
/// Nothing is resolved or compiled until the first call to
/// [`source`](Self::source), [`binary`](Self::binary),
/// [`invoke`](Self::invoke) or [`compile`](Self::compile). Once compiled the
/// handle keeps its artifact for the rest of its life. Handles are
/// `Send + Sync`; concurrent first calls compile once through the cache.
pub struct JitHandle {
    module: KernelModule,
    identity: KernelIdentity,
    options: CompileOptions,
    requested: TargetSpec,
    skip_hardware_check: bool,
    resolver: TargetResolver,
    pipeline: CompilerPipeline,
    cache: Arc<ArtifactCache>,
    executor: Option<Arc<dyn KernelExecutor>>,
    compiled: OnceLock<Arc<CompiledArtifact>>,
    last_failure: Mutex<Option<JitError>>,
}

impl JitHandle {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        module: KernelModule,
        options: CompileOptions,
        requested: TargetSpec,
        skip_hardware_check: bool,
        resolver: TargetResolver,
        pipeline: CompilerPipeline,
        cache: Arc<ArtifactCache>,
        executor: Option<Arc<dyn KernelExecutor>>,
    ) -> Self {
        let identity = module.identity();
        Self {
            module,
            identity,
            options,
            requested,
            skip_hardware_check,
            resolver,
            pipeline,
            cache,
            executor,
            compiled: OnceLock::new(),
            last_failure: Mutex::new(None),
        }
    }

    pub fn kernel_name(&self) -> &str {
        &self.module.name
    }

    pub fn module(&self) -> &KernelModule {
        &self.module
    }

    pub fn identity(&self) -> KernelIdentity {
        self.identity
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn requested_target(&self) -> TargetSpec {
        self.requested
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    pub fn state(&self) -> HandleState {
        if self.compiled.get().is_some() {
            return HandleState::Compiled;
        }
        match self.failure_slot().as_ref() {
            Some(err) => HandleState::Failed(err.clone()),
            None => HandleState::Uninitialized,
        }
    }

    /// The resolved target, once compiled.
    pub fn resolved_target(&self) -> Option<ResolvedTarget> {
        self.compiled.get().map(|artifact| artifact.target())
    }

    /// The artifact fingerprint, once compiled.
    pub fn fingerprint(&self) -> Option<ArtifactFingerprint> {
        self.compiled.get().map(|artifact| *artifact.fingerprint())
    }

    /// Compiles if needed and returns the artifact.
    pub fn compile(&self) -> Result<Arc<CompiledArtifact>, JitError> {
        self.ensure_compiled().map(Arc::clone)
    }

    /// Generated device source. Compiles on first use.
    pub fn source(&self) -> Result<&str, JitError> {
        Ok(self.ensure_compiled()?.source())
    }

    /// Toolchain output, if the options asked for one. Compiles on first use.
    pub fn binary(&self) -> Result<Option<&[u8]>, JitError> {
        Ok(self.ensure_compiled()?.binary())
    }

    /// Runs the kernel through the attached executor.
    ///
    /// Artifacts resolved with the hardware check bypassed are never
    /// launched; they fail with [`JitError::ExecutionUnavailable`].
    pub fn invoke(&self, args: &mut [KernelArg]) -> Result<(), JitError> {
        let artifact = self.ensure_compiled()?;
        let target = artifact.target();
        if target.policy == HardwarePolicy::Bypassed {
            return Err(JitError::ExecutionUnavailable {
                backend: target.backend,
                fingerprint: *artifact.fingerprint(),
            });
        }
        let Some(executor) = &self.executor else {
            return Err(JitError::NoExecutor {
                backend: target.backend,
            });
        };
        executor
            .launch(artifact, args)
            .map_err(|cause| JitError::Launch {
                kernel: artifact.kernel_name().to_string(),
                cause: Arc::new(cause),
            })
    }

    fn ensure_compiled(&self) -> Result<&Arc<CompiledArtifact>, JitError> {
        if let Some(artifact) = self.compiled.get() {
            return Ok(artifact);
        }
        match self.attempt() {
            Ok(artifact) => {
                *self.failure_slot() = None;
                Ok(self.compiled.get_or_init(|| artifact))
            }
            Err(err) => {
                *self.failure_slot() = Some(err.clone());
                Err(err)
            }
        }
    }

    fn attempt(&self) -> Result<Arc<CompiledArtifact>, JitError> {
        let target = self
            .resolver
            .resolve(self.requested, self.skip_hardware_check)?;
        let fingerprint = ArtifactFingerprint::compute(&self.identity, &self.options, &target);
        debug!(
            kernel = %self.module.name,
            target = %target,
            fingerprint = %fingerprint.short(),
            "compiling kernel"
        );

        let artifact = self.cache.get_or_compile(&fingerprint, || {
            self.pipeline
                .compile(&self.module, &self.options, target, fingerprint)
                .map_err(|cause| {
                    CompilationError::new(
                        self.module.name.clone(),
                        target.backend,
                        fingerprint,
                        cause,
                    )
                })
        });

        match &artifact {
            Ok(artifact) => info!(
                kernel = %self.module.name,
                target = %target,
                fingerprint = %fingerprint.short(),
                bytes = artifact.size_bytes(),
                "kernel ready"
            ),
            Err(err) => warn!(kernel = %self.module.name, error = %err, "kernel compilation failed"),
        }
        Ok(artifact?)
    }

    fn failure_slot(&self) -> std::sync::MutexGuard<'_, Option<JitError>> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for JitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitHandle")
            .field("kernel", &self.module.name)
            .field("requested", &self.requested)
            .field("skip_hardware_check", &self.skip_hardware_check)
            .field("state", &self.state())
            .finish()
    }
}
