//! Entry point for wrapping kernel modules into lazily compiled handles.

use crate::config::JitConfig;
use crate::error::JitError;
use crate::executor::KernelExecutor;
use crate::handle::JitHandle;
use crate::pipeline::CompilerPipeline;
use forgejit_cache::ArtifactCache;
use forgejit_codegen::{CompilerBackend, SourceBackend};
use forgejit_ir::{CompileOptions, KernelModule};
use forgejit_target::{HardwareProber, SystemProber, TargetResolver, TargetSpec};
use std::sync::Arc;
use tracing::debug;

/// Where handles get their artifact cache from.
#[derive(Clone)]
enum CacheMode {
    Shared(Arc<ArtifactCache>),
    /// Every handle gets a fresh cache of its own.
    Private,
}

/// Builds [`JitHandle`]s that share one target policy, compiler backend and
/// artifact cache.
///
/// ```no_run
/// use forgejit_compiler::JitCompiler;
/// use forgejit_ir::{tensor, BinaryKind, CompileOptions, DataType, ModuleBuilder};
/// use forgejit_target::{Backend, TargetSpec};
///
/// let module = ModuleBuilder::new("vadd")
///     .add_elementwise(
///         "add",
///         BinaryKind::Add,
///         tensor("a", &[1024], DataType::F32),
///         tensor("b", &[1024], DataType::F32),
///         tensor("c", &[1024], DataType::F32),
///     )
///     .build();
/// let jit = JitCompiler::new()
///     .with_target(TargetSpec::Explicit(Backend::Cuda))
///     .skip_hardware_check(true);
/// let kernel = jit.jit(module, CompileOptions::default());
/// println!("{}", kernel.source()?);
/// # Ok::<(), forgejit_compiler::JitError>(())
/// ```
#[derive(Clone)]
pub struct JitCompiler {
    config: JitConfig,
    cache: CacheMode,
    pipeline: CompilerPipeline,
    prober: Arc<dyn HardwareProber>,
    executor: Option<Arc<dyn KernelExecutor>>,
}

impl Default for JitCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl JitCompiler {
    /// Source backend, system prober, process-wide cache, `auto` target.
    pub fn new() -> Self {
        Self {
            config: JitConfig::default(),
            cache: CacheMode::Shared(ArtifactCache::global()),
            pipeline: CompilerPipeline::new(Arc::new(SourceBackend::new())),
            prober: Arc::new(SystemProber::new()),
            executor: None,
        }
    }

    /// Applies target policy and cache placement from `config`. A configured
    /// cache directory gets its own persistent cache instead of the global
    /// one.
    pub fn from_config(config: JitConfig) -> Self {
        let cache = if config.disable_cache {
            CacheMode::Private
        } else if let Some(dir) = &config.cache_dir {
            CacheMode::Shared(Arc::new(ArtifactCache::persistent(dir.clone())))
        } else {
            CacheMode::Shared(ArtifactCache::global())
        };
        Self {
            config,
            cache,
            ..Self::new()
        }
    }

    pub fn with_target(mut self, target: TargetSpec) -> Self {
        self.config.target = target;
        self
    }

    pub fn skip_hardware_check(mut self, skip: bool) -> Self {
        self.config.skip_hardware_check = skip;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ArtifactCache>) -> Self {
        self.cache = CacheMode::Shared(cache);
        self
    }

    pub fn with_private_caches(mut self) -> Self {
        self.cache = CacheMode::Private;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn CompilerBackend>) -> Self {
        self.pipeline = CompilerPipeline::new(backend);
        self
    }

    pub fn with_prober(mut self, prober: Arc<dyn HardwareProber>) -> Self {
        self.prober = prober;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn KernelExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// The shared cache, or `None` when handles get private caches.
    pub fn cache(&self) -> Option<&Arc<ArtifactCache>> {
        match &self.cache {
            CacheMode::Shared(cache) => Some(cache),
            CacheMode::Private => None,
        }
    }

    pub fn resolver(&self) -> TargetResolver {
        TargetResolver::new(Arc::clone(&self.prober))
    }

    /// Wraps `module` without compiling it. Compilation happens on the first
    /// source request, invocation or explicit [`JitHandle::compile`].
    pub fn jit(&self, module: KernelModule, options: CompileOptions) -> JitHandle {
        let options = self.config.apply_flags(options);
        let cache = match &self.cache {
            CacheMode::Shared(cache) => Arc::clone(cache),
            CacheMode::Private => Arc::new(ArtifactCache::new()),
        };
        debug!(
            kernel = %module.name,
            target = %self.config.target,
            skip_hardware_check = self.config.skip_hardware_check,
            "created jit handle"
        );
        JitHandle::new(
            module,
            options,
            self.config.target,
            self.config.skip_hardware_check,
            self.resolver(),
            self.pipeline.clone(),
            cache,
            self.executor.clone(),
        )
    }

    /// Wraps `module` and compiles it immediately.
    pub fn compile(
        &self,
        module: KernelModule,
        options: CompileOptions,
    ) -> Result<JitHandle, JitError> {
        let handle = self.jit(module, options);
        handle.compile()?;
        Ok(handle)
    }
}
