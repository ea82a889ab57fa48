use anyhow::Result;
use forgejit::cache::ArtifactCache;
use forgejit::ir::{tensor, ActivationKind, BinaryKind, DataType, KernelModule, ModuleBuilder};
use forgejit::target::{SystemProber, TargetError};
use forgejit::{
    Backend, CompileOptions, HardwarePolicy, JitCompiler, JitError, ResolvedTarget, TargetSpec,
};
use std::sync::Arc;

fn mlp_block(name: &str) -> KernelModule {
    ModuleBuilder::new(name)
        .add_matmul(
            "up",
            tensor("x", &[8, 16], DataType::F32),
            tensor("w", &[16, 32], DataType::F32),
            tensor("h", &[8, 32], DataType::F32),
            Some(tensor("bias", &[32], DataType::F32)),
            ActivationKind::Relu,
        )
        .add_elementwise(
            "residual",
            BinaryKind::Add,
            tensor("h", &[8, 32], DataType::F32),
            tensor("skip", &[8, 32], DataType::F32),
            tensor("r", &[8, 32], DataType::F32),
        )
        .add_layer_norm(
            "norm",
            tensor("r", &[8, 32], DataType::F32),
            1e-5,
            tensor("y", &[8, 32], DataType::F32),
        )
        .build()
}

fn bypassing(target: Backend) -> JitCompiler {
    JitCompiler::new()
        .with_cache(Arc::new(ArtifactCache::new()))
        .with_target(TargetSpec::Explicit(target))
        .skip_hardware_check(true)
}

#[test]
fn every_backend_compiles_without_hardware() -> Result<()> {
    let markers = [
        (Backend::Cuda, "__global__"),
        (Backend::Hip, "hip_runtime.h"),
        (Backend::Metal, "kernel void"),
        (Backend::WebGpu, "@compute"),
        (Backend::C, "#include <math.h>"),
    ];
    for (backend, marker) in markers {
        let handle = bypassing(backend).jit(mlp_block("mlp"), CompileOptions::default());
        let source = handle.source()?;
        assert!(source.contains(marker), "{backend}: missing `{marker}`");
        assert!(source.contains("mlp_up"), "{backend}: missing entry point");
        assert_eq!(
            handle.resolved_target(),
            Some(ResolvedTarget::bypassed(backend))
        );
    }
    Ok(())
}

#[test]
fn auto_with_bypass_defaults_to_cuda() -> Result<()> {
    let handle = JitCompiler::new()
        .with_cache(Arc::new(ArtifactCache::new()))
        .skip_hardware_check(true)
        .jit(mlp_block("mlp"), CompileOptions::default());
    assert!(handle.source()?.contains("__global__"));
    assert_eq!(
        handle.resolved_target().map(|t| (t.backend, t.policy)),
        Some((Backend::Cuda, HardwarePolicy::Bypassed))
    );
    Ok(())
}

#[test]
fn logically_identical_kernels_share_a_fingerprint() -> Result<()> {
    let jit = bypassing(Backend::Cuda);
    let a = jit.jit(mlp_block("mlp"), CompileOptions::default());
    let b = jit.jit(mlp_block("mlp"), CompileOptions::default());
    let renamed = jit.jit(mlp_block("mlp2"), CompileOptions::default());
    a.compile()?;
    b.compile()?;
    renamed.compile()?;
    assert_eq!(a.identity(), b.identity());
    assert_eq!(a.fingerprint(), b.fingerprint());
    assert_ne!(a.fingerprint(), renamed.fingerprint());
    Ok(())
}

#[test]
fn out_idx_is_normalized_into_the_artifact() -> Result<()> {
    let handle = bypassing(Backend::C).jit(
        mlp_block("mlp"),
        CompileOptions::default().with_out_idx(vec![-1, 3]),
    );
    let artifact = handle.compile()?;
    // x, w, bias, h, skip, r, y
    assert_eq!(artifact.outputs(), &[6, 3]);

    let out_of_range = bypassing(Backend::C).jit(
        mlp_block("mlp"),
        CompileOptions::default().with_out_idx(vec![7]),
    );
    assert!(matches!(
        out_of_range.compile(),
        Err(JitError::Compilation(_))
    ));
    Ok(())
}

#[test]
fn probed_device_nodes_allow_checked_compilation() -> Result<()> {
    let root = tempfile::tempdir()?;
    std::fs::create_dir_all(root.path().join("dev"))?;
    std::fs::write(root.path().join("dev/kfd"), b"")?;

    let jit = JitCompiler::new()
        .with_cache(Arc::new(ArtifactCache::new()))
        .with_prober(Arc::new(SystemProber::with_root(root.path())));

    let auto = jit.jit(mlp_block("mlp"), CompileOptions::default());
    auto.compile()?;
    assert_eq!(
        auto.resolved_target(),
        Some(ResolvedTarget::checked(Backend::Hip))
    );

    let cuda = jit
        .clone()
        .with_target(TargetSpec::Explicit(Backend::Cuda))
        .jit(mlp_block("mlp"), CompileOptions::default());
    assert!(matches!(
        cuda.source(),
        Err(JitError::Target(TargetError::NoHardware { .. }))
    ));
    Ok(())
}

#[test]
fn global_cache_is_shared_between_compilers() -> Result<()> {
    let module = mlp_block("global_cache_probe");
    let options = CompileOptions::default().with_threads(64);
    let first = JitCompiler::new()
        .with_target(TargetSpec::Explicit(Backend::Metal))
        .skip_hardware_check(true)
        .jit(module.clone(), options.clone());
    let second = JitCompiler::new()
        .with_target(TargetSpec::Explicit(Backend::Metal))
        .skip_hardware_check(true)
        .jit(module, options);

    assert!(Arc::ptr_eq(&first.compile()?, &second.compile()?));
    assert!(Arc::ptr_eq(first.cache(), &ArtifactCache::global()));
    Ok(())
}
