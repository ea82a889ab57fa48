//! CLI wiring for the `forgejit` binary.

use crate::config::JitConfig;
use crate::jit::JitCompiler;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use forgejit_ir::{
    tensor, ActivationKind, BinaryKind, CompileOptions, DataType, KernelModule, ModuleBuilder,
};
use forgejit_target::{format_backends, HardwareProber, SystemProber, TargetSpec};
use std::fs;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "forgejit", about = "Resolve targets and emit device kernels")]
pub struct Cli {
    /// `auto` or a backend: cuda, hip, metal, webgpu, c.
    #[arg(long, global = true)]
    pub target: Option<TargetSpec>,

    /// Compile without consulting the hardware prober.
    #[arg(long, global = true)]
    pub skip_hardware_check: bool,

    /// Persist compiled artifacts in this directory.
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// JSON configuration file, applied before environment and flags.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the backends detected on this machine.
    Probe,
    /// Print the backend and hardware policy the current settings resolve to.
    Resolve,
    /// Compile a sample kernel and print or write its source.
    EmitSource {
        #[arg(long, value_enum, default_value = "add")]
        kernel: SampleKernel,
        #[arg(long, default_value_t = 1024)]
        size: usize,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also run the native toolchain and write the binary next to the
        /// source (requires --output).
        #[arg(long, default_value_t = false)]
        binary: bool,
        #[arg(long)]
        arch: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleKernel {
    Add,
    Mul,
    Matmul,
    Layernorm,
}

impl Cli {
    /// File, then environment, then command-line flags.
    pub fn jit_config(&self) -> Result<JitConfig> {
        let mut config = JitConfig::load(self.config.as_deref())?;
        if let Some(target) = self.target {
            config.target = target;
        }
        if self.skip_hardware_check {
            config.skip_hardware_check = true;
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = Some(dir.clone());
        }
        Ok(config)
    }
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let config = cli.jit_config()?;

    match cli.command {
        Command::Probe => {
            let detected = SystemProber::new().probe()?;
            println!("{}", format_backends(&detected));
        }
        Command::Resolve => {
            let jit = JitCompiler::from_config(config.clone());
            let resolved = jit
                .resolver()
                .resolve(config.target, config.skip_hardware_check)?;
            info!(requested = %config.target, resolved = %resolved, "target resolved");
            println!("{} {}", resolved.backend, resolved.policy);
        }
        Command::EmitSource {
            kernel,
            size,
            output,
            binary,
            arch,
        } => {
            let jit = JitCompiler::from_config(config);
            let mut options = CompileOptions::default().with_binary(binary);
            if let Some(arch) = arch {
                options = options.with_arch(arch);
            }
            let handle = jit.jit(sample_module(kernel, size), options);
            let source = handle.source()?;

            match output {
                Some(path) => {
                    fs::write(&path, source)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    info!(path = %path.display(), bytes = source.len(), "wrote kernel source");
                    if let Some(blob) = handle.binary()? {
                        let bin_path = path.with_extension("bin");
                        fs::write(&bin_path, blob)
                            .with_context(|| format!("failed to write {}", bin_path.display()))?;
                        info!(path = %bin_path.display(), bytes = blob.len(), "wrote kernel binary");
                    }
                }
                None => print!("{}", source),
            }

            if let (Some(target), Some(fingerprint)) =
                (handle.resolved_target(), handle.fingerprint())
            {
                info!(target = %target, fingerprint = %fingerprint, "kernel compiled");
            }
        }
    }
    Ok(())
}

/// Reference kernels for smoke-testing a target.
pub fn sample_module(kernel: SampleKernel, size: usize) -> KernelModule {
    let size = size.max(1);
    let tensor_f32 = |name: &str, dims: &[usize]| tensor(name, dims, DataType::F32);

    match kernel {
        SampleKernel::Add | SampleKernel::Mul => {
            let (name, kind) = if kernel == SampleKernel::Add {
                ("vector_add", BinaryKind::Add)
            } else {
                ("vector_mul", BinaryKind::Mul)
            };
            ModuleBuilder::new(name)
                .add_elementwise(
                    "main",
                    kind,
                    tensor_f32("a", &[size]),
                    tensor_f32("b", &[size]),
                    tensor_f32("c", &[size]),
                )
                .build()
        }
        SampleKernel::Matmul => ModuleBuilder::new("matmul")
            .add_matmul(
                "main",
                tensor_f32("a", &[size, size]),
                tensor_f32("b", &[size, size]),
                tensor_f32("c", &[size, size]),
                None,
                ActivationKind::None,
            )
            .build(),
        SampleKernel::Layernorm => ModuleBuilder::new("layernorm")
            .add_layer_norm(
                "main",
                tensor_f32("x", &[size, size]),
                1e-5,
                tensor_f32("y", &[size, size]),
            )
            .build(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgejit_target::Backend;

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "forgejit",
            "emit-source",
            "--kernel",
            "matmul",
            "--target",
            "cuda",
            "--skip-hardware-check",
        ])
        .unwrap();
        assert_eq!(cli.target, Some(TargetSpec::Explicit(Backend::Cuda)));
        assert!(cli.skip_hardware_check);
        assert!(matches!(
            cli.command,
            Command::EmitSource {
                kernel: SampleKernel::Matmul,
                size: 1024,
                ..
            }
        ));
    }

    #[test]
    fn unknown_targets_are_rejected_by_the_parser() {
        assert!(Cli::try_parse_from(["forgejit", "--target", "tpu", "resolve"]).is_err());
    }

    #[test]
    fn sample_modules_lower_cleanly() -> anyhow::Result<()> {
        for kernel in [
            SampleKernel::Add,
            SampleKernel::Mul,
            SampleKernel::Matmul,
            SampleKernel::Layernorm,
        ] {
            let module = sample_module(kernel, 32);
            forgejit_ir::LoweredKernel::lower(&module, Backend::C, &CompileOptions::default())?;
        }
        Ok(())
    }
}
