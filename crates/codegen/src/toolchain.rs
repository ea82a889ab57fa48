//! Native toolchains that turn emitted source into loadable binaries.

use anyhow::{bail, Context, Result};
use forgejit_target::Backend;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// External compilers used when a binary artifact is requested.
///
/// Defaults: `nvcc` for CUDA, `hipcc` for HIP, `xcrun` for Metal and `cc` for
/// the host backend. WebGPU consumes WGSL text directly and has no binary form.
#[derive(Debug, Clone, Default)]
pub struct Toolchain {
    overrides: BTreeMap<Backend, PathBuf>,
}

impl Toolchain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program<P: Into<PathBuf>>(mut self, backend: Backend, program: P) -> Self {
        self.overrides.insert(backend, program.into());
        self
    }

    pub fn program(&self, backend: Backend) -> Option<PathBuf> {
        if let Some(program) = self.overrides.get(&backend) {
            return Some(program.clone());
        }
        let default = match backend {
            Backend::Cuda => "nvcc",
            Backend::Hip => "hipcc",
            Backend::Metal => "xcrun",
            Backend::C => "cc",
            Backend::WebGpu => return None,
        };
        Some(PathBuf::from(default))
    }

    pub fn build(&self, backend: Backend, source: &str, arch: Option<&str>) -> Result<Vec<u8>> {
        let Some(program) = self.program(backend) else {
            bail!("{} kernels have no binary form; use the emitted source", backend);
        };

        let workdir = tempfile::tempdir().context("failed to create build directory")?;
        let (source_name, output_name) = match backend {
            Backend::Cuda => ("kernel.cu", "kernel.cubin"),
            Backend::Hip => ("kernel.hip", "kernel.hsaco"),
            Backend::Metal => ("kernel.metal", "kernel.air"),
            _ => ("kernel.c", "kernel.so"),
        };
        let source_path = workdir.path().join(source_name);
        let output_path = workdir.path().join(output_name);
        std::fs::write(&source_path, source)
            .with_context(|| format!("failed to write {}", source_path.display()))?;

        let args = build_args(backend, &source_path, &output_path, arch);
        debug!(
            backend = %backend,
            program = %program.display(),
            args = ?args,
            "invoking toolchain"
        );

        let output = match Command::new(&program).args(&args).output() {
            Ok(output) => output,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                bail!(
                    "{} toolchain `{}` not found on PATH",
                    backend,
                    program.display()
                );
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to run `{}`", program.display()));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                backend = %backend,
                status = ?output.status.code(),
                "toolchain reported failure"
            );
            bail!(
                "`{}` exited with {}: {}",
                program.display(),
                output.status,
                stderr.trim()
            );
        }

        std::fs::read(&output_path)
            .with_context(|| format!("toolchain produced no output at {}", output_path.display()))
    }
}

fn build_args(backend: Backend, source: &Path, output: &Path, arch: Option<&str>) -> Vec<String> {
    let source = source.display().to_string();
    let output = output.display().to_string();
    let mut args: Vec<String> = Vec::new();
    match backend {
        Backend::Cuda => {
            args.push("-cubin".into());
            if let Some(arch) = arch {
                args.push(format!("-arch={}", arch));
            }
        }
        Backend::Hip => {
            args.push("--genco".into());
            if let Some(arch) = arch {
                args.push(format!("--offload-arch={}", arch));
            }
        }
        Backend::Metal => {
            args.extend(["-sdk", "macosx", "metal", "-c"].map(String::from));
        }
        _ => {
            args.extend(["-O2", "-fPIC", "-shared"].map(String::from));
            if let Some(arch) = arch {
                args.push(format!("-march={}", arch));
            }
        }
    }
    args.push(source);
    args.push("-o".into());
    args.push(output);
    if backend == Backend::C {
        args.push("-lm".into());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cc_available() -> bool {
        Command::new("cc").arg("--version").output().is_ok()
    }

    #[test]
    fn missing_program_is_reported() {
        let toolchain =
            Toolchain::new().with_program(Backend::Cuda, "/nonexistent/forgejit-nvcc");
        let err = toolchain
            .build(Backend::Cuda, "__global__ void k() {}", None)
            .unwrap_err();
        assert!(err.to_string().contains("not found"), "{err:#}");
    }

    #[test]
    fn webgpu_has_no_binary_form() {
        let err = Toolchain::new()
            .build(Backend::WebGpu, "@compute fn main() {}", None)
            .unwrap_err();
        assert!(err.to_string().contains("no binary form"));
    }

    #[test]
    fn cuda_args_carry_arch() {
        let args = build_args(
            Backend::Cuda,
            Path::new("k.cu"),
            Path::new("k.cubin"),
            Some("sm_80"),
        );
        assert_eq!(args, vec!["-cubin", "-arch=sm_80", "k.cu", "-o", "k.cubin"]);
    }

    #[test]
    fn host_build_produces_shared_object() {
        if !cc_available() {
            return;
        }
        let source = "void scale(float* x, long n) { for (long i = 0; i < n; ++i) x[i] *= 2.0f; }\n";
        let binary = Toolchain::new().build(Backend::C, source, None).unwrap();
        assert!(!binary.is_empty());
    }
}
