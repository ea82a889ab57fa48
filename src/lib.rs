//! ForgeJIT facade.
//!
//! Re-exports the workspace crates so callers can depend on a single package.

pub use forgejit_cache as cache;
pub use forgejit_codegen as codegen;
pub use forgejit_compiler as compiler;
pub use forgejit_ir as ir;
pub use forgejit_target as target;

pub use forgejit_compiler::{CompileOptions, JitCompiler, JitConfig, JitError, JitHandle};
pub use forgejit_target::{Backend, HardwarePolicy, ResolvedTarget, TargetSpec};
