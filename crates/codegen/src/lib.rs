//! Code generation for ForgeJIT.
//!
//! [`CompilerBackend`] is the seam the JIT drives. [`SourceBackend`] is the
//! reference implementation: it emits one device entry point per lowered
//! operation and can optionally hand the source to the vendor toolchain for
//! a binary.

pub mod backend;
pub mod clike;
pub mod toolchain;
pub mod wgsl;

pub use backend::*;
pub use toolchain::*;
