//! ForgeJIT orchestrator: resolves targets, fingerprints compilations and
//! hands out lazily compiled kernel handles.

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod handle;
pub mod jit;
pub mod pipeline;

#[cfg(feature = "cli")]
pub use cli::*;
pub use config::*;
pub use error::*;
pub use executor::*;
pub use handle::*;
pub use jit::*;
pub use pipeline::*;

pub use forgejit_ir::CompileOptions;
