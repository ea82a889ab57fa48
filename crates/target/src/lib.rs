//! Target selection for ForgeJIT.
//!
//! A kernel asks for a [`TargetSpec`] (either `auto` or an explicit backend).
//! The [`TargetResolver`] turns that request into a [`ResolvedTarget`],
//! consulting a [`HardwareProber`] unless the hardware check is bypassed.
//!
//! ```text
//! TargetSpec ──┐
//! bypass flag ─┼──▶ TargetResolver ──▶ ResolvedTarget(backend, Checked|Bypassed)
//! probe() ─────┘    (skipped when bypassed)
//! ```

pub mod backend;
pub mod error;
pub mod probe;
pub mod resolver;
pub mod spec;

pub use backend::*;
pub use error::*;
pub use probe::*;
pub use resolver::*;
pub use spec::*;
