//! ForgeJIT kernel description IR.

pub mod builder;
pub mod dialect;
pub mod lowering;
pub mod options;
pub mod passes;

pub use builder::*;
pub use dialect::*;
pub use lowering::*;
pub use options::*;
pub use passes::*;
