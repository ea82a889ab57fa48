//! Compiled-artifact caching for ForgeJIT.
//!
//! Artifacts are keyed by an [`ArtifactFingerprint`] over the kernel
//! identity, the compile options and the resolved target. The
//! [`ArtifactCache`] runs the compile closure at most once per fingerprint,
//! no matter how many threads ask for it at the same time.

pub mod artifact;
pub mod cache;
pub mod disk;
pub mod fingerprint;

pub use artifact::*;
pub use cache::*;
pub use disk::*;
pub use fingerprint::*;
