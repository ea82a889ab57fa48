//! Compile options shared by lowering, code generation and fingerprinting.

use crate::passes::{PassFlag, PassFlags};
use serde::{Deserialize, Serialize};

/// Immutable compile-time configuration. Field values fully determine the
/// bytes fed into the artifact fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompileOptions {
    /// Output parameter selection. Negative indices count from the last
    /// parameter; empty selects the last parameter.
    pub out_idx: Vec<i64>,
    pub pass_flags: PassFlags,
    /// Threads per block (workgroup size on WGSL, threadgroup size on Metal).
    pub threads: u32,
    /// Device architecture handed to the toolchain, e.g. `sm_80` or `gfx90a`.
    pub arch: Option<String>,
    /// Run the external toolchain and keep the resulting binary.
    pub emit_binary: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            out_idx: Vec::new(),
            pass_flags: PassFlags::new(),
            threads: 256,
            arch: None,
            emit_binary: false,
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_out_idx(mut self, out_idx: impl Into<Vec<i64>>) -> Self {
        self.out_idx = out_idx.into();
        self
    }

    pub fn with_flag<K: Into<String>, V: Into<PassFlag>>(mut self, key: K, value: V) -> Self {
        self.pass_flags.insert(key.into(), value.into());
        self
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_arch<A: Into<String>>(mut self, arch: A) -> Self {
        self.arch = Some(arch.into());
        self
    }

    pub fn with_binary(mut self, emit_binary: bool) -> Self {
        self.emit_binary = emit_binary;
        self
    }

    /// Canonical encoding used for fingerprinting. `PassFlags` is ordered, so
    /// equal options always encode to equal bytes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|_| format!("{:?}", self).into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_insertion_order_does_not_matter() {
        let a = CompileOptions::new()
            .with_flag("vectorize", true)
            .with_flag("vector-width", 8i64);
        let b = CompileOptions::new()
            .with_flag("vector-width", 8i64)
            .with_flag("vectorize", true);
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn options_round_trip_through_json() {
        let options = CompileOptions::new()
            .with_out_idx(vec![-1])
            .with_arch("sm_80")
            .with_flag("unroll-hint", "aggressive");
        let json = serde_json::to_string(&options).unwrap();
        let parsed: CompileOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(options, parsed);
    }
}
