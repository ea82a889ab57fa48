//! Supported compilation backends.

use crate::error::TargetError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Cuda,
    Hip,
    Metal,
    WebGpu,
    /// Plain C for the host CPU.
    C,
}

impl Backend {
    pub const ALL: [Backend; 5] = [
        Backend::Cuda,
        Backend::Hip,
        Backend::Metal,
        Backend::WebGpu,
        Backend::C,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Cuda => "cuda",
            Backend::Hip => "hip",
            Backend::Metal => "metal",
            Backend::WebGpu => "webgpu",
            Backend::C => "c",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cuda" | "nvidia" => Ok(Backend::Cuda),
            "hip" | "rocm" => Ok(Backend::Hip),
            "metal" | "mps" => Ok(Backend::Metal),
            "webgpu" | "wgpu" | "wgsl" => Ok(Backend::WebGpu),
            "c" | "cpu" | "host" => Ok(Backend::C),
            _ => Err(TargetError::UnknownBackend {
                name: s.to_string(),
            }),
        }
    }
}

/// Renders a backend set as `{cuda, hip}` for diagnostics.
pub fn format_backends(backends: &BTreeSet<Backend>) -> String {
    let names = backends
        .iter()
        .map(Backend::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{}}}", names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_names_and_aliases() {
        for backend in Backend::ALL {
            assert_eq!(backend.as_str().parse::<Backend>().unwrap(), backend);
        }
        assert_eq!("ROCm".parse::<Backend>().unwrap(), Backend::Hip);
        assert_eq!(" wgpu ".parse::<Backend>().unwrap(), Backend::WebGpu);
    }

    #[test]
    fn unknown_name_is_reported() {
        let err = "tpu".parse::<Backend>().unwrap_err();
        assert!(matches!(err, TargetError::UnknownBackend { ref name } if name == "tpu"));
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Backend::WebGpu).unwrap();
        assert_eq!(json, "\"webgpu\"");
    }

    #[test]
    fn empty_set_formats_as_braces() {
        assert_eq!(format_backends(&BTreeSet::new()), "{}");
        let set: BTreeSet<_> = [Backend::Hip, Backend::Cuda].into_iter().collect();
        assert_eq!(format_backends(&set), "{cuda, hip}");
    }
}
