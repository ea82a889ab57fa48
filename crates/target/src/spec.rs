//! Requested and resolved targets.

use crate::backend::Backend;
use crate::error::TargetError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What the kernel author asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TargetSpec {
    #[default]
    Auto,
    Explicit(Backend),
}

impl FromStr for TargetSpec {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            return Ok(TargetSpec::Auto);
        }
        s.parse().map(TargetSpec::Explicit)
    }
}

impl TryFrom<String> for TargetSpec {
    type Error = TargetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TargetSpec> for String {
    fn from(value: TargetSpec) -> Self {
        value.to_string()
    }
}

impl From<Backend> for TargetSpec {
    fn from(value: Backend) -> Self {
        TargetSpec::Explicit(value)
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSpec::Auto => f.write_str("auto"),
            TargetSpec::Explicit(backend) => backend.fmt(f),
        }
    }
}

/// How the backend of a [`ResolvedTarget`] was confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwarePolicy {
    /// The prober reported the backend as present.
    Checked,
    /// The hardware check was skipped; the target is compilable but was
    /// never confirmed runnable.
    Bypassed,
}

impl HardwarePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            HardwarePolicy::Checked => "checked",
            HardwarePolicy::Bypassed => "bypassed",
        }
    }
}

impl fmt::Display for HardwarePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete backend. There is no `auto` here by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedTarget {
    pub backend: Backend,
    pub policy: HardwarePolicy,
}

impl ResolvedTarget {
    pub fn checked(backend: Backend) -> Self {
        Self {
            backend,
            policy: HardwarePolicy::Checked,
        }
    }

    pub fn bypassed(backend: Backend) -> Self {
        Self {
            backend,
            policy: HardwarePolicy::Bypassed,
        }
    }

    pub fn is_launchable(&self) -> bool {
        self.policy == HardwarePolicy::Checked
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.backend, self.policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_auto_and_explicit() {
        assert_eq!("auto".parse::<TargetSpec>().unwrap(), TargetSpec::Auto);
        assert_eq!(
            "cuda".parse::<TargetSpec>().unwrap(),
            TargetSpec::Explicit(Backend::Cuda)
        );
        assert!("quantum".parse::<TargetSpec>().is_err());
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&TargetSpec::Explicit(Backend::Hip)).unwrap();
        assert_eq!(json, "\"hip\"");
        let parsed: TargetSpec = serde_json::from_str("\"auto\"").unwrap();
        assert_eq!(parsed, TargetSpec::Auto);
        assert!(serde_json::from_str::<TargetSpec>("\"tpu\"").is_err());
    }

    #[test]
    fn only_checked_targets_are_launchable() {
        assert!(ResolvedTarget::checked(Backend::Cuda).is_launchable());
        assert!(!ResolvedTarget::bypassed(Backend::Cuda).is_launchable());
    }
}
