//! Artifact fingerprints.

use forgejit_ir::{CompileOptions, KernelIdentity};
use forgejit_target::ResolvedTarget;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

const DOMAIN_TAG: &[u8] = b"forgejit-artifact-v1";

/// Deterministic digest over (kernel identity, compile options, resolved
/// target). Equal fingerprints are the only cache-hit criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ArtifactFingerprint([u8; 32]);

impl ArtifactFingerprint {
    pub fn compute(
        kernel: &KernelIdentity,
        options: &CompileOptions,
        target: &ResolvedTarget,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN_TAG);
        hasher.update(kernel.as_bytes());
        update_framed(&mut hasher, &options.canonical_bytes());
        update_framed(&mut hasher, target.backend.as_str().as_bytes());
        update_framed(&mut hasher, target.policy.as_str().as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First twelve hex digits, for log lines.
    pub fn short(&self) -> String {
        let mut text = self.to_string();
        text.truncate(12);
        text
    }
}

fn update_framed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl fmt::Display for ArtifactFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid artifact fingerprint `{0}`")]
pub struct ParseFingerprintError(String);

impl FromStr for ArtifactFingerprint {
    type Err = ParseFingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseFingerprintError(s.to_string());
        if s.len() != 64 || !s.is_ascii() {
            return Err(invalid());
        }
        let mut bytes = [0u8; 32];
        for (index, byte) in bytes.iter_mut().enumerate() {
            let pair = &s[index * 2..index * 2 + 2];
            *byte = u8::from_str_radix(pair, 16).map_err(|_| invalid())?;
        }
        Ok(Self(bytes))
    }
}

impl From<ArtifactFingerprint> for String {
    fn from(value: ArtifactFingerprint) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for ArtifactFingerprint {
    type Error = ParseFingerprintError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
