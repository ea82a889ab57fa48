//! Target resolution.

use crate::backend::Backend;
use crate::error::TargetError;
use crate::probe::HardwareProber;
use crate::spec::{ResolvedTarget, TargetSpec};
use std::sync::Arc;
use tracing::info;

/// Backend chosen for `auto` when the hardware check is skipped.
pub const DEFAULT_BYPASS_BACKEND: Backend = Backend::Cuda;

/// Order in which detected accelerators are preferred for `auto`.
pub const AUTO_PRIORITY: [Backend; 4] = [
    Backend::Cuda,
    Backend::Hip,
    Backend::Metal,
    Backend::WebGpu,
];

/// Combines the requested target, the bypass flag and a probe snapshot into
/// one concrete backend.
#[derive(Clone)]
pub struct TargetResolver {
    prober: Arc<dyn HardwareProber>,
}

impl TargetResolver {
    pub fn new(prober: Arc<dyn HardwareProber>) -> Self {
        Self { prober }
    }

    /// Resolves `requested`.
    ///
    /// With `bypass_hardware_check` set the prober is never consulted and
    /// resolution cannot fail. Otherwise the prober runs exactly once and its
    /// result is used for the whole decision.
    pub fn resolve(
        &self,
        requested: TargetSpec,
        bypass_hardware_check: bool,
    ) -> Result<ResolvedTarget, TargetError> {
        let resolved = match (requested, bypass_hardware_check) {
            (TargetSpec::Explicit(backend), true) => ResolvedTarget::bypassed(backend),
            (TargetSpec::Auto, true) => ResolvedTarget::bypassed(DEFAULT_BYPASS_BACKEND),
            (TargetSpec::Explicit(backend), false) => {
                let detected = self.prober.probe()?;
                if !detected.contains(&backend) {
                    return Err(TargetError::NoHardware {
                        requested: backend,
                        detected,
                    });
                }
                ResolvedTarget::checked(backend)
            }
            (TargetSpec::Auto, false) => {
                let detected = self.prober.probe()?;
                let backend = AUTO_PRIORITY
                    .into_iter()
                    .find(|candidate| detected.contains(candidate))
                    .ok_or(TargetError::NoHardwareDetected { detected })?;
                ResolvedTarget::checked(backend)
            }
        };

        info!(
            requested = %requested,
            backend = %resolved.backend,
            policy = %resolved.policy,
            "resolved compilation target"
        );
        Ok(resolved)
    }
}
