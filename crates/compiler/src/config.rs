//! JIT configuration: defaults, JSON files and `FORGEJIT_*` environment
//! variables, applied in that order.

use anyhow::{bail, Context, Result};
use forgejit_ir::{CompileOptions, PassFlags};
use forgejit_target::TargetSpec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENV_TARGET: &str = "FORGEJIT_TARGET";
pub const ENV_SKIP_HARDWARE_CHECK: &str = "FORGEJIT_SKIP_HARDWARE_CHECK";
pub const ENV_CACHE_DIR: &str = "FORGEJIT_CACHE_DIR";
pub const ENV_DISABLE_CACHE: &str = "FORGEJIT_DISABLE_CACHE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitConfig {
    pub target: TargetSpec,
    /// Resolve without consulting the hardware prober. Kernels built this way
    /// can be inspected but not launched.
    pub skip_hardware_check: bool,
    /// Directory for the on-disk artifact tier. `None` keeps artifacts in
    /// memory only.
    pub cache_dir: Option<PathBuf>,
    /// Give every handle its own private cache.
    pub disable_cache: bool,
    /// Pass flags forwarded into every kernel's compile options. Flags set on
    /// the options themselves take precedence.
    pub flags: PassFlags,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            target: TargetSpec::Auto,
            skip_hardware_check: false,
            cache_dir: None,
            disable_cache: false,
            flags: PassFlags::new(),
        }
    }
}

impl JitConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = fs::read(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = serde_json::from_slice(&data)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let blob = serde_json::to_vec_pretty(self)?;
        fs::write(path, blob)?;
        Ok(())
    }

    /// Optional JSON file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlays `FORGEJIT_*` variables read through `lookup`. Empty values are
    /// treated as unset.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get(ENV_TARGET) {
            self.target = value
                .trim()
                .parse::<TargetSpec>()
                .with_context(|| format!("invalid {}", ENV_TARGET))?;
        }
        if let Some(value) = get(ENV_SKIP_HARDWARE_CHECK) {
            self.skip_hardware_check = parse_bool(ENV_SKIP_HARDWARE_CHECK, &value)?;
        }
        if let Some(value) = get(ENV_CACHE_DIR) {
            self.cache_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = get(ENV_DISABLE_CACHE) {
            self.disable_cache = parse_bool(ENV_DISABLE_CACHE, &value)?;
        }
        debug!(
            target = %self.target,
            skip_hardware_check = self.skip_hardware_check,
            cache_dir = ?self.cache_dir,
            disable_cache = self.disable_cache,
            "applied environment configuration"
        );
        Ok(())
    }

    /// Merges the configured flags under the ones already set in `options`.
    pub fn apply_flags(&self, mut options: CompileOptions) -> CompileOptions {
        for (key, value) in &self.flags {
            options
                .pass_flags
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        options
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{} expects a boolean, got `{}`", key, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use forgejit_ir::PassFlag;
    use forgejit_target::Backend;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn environment_overrides_defaults() -> Result<()> {
        let mut config = JitConfig::default();
        config.apply_env_with(env(&[
            (ENV_TARGET, "cuda"),
            (ENV_SKIP_HARDWARE_CHECK, "Yes"),
            (ENV_CACHE_DIR, "/tmp/forgejit"),
            (ENV_DISABLE_CACHE, "off"),
        ]))?;
        assert_eq!(config.target, TargetSpec::Explicit(Backend::Cuda));
        assert!(config.skip_hardware_check);
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/forgejit")));
        assert!(!config.disable_cache);
        Ok(())
    }

    #[test]
    fn empty_variables_are_ignored() -> Result<()> {
        let mut config = JitConfig::default();
        config.apply_env_with(env(&[(ENV_TARGET, " "), (ENV_DISABLE_CACHE, "")]))?;
        assert_eq!(config, JitConfig::default());
        Ok(())
    }

    #[test]
    fn malformed_values_are_rejected() {
        let mut config = JitConfig::default();
        assert!(config
            .apply_env_with(env(&[(ENV_SKIP_HARDWARE_CHECK, "maybe")]))
            .is_err());
        assert!(config.apply_env_with(env(&[(ENV_TARGET, "tpu")])).is_err());
    }

    #[test]
    fn json_file_round_trips() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("forgejit.json");
        let mut config = JitConfig {
            target: TargetSpec::Explicit(Backend::Hip),
            skip_hardware_check: true,
            ..JitConfig::default()
        };
        config.flags.insert("vector-width".into(), PassFlag::Int(8));
        config.save_to_file(&path)?;
        assert_eq!(JitConfig::from_json_file(&path)?, config);
        Ok(())
    }

    #[test]
    fn partial_json_uses_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("forgejit.json");
        fs::write(&path, r#"{ "target": "metal" }"#)?;
        let config = JitConfig::from_json_file(&path)?;
        assert_eq!(config.target, TargetSpec::Explicit(Backend::Metal));
        assert!(!config.skip_hardware_check);
        assert!(config.flags.is_empty());
        Ok(())
    }

    #[test]
    fn option_flags_win_over_config_flags() {
        let mut config = JitConfig::default();
        config.flags.insert("vectorize".into(), PassFlag::Bool(false));
        config.flags.insert("unroll".into(), PassFlag::Int(2));
        let options = config.apply_flags(CompileOptions::new().with_flag("vectorize", true));
        assert_eq!(options.pass_flags["vectorize"], PassFlag::Bool(true));
        assert_eq!(options.pass_flags["unroll"], PassFlag::Int(2));
    }
}
