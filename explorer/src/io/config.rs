//! Explorer configuration stored under `.explorer/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::Depth;

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".explorer/config.toml";

/// Explorer configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExplorerConfig {
    /// Overall budget in seconds for one `start` exchange, polling included.
    pub exploration_timeout_secs: u64,

    /// Fixed delay between auto-continued `validateNext` calls.
    pub validation_step_delay_ms: u64,

    /// Upper bound on waiting for the remote abort when cancelling.
    pub cancel_timeout_secs: u64,

    /// Depth used when the CLI is not given `--depth`.
    pub default_depth: u8,

    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Root URL of the exploration service.
    pub base_url: String,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
    /// Status poll interval while an exploration is running.
    pub poll_interval_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5109".to_string(),
            request_timeout_secs: 120,
            poll_interval_ms: 1000,
        }
    }
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            exploration_timeout_secs: 30 * 60,
            validation_step_delay_ms: 1000,
            cancel_timeout_secs: 5,
            default_depth: 5,
            service: ServiceConfig::default(),
        }
    }
}

impl ExplorerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.exploration_timeout_secs == 0 {
            return Err(anyhow!("exploration_timeout_secs must be > 0"));
        }
        if self.cancel_timeout_secs == 0 {
            return Err(anyhow!("cancel_timeout_secs must be > 0"));
        }
        Depth::new(self.default_depth).map_err(|err| anyhow!("default_depth: {err}"))?;
        if self.service.request_timeout_secs == 0 {
            return Err(anyhow!("service.request_timeout_secs must be > 0"));
        }
        if self.service.poll_interval_ms == 0 {
            return Err(anyhow!("service.poll_interval_ms must be > 0"));
        }
        let base_url = self.service.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(anyhow!(
                "service.base_url must start with http:// or https:// (got '{base_url}')"
            ));
        }
        Ok(())
    }

    pub fn exploration_timeout(&self) -> Duration {
        Duration::from_secs(self.exploration_timeout_secs)
    }

    pub fn validation_step_delay(&self) -> Duration {
        Duration::from_millis(self.validation_step_delay_ms)
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_secs(self.cancel_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ExplorerConfig::default()`.
pub fn load_config(path: &Path) -> Result<ExplorerConfig> {
    if !path.exists() {
        let cfg = ExplorerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ExplorerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ExplorerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
