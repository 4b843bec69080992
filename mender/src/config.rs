//! Tool configuration stored as TOML (default path `.mender.toml`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Configuration for the repair loop and executors (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MenderConfig {
    /// Maximum generate-execute attempts before giving up.
    pub max_retry: u32,

    /// Attempt index at which the requirement-revision strategy runs instead
    /// of debug.
    pub revision_attempt: u32,

    /// Hard wall-clock timeout for one sandboxed execution, in seconds.
    pub exec_timeout_secs: u64,

    /// Per-unit timeout for the interactive kernel, in seconds.
    pub kernel_timeout_secs: u64,

    /// Bound on diagnostic text fed back into generation.
    pub output_keep_bytes: usize,

    /// Truncate raw captured child output beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Optional TOML file with language toolchain overrides.
    pub toolchains_path: Option<String>,

    pub provider: ProviderConfig,
}

/// Chat completion backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProviderConfig {
    /// OpenAI-compatible base URL (including the version prefix).
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

impl Default for MenderConfig {
    fn default() -> Self {
        Self {
            max_retry: 3,
            revision_attempt: 2,
            exec_timeout_secs: 10,
            kernel_timeout_secs: 600,
            output_keep_bytes: 2_000,
            output_limit_bytes: 100_000,
            toolchains_path: None,
            provider: ProviderConfig::default(),
        }
    }
}

impl MenderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_retry == 0 {
            return Err(anyhow!("max_retry must be > 0"));
        }
        if self.exec_timeout_secs == 0 {
            return Err(anyhow!("exec_timeout_secs must be > 0"));
        }
        if self.kernel_timeout_secs == 0 {
            return Err(anyhow!("kernel_timeout_secs must be > 0"));
        }
        if self.output_keep_bytes == 0 {
            return Err(anyhow!("output_keep_bytes must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.provider.base_url.trim().is_empty() {
            return Err(anyhow!("provider.base_url must be non-empty"));
        }
        if self.provider.model.trim().is_empty() {
            return Err(anyhow!("provider.model must be non-empty"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `MenderConfig::default()`.
pub fn load_config(path: &Path) -> Result<MenderConfig> {
    if !path.exists() {
        let cfg = MenderConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: MenderConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &MenderConfig) -> Result<()> {
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
