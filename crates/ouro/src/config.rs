//! Configuration file support.
//!
//! Configuration lives in `ouro.toml`, discovered by walking up from the
//! current directory. All keys are optional; unset keys fall back to the
//! driver defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use ouro_driver::{BudgetCaps, DriverLimits};

/// The config file name.
pub const CONFIG_FILE: &str = "ouro.toml";

/// Recognized configuration options.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Chat-completion calls each agent may make.
    pub max_calls_per_subagent: Option<u32>,
    /// Deepest depth at which sub-agents may still be spawned.
    pub max_depth: Option<u32>,
    /// Tail length observations are truncated to.
    pub truncate_len: Option<usize>,
    /// Requested root model.
    pub primary_agent: Option<String>,
    /// Requested child model.
    pub sub_agent: Option<String>,
    /// Global prompt-token cap across the whole tree.
    pub max_prompt_tokens: Option<u64>,
    /// Global completion-token cap across the whole tree.
    pub max_completion_tokens: Option<u64>,
    /// Retired in favor of token caps; accepted and ignored.
    pub max_money_spent: Option<toml::Value>,
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Find and load `ouro.toml`, walking up from `start`.
    pub fn find_and_load_from(start: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_FILE);
            if candidate.exists() {
                let config = Self::from_file(&candidate)?;
                return Ok(Some((config, candidate)));
            }
            if !dir.pop() {
                break;
            }
        }
        Ok(None)
    }

    fn validate(&self) -> Result<()> {
        if self.max_calls_per_subagent == Some(0) {
            anyhow::bail!("max_calls_per_subagent must be > 0");
        }
        if self.truncate_len == Some(0) {
            anyhow::bail!("truncate_len must be > 0");
        }
        if self.max_prompt_tokens == Some(0) {
            anyhow::bail!("max_prompt_tokens must be > 0");
        }
        if self.max_completion_tokens == Some(0) {
            anyhow::bail!("max_completion_tokens must be > 0");
        }
        Ok(())
    }

    /// Emit the deprecation warning for retired keys. Called once at startup.
    pub fn warn_deprecated(&self) {
        if self.max_money_spent.is_some() {
            tracing::warn!(
                "The max_money_spent option is deprecated and ignored. \
                 Use max_prompt_tokens / max_completion_tokens instead."
            );
        }
    }

    /// Driver limits with config overrides applied.
    pub fn limits(&self) -> DriverLimits {
        let mut limits = DriverLimits::default();
        if let Some(max_calls) = self.max_calls_per_subagent {
            limits = limits.with_max_calls(max_calls);
        }
        if let Some(max_depth) = self.max_depth {
            limits = limits.with_max_depth(max_depth);
        }
        if let Some(truncate_len) = self.truncate_len {
            limits = limits.with_truncate_len(truncate_len);
        }
        limits
    }

    /// Token caps from the config.
    pub fn caps(&self) -> BudgetCaps {
        BudgetCaps {
            max_prompt_tokens: self.max_prompt_tokens,
            max_completion_tokens: self.max_completion_tokens,
        }
    }
}
