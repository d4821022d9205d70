//! Guard configuration
//!
//! Every knob has a serde default, so an empty JSON object is a complete
//! configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Documents sampled per collection for schema inference (default: 3)
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Sample values longer than this many characters are truncated (default: 60)
    #[serde(default = "default_sample_value_max_len")]
    pub sample_value_max_len: usize,

    /// Limit applied to find plans that request none (default: 1000)
    #[serde(default = "default_find_limit")]
    pub default_find_limit: i64,

    /// Hard cap on any executed limit (default: 100000)
    #[serde(default = "default_max_find_limit")]
    pub max_find_limit: i64,

    /// Result cap given to template plans (default: 20)
    #[serde(default = "default_template_result_cap")]
    pub template_result_cap: i64,

    /// maxLimit assumed by policy sets that state none (default: 100)
    #[serde(default = "default_policy_max_limit")]
    pub default_policy_max_limit: i64,

    /// Longest accepted natural-language query, in characters (default: 5000)
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,

    /// Resolve reference ids to names in results (default: true)
    #[serde(default = "default_enrich_results")]
    pub enrich_results: bool,
}

fn default_sample_size() -> usize {
    3
}

fn default_sample_value_max_len() -> usize {
    60
}

fn default_find_limit() -> i64 {
    1000
}

fn default_max_find_limit() -> i64 {
    100_000
}

fn default_template_result_cap() -> i64 {
    20
}

fn default_policy_max_limit() -> i64 {
    100
}

fn default_max_query_length() -> usize {
    5000
}

fn default_enrich_results() -> bool {
    true
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            sample_value_max_len: default_sample_value_max_len(),
            default_find_limit: default_find_limit(),
            max_find_limit: default_max_find_limit(),
            template_result_cap: default_template_result_cap(),
            default_policy_max_limit: default_policy_max_limit(),
            max_query_length: default_max_query_length(),
            enrich_results: default_enrich_results(),
        }
    }
}

impl GuardConfig {
    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Config with enrichment switched on or off
    pub fn with_enrichment(mut self, enabled: bool) -> Self {
        self.enrich_results = enabled;
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.sample_size == 0 {
            return Err(ConfigError::Invalid("sample_size must be at least 1".into()));
        }
        if self.default_find_limit <= 0 || self.max_find_limit <= 0 {
            return Err(ConfigError::Invalid("find limits must be positive".into()));
        }
        if self.default_find_limit > self.max_find_limit {
            return Err(ConfigError::Invalid(format!(
                "default_find_limit {} exceeds max_find_limit {}",
                self.default_find_limit, self.max_find_limit
            )));
        }
        if self.template_result_cap <= 0 {
            return Err(ConfigError::Invalid("template_result_cap must be positive".into()));
        }
        Ok(())
    }
}
