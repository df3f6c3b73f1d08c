//! Configuration management.
//!
//! Loads and merges TOML configuration with environment variable overrides.
//! Mirrors the layering the rest of the engine expects: connection settings
//! at the top level, then `[safety]`, `[engine]`, and `[retry]` tables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    pub api_key: Option<String>,

    #[serde(default)]
    pub safety: SafetyConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub retry: RetrySettings,
}

/// Tunables for the risk analyzer / policy / safety pipeline (C1, C2, C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_true")]
    pub risk_analyzer_enabled: bool,
    #[serde(default = "default_cli_max_risk")]
    pub cli_max_risk: String,
    #[serde(default = "default_tui_max_risk")]
    pub tui_max_risk: String,
    #[serde(default = "default_true")]
    pub require_dry_run_for_high_risk: bool,
    #[serde(default)]
    pub whitelist_path: Option<PathBuf>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            risk_analyzer_enabled: true,
            cli_max_risk: default_cli_max_risk(),
            tui_max_risk: default_tui_max_risk(),
            require_dry_run_for_high_risk: true,
            whitelist_path: None,
        }
    }
}

/// Engine loop tunables: iteration cap, deadlines, and ring-buffer sizes
/// for history/memory/change retention (C8, C9, C10, C11, C12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_wall_clock_cap")]
    pub wall_clock_cap_secs: u64,
    #[serde(default = "default_llm_call_timeout")]
    pub llm_call_timeout_secs: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
    #[serde(default = "default_change_retention_days")]
    pub change_retention_days: u64,
    /// Whether the configured model accepts native OpenAI-style tool calls
    /// rather than needing the text-JSON extraction fallback. Not every
    /// OpenAI-compatible endpoint advertises this reliably, so it's a
    /// config knob rather than an auto-detected runtime probe.
    #[serde(default)]
    pub function_calling_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            wall_clock_cap_secs: default_wall_clock_cap(),
            llm_call_timeout_secs: default_llm_call_timeout(),
            history_capacity: default_history_capacity(),
            memory_capacity: default_memory_capacity(),
            change_retention_days: default_change_retention_days(),
            function_calling_enabled: false,
        }
    }
}

/// Retry/backoff tunables consumed by [`crate::api::RetryConfig::from_settings`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            api_key: None,
            safety: SafetyConfig::default(),
            engine: EngineConfig::default(),
            retry: RetrySettings::default(),
        }
    }
}

fn default_endpoint() -> String {
    "http://localhost:8000/v1".to_string()
}
fn default_model() -> String {
    "Qwen/Qwen3-Coder-Next-FP8".to_string()
}
fn default_max_tokens() -> usize {
    65536
}
fn default_temperature() -> f32 {
    1.0
}
fn default_true() -> bool {
    true
}
fn default_cli_max_risk() -> String {
    "high".to_string()
}
fn default_tui_max_risk() -> String {
    "medium".to_string()
}
fn default_max_iterations() -> usize {
    8
}
fn default_wall_clock_cap() -> u64 {
    120
}
fn default_llm_call_timeout() -> u64 {
    30
}
fn default_history_capacity() -> usize {
    20
}
fn default_memory_capacity() -> usize {
    200
}
fn default_change_retention_days() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30000
}

/// Base directory for persisted state: `~/.opsai`.
pub fn base_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".opsai"))
        .unwrap_or_else(|| PathBuf::from(".opsai"))
}

/// True when `endpoint` points at loopback, used to decide whether to warn
/// about sending an API key over plaintext http.
pub fn is_local_endpoint(endpoint: &str) -> bool {
    if let Ok(url) = reqwest::Url::parse(endpoint) {
        if let Some(host) = url.host_str() {
            return host == "localhost" || host == "127.0.0.1" || host == "::1" || host.ends_with(".localhost");
        }
    }
    false
}

impl Config {
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config from {}", p))?;
                toml::from_str(&content).context("Failed to parse config")?
            }
            None => {
                let home_config = dirs::home_dir()
                    .map(|h| h.join(".config/opsai/config.toml"))
                    .and_then(|p| p.to_str().map(String::from));

                let mut default_paths: Vec<&str> = vec!["opsai.toml"];
                let home_config_str: String;
                if let Some(ref hc) = home_config {
                    home_config_str = hc.clone();
                    default_paths.push(&home_config_str);
                }

                let mut loaded = None;
                for p in &default_paths {
                    if let Ok(content) = std::fs::read_to_string(p) {
                        loaded = Some(toml::from_str(&content).context("Failed to parse config")?);
                        break;
                    }
                }
                loaded.unwrap_or_else(|| {
                    tracing::info!("no config file found, using defaults");
                    Self::default()
                })
            }
        };

        if let Ok(endpoint) = std::env::var("OPSAI_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("OPSAI_MODEL") {
            config.model = model;
        }
        if let Ok(api_key) = std::env::var("OPSAI_API_KEY") {
            config.api_key = Some(api_key);
        }
        if let Ok(max_tokens) = std::env::var("OPSAI_MAX_TOKENS") {
            if let Ok(n) = max_tokens.parse::<usize>() {
                config.max_tokens = n;
            }
        }
        if let Ok(temp) = std::env::var("OPSAI_TEMPERATURE") {
            if let Ok(t) = temp.parse::<f32>() {
                config.temperature = t;
            }
        }
        if let Ok(timeout) = std::env::var("OPSAI_LLM_TIMEOUT") {
            if let Ok(t) = timeout.parse::<u64>() {
                config.engine.llm_call_timeout_secs = t;
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default() {
        let config = Config::default();
        assert_eq!(config.endpoint, "http://localhost:8000/v1");
        assert_eq!(config.max_tokens, 65536);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn safety_config_default() {
        let config = SafetyConfig::default();
        assert!(config.risk_analyzer_enabled);
        assert_eq!(config.cli_max_risk, "high");
        assert_eq!(config.tui_max_risk, "medium");
        assert!(config.require_dry_run_for_high_risk);
        assert!(config.whitelist_path.is_none());
    }

    #[test]
    fn engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.max_iterations, 8);
        assert_eq!(config.wall_clock_cap_secs, 120);
        assert_eq!(config.llm_call_timeout_secs, 30);
        assert_eq!(config.history_capacity, 20);
        assert_eq!(config.memory_capacity, 200);
        assert_eq!(config.change_retention_days, 30);
        assert!(!config.function_calling_enabled);
    }

    #[test]
    fn retry_settings_default() {
        let r = RetrySettings::default();
        assert_eq!(r.max_retries, 3);
        assert_eq!(r.base_delay_ms, 1000);
        assert_eq!(r.max_delay_ms, 30000);
    }

    #[test]
    fn config_load_missing_file_errors() {
        let result = Config::load(Some("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn config_load_no_path_uses_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.endpoint, "http://localhost:8000/v1");
    }

    #[test]
    fn config_partial_deserialization_uses_defaults() {
        let toml_str = r#"
            endpoint = "http://custom:1234/v1"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.endpoint, "http://custom:1234/v1");
        assert_eq!(config.max_tokens, 65536);
        assert_eq!(config.engine.max_iterations, 8);
    }

    #[test]
    fn config_with_safety_and_engine_sections() {
        let toml_str = r#"
            endpoint = "http://localhost:8000/v1"

            [safety]
            cli_max_risk = "medium"
            require_dry_run_for_high_risk = false

            [engine]
            max_iterations = 12
            wall_clock_cap_secs = 60
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.safety.cli_max_risk, "medium");
        assert!(!config.safety.require_dry_run_for_high_risk);
        assert_eq!(config.engine.max_iterations, 12);
        assert_eq!(config.engine.wall_clock_cap_secs, 60);
    }

    #[test]
    fn config_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.endpoint, config.endpoint);
        assert_eq!(parsed.engine.max_iterations, config.engine.max_iterations);
    }

    #[test]
    fn base_dir_ends_in_opsai() {
        let p = base_dir();
        assert!(p.ends_with(".opsai"));
    }
}
