//! Server configuration.
//!
//! Read from `--config <path>` or `<config_dir>/orbitr/config.toml`. Every
//! field has a default, so an empty or missing file is a valid config.
//! Environment variables override the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use orbitr_agents::LlmConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbitrConfig {
    /// Address the HTTP API listens on.
    pub bind: String,
    /// SQLite database path.
    pub database: PathBuf,
    /// Optional YAML/JSON rules file replacing the built-in rules.
    pub rules_file: Option<PathBuf>,
    /// Fail LLM answers that cite unknown frameworks or lack evidence.
    pub strict_guardrails: bool,
    pub queue_capacity: usize,
    pub rate_limit: RateLimitConfig,
    pub simulation: SimulationConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Burst size per source system.
    pub capacity: u32,
    pub refill_per_sec: f64,
    /// Most source systems tracked at once.
    pub max_sources: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { capacity: 100, refill_per_sec: 20.0, max_sources: 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub tick_ms: u64,
    /// Chance per tick of an extra SDLC event next to the metric sample.
    pub event_probability: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { tick_ms: 2000, event_probability: 0.3 }
    }
}

impl Default for OrbitrConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            database: default_database_path(),
            rules_file: None,
            strict_guardrails: true,
            queue_capacity: 10_000,
            rate_limit: RateLimitConfig::default(),
            simulation: SimulationConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("orbitr")
        .join("orbitr.db")
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("orbitr").join("config.toml"))
}

impl OrbitrConfig {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load the config file (explicit path or the default location) and
    /// apply environment overrides. A missing default file is not an error;
    /// a missing explicit one is.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("cannot read config {}: {e}", path.display()))?;
                Self::from_toml(&text)?
            }
            None => match default_config_path() {
                Some(path) if path.exists() => {
                    let text = std::fs::read_to_string(&path)?;
                    Self::from_toml(&text).unwrap_or_else(|e| {
                        tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed config");
                        Self::default()
                    })
                }
                _ => Self::default(),
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `ORBITR_*` and LLM key overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(bind) = get("ORBITR_BIND") {
            self.bind = bind;
        }
        if let Some(db) = get("ORBITR_DATABASE") {
            self.database = PathBuf::from(db);
        }
        if let Some(rules) = get("ORBITR_RULES") {
            self.rules_file = Some(PathBuf::from(rules));
        }
        if let Some(key) = get("GLM_API_KEY").or_else(|| get("ZAI_API_KEY")).or_else(|| get("ZHIPU_API_KEY")) {
            self.llm.api_key = Some(key);
        }
        if let Some(key) = get("OPENROUTER_API_KEY") {
            self.llm.fallback_api_key = Some(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = OrbitrConfig::from_toml("").unwrap();
        assert_eq!(config.bind, "127.0.0.1:8000");
        assert_eq!(config.queue_capacity, 10_000);
        assert_eq!(config.rate_limit.capacity, 100);
        assert_eq!(config.rate_limit.max_sources, 1024);
        assert!(config.strict_guardrails);
        assert!(!config.llm.is_enabled(), "no key means no LLM");
    }

    #[test]
    fn test_partial_tables_keep_other_defaults() {
        let config = OrbitrConfig::from_toml(
            r#"
            bind = "0.0.0.0:9000"

            [llm]
            api_key = "k"
            max_tokens = 300

            [rate_limit]
            capacity = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.llm.max_tokens, 300);
        assert_eq!(config.llm.timeout_secs, 15, "unset llm fields keep defaults");
        assert_eq!(config.rate_limit.capacity, 5);
        assert_eq!(config.rate_limit.refill_per_sec, 20.0);
        assert_eq!(config.simulation.tick_ms, 2000);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ORBITR_BIND", "0.0.0.0:1234"),
            ("ORBITR_DATABASE", "/tmp/o.db"),
            ("ZAI_API_KEY", "zai"),
            ("OPENROUTER_API_KEY", "or"),
            ("ORBITR_RULES", ""),
        ]
        .into_iter()
        .collect();
        let mut config = OrbitrConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.bind, "0.0.0.0:1234");
        assert_eq!(config.database, PathBuf::from("/tmp/o.db"));
        assert_eq!(config.llm.api_key.as_deref(), Some("zai"));
        assert_eq!(config.llm.fallback_api_key.as_deref(), Some("or"));
        assert_eq!(config.rules_file, None, "blank values are ignored");
    }

    #[test]
    fn test_glm_key_wins_over_aliases() {
        let mut config = OrbitrConfig::default();
        config.apply_overrides(|k| match k {
            "GLM_API_KEY" => Some("glm".into()),
            "ZHIPU_API_KEY" => Some("zhipu".into()),
            _ => None,
        });
        assert_eq!(config.llm.api_key.as_deref(), Some("glm"));
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(OrbitrConfig::load(Some(&missing)).is_err());
    }
}
