use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub content: ContentConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Calls allowed per rolling 60-second window.
    #[serde(default = "default_free_tier_limit")]
    pub free_tier_limit: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Pacing delay between accepted generations, distinct from retry backoff.
    #[serde(default = "default_inter_call_delay_ms")]
    pub inter_call_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            api_base: default_api_base(),
            free_tier_limit: default_free_tier_limit(),
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
            inter_call_delay_ms: default_inter_call_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_free_tier_limit() -> u32 {
    15
}
fn default_max_attempts() -> u32 {
    4
}
fn default_initial_delay_ms() -> u64 {
    2000
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_inter_call_delay_ms() -> u64 {
    1500
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentConfig {
    /// How many dictionary entries one `populate` run should accept.
    #[serde(default = "default_populate_count")]
    pub populate_count: usize,
    /// Total-attempt cap per bulk run is `max_attempt_factor × count`.
    #[serde(default = "default_max_attempt_factor")]
    pub max_attempt_factor: u32,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            populate_count: default_populate_count(),
            max_attempt_factor: default_max_attempt_factor(),
        }
    }
}

fn default_populate_count() -> usize {
    20
}
fn default_max_attempt_factor() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate generation
    if config.generation.free_tier_limit == 0 {
        anyhow::bail!("generation.free_tier_limit must be >= 1");
    }
    if config.generation.max_attempts == 0 {
        anyhow::bail!("generation.max_attempts must be >= 1");
    }
    if config.generation.backoff_factor < 1.0 {
        anyhow::bail!("generation.backoff_factor must be >= 1.0");
    }
    if config.generation.max_delay_ms < config.generation.initial_delay_ms {
        anyhow::bail!("generation.max_delay_ms must be >= generation.initial_delay_ms");
    }
    if config.generation.is_enabled() && config.generation.model.is_none() {
        anyhow::bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }

    match config.generation.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    // Validate content
    if config.content.populate_count == 0 {
        anyhow::bail!("content.populate_count must be >= 1");
    }
    if config.content.max_attempt_factor == 0 {
        anyhow::bail!("content.max_attempt_factor must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(generation: &str) -> String {
        format!(
            r#"
[db]
path = "adesua.sqlite"

{}

[server]
bind = "127.0.0.1:8080"
"#,
            generation
        )
    }

    #[test]
    fn defaults_apply_when_generation_section_is_absent() {
        let config: Config = toml::from_str(&base_config("")).unwrap();
        assert_eq!(config.generation.provider, "disabled");
        assert_eq!(config.generation.free_tier_limit, 15);
        assert_eq!(config.generation.backoff_factor, 2.0);
        assert_eq!(config.content.populate_count, 20);
        assert!(!config.generation.is_enabled());
    }

    #[test]
    fn enabled_provider_requires_model() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            base_config("[generation]\nprovider = \"openai\""),
        )
        .unwrap();
        let err = load_config(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("generation.model"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            base_config("[generation]\nprovider = \"gemini\"\nmodel = \"gemini-pro\""),
        )
        .unwrap();
        let err = load_config(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("Unknown generation provider"));
    }

    #[test]
    fn zero_rate_ceiling_is_rejected() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            base_config("[generation]\nfree_tier_limit = 0"),
        )
        .unwrap();
        let err = load_config(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("free_tier_limit"));
    }
}
