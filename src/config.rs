use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub checker: CheckerConfig,
    #[serde(default)]
    pub warmup: WarmupConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// Settings for the remote embedding backend (Ollama-compatible HTTP API).
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Connect timeout, kept short so an unreachable host fails fast.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Total timeout for warm requests (similarity checks).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Total timeout for requests that may hit a cold model (record creation).
    #[serde(default = "default_cold_timeout_secs")]
    pub cold_timeout_secs: u64,
}

fn default_embedding_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_cold_timeout_secs() -> u64 {
    90
}

impl EmbeddingConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
    pub fn cold_timeout(&self) -> Duration {
        Duration::from_secs(self.cold_timeout_secs)
    }
}

/// Settings for the external vector index (Qdrant-compatible HTTP API).
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_url")]
    pub url: String,
    /// API key for authenticated deployments. Falls back to the
    /// `QDRANT_API_KEY` environment variable when unset.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_index_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_index_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "capstones".to_string()
}
fn default_index_timeout_secs() -> u64 {
    20
}

impl IndexConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("QDRANT_API_KEY").ok().filter(|k| !k.is_empty()))
    }
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Bounds and defaults for the proposal similarity check.
#[derive(Debug, Deserialize, Clone)]
pub struct CheckerConfig {
    #[serde(default = "default_limit")]
    pub default_limit: u32,
    #[serde(default = "default_max_limit")]
    pub max_limit: u32,
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            default_threshold: default_threshold(),
        }
    }
}

fn default_limit() -> u32 {
    5
}
fn default_max_limit() -> u32 {
    20
}
fn default_threshold() -> f32 {
    0.80
}

/// Warm-up coordination for the embedding backend.
#[derive(Debug, Deserialize, Clone)]
pub struct WarmupConfig {
    /// Lease duration for the warm-up lock. Auto-expires so a crashed
    /// holder cannot block warm-up permanently.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// How long a successful warm-up is considered valid.
    #[serde(default = "default_warm_secs")]
    pub warm_secs: u64,
    /// Timeout for the cheap reachability probe.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Timeout for the warm-up embedding call itself (tolerates model load).
    #[serde(default = "default_warmup_embed_timeout_secs")]
    pub embed_timeout_secs: u64,
    /// Throwaway prompt sent to load the model.
    #[serde(default = "default_warmup_prompt")]
    pub prompt: String,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            lease_secs: default_lease_secs(),
            warm_secs: default_warm_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            embed_timeout_secs: default_warmup_embed_timeout_secs(),
            prompt: default_warmup_prompt(),
        }
    }
}

fn default_lease_secs() -> u64 {
    30
}
fn default_warm_secs() -> u64 {
    600
}
fn default_probe_timeout_secs() -> u64 {
    2
}
fn default_warmup_embed_timeout_secs() -> u64 {
    25
}
fn default_warmup_prompt() -> String {
    "warmup".to_string()
}

impl WarmupConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;

    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.embedding.model.trim().is_empty() {
        anyhow::bail!("embedding.model must not be empty");
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.index.collection.trim().is_empty() {
        anyhow::bail!("index.collection must not be empty");
    }
    if config.checker.max_limit < 1 {
        anyhow::bail!("checker.max_limit must be >= 1");
    }
    if config.checker.default_limit < 1 || config.checker.default_limit > config.checker.max_limit {
        anyhow::bail!(
            "checker.default_limit must be in [1, {}]",
            config.checker.max_limit
        );
    }
    if !(0.0..=1.0).contains(&config.checker.default_threshold) {
        anyhow::bail!("checker.default_threshold must be in [0.0, 1.0]");
    }
    if config.warmup.lease_secs == 0 {
        anyhow::bail!("warmup.lease_secs must be > 0");
    }
    if config.warmup.warm_secs == 0 {
        anyhow::bail!("warmup.warm_secs must be > 0");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> String {
        r#"
[db]
path = "/tmp/capscreen.sqlite"

[server]
bind = "127.0.0.1:7440"

[embedding]
model = "nomic-embed-text"

[index]
"#
        .to_string()
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config: Config = toml::from_str(&minimal_toml()).unwrap();
        validate(&config).unwrap();

        assert_eq!(config.embedding.base_url, "http://localhost:11434");
        assert_eq!(config.embedding.dims, 768);
        assert_eq!(config.index.url, "http://localhost:6333");
        assert_eq!(config.index.collection, "capstones");
        assert_eq!(config.checker.default_limit, 5);
        assert_eq!(config.checker.max_limit, 20);
        assert!((config.checker.default_threshold - 0.80).abs() < f32::EPSILON);
        assert_eq!(config.warmup.lease_secs, 30);
        assert_eq!(config.warmup.warm_secs, 600);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let toml_str = format!(
            "{}\n[checker]\ndefault_threshold = 1.5\n",
            minimal_toml()
        );
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_zero_dims() {
        let toml_str = minimal_toml().replace(
            "model = \"nomic-embed-text\"",
            "model = \"nomic-embed-text\"\ndims = 0",
        );
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(validate(&config).is_err());
    }
}
