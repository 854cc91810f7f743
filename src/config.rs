use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_collection() -> String {
    "vendor_invoices".to_string()
}

/// Where vendor records come from: a local JSON directory and/or the remote
/// document-store service.
#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    #[serde(default = "default_vendor_dir")]
    pub vendor_dir: PathBuf,
    #[serde(default)]
    pub remote_base_url: Option<String>,
    #[serde(default)]
    pub remote_user_id: Option<String>,
    #[serde(default = "default_remote_timeout")]
    pub remote_timeout_secs: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            vendor_dir: default_vendor_dir(),
            remote_base_url: None,
            remote_user_id: None,
            remote_timeout_secs: default_remote_timeout(),
        }
    }
}

fn default_vendor_dir() -> PathBuf {
    PathBuf::from("data/vendors")
}
fn default_remote_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Default number of sources per answer when the caller does not pass k.
    #[serde(default = "default_k")]
    pub default_k: usize,
    /// Cap applied to a caller-supplied k.
    #[serde(default = "default_max_k")]
    pub max_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            max_k: default_max_k(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_max_k() -> usize {
    25
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            batch_size: 16,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_llm_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_max_output_tokens() -> u32 {
    256
}
fn default_batch_size() -> usize {
    16
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:4005".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.retrieval.default_k == 0 {
        anyhow::bail!("retrieval.default_k must be >= 1");
    }
    if config.retrieval.max_k < config.retrieval.default_k {
        anyhow::bail!("retrieval.max_k must be >= retrieval.default_k");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    match config.llm.provider.as_str() {
        "disabled" | "gemini" => {}
        other => anyhow::bail!("Unknown llm provider: '{}'. Must be disabled or gemini.", other),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_parses_with_defaults() {
        let cfg: Config = toml::from_str("[db]\npath = \"data/viq.db\"\n").unwrap();
        assert_eq!(cfg.db.collection, "vendor_invoices");
        assert_eq!(cfg.retrieval.default_k, 5);
        assert!(!cfg.embedding.is_enabled());
        assert!(!cfg.llm.is_enabled());
        assert_eq!(cfg.server.bind, "127.0.0.1:4005");
    }

    #[test]
    fn test_enabled_embedding_requires_model_and_dims() {
        let toml_text = r#"
            [db]
            path = "data/viq.db"
            [embedding]
            provider = "openai"
        "#;
        let tmp = std::env::temp_dir().join("viq-config-test.toml");
        std::fs::write(&tmp, toml_text).unwrap();
        let err = load_config(&tmp).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }
}
