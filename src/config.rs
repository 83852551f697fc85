//! TOML configuration parsing.
//!
//! A single file drives every stage of the process: where shards live and
//! how they are named (`[data]`), how the table is sampled (`[sampling]`),
//! which model backs the agent (`[agent]`), and where the service listens
//! (`[server]`).
//!
//! ```toml
//! [data]
//! dir = "./data"
//! shard_prefix = "sewer-inspections-part"
//! shard_count = 5
//! remote_base_url = "https://example-bucket.s3.amazonaws.com"
//!
//! [sampling]
//! fraction = 0.1
//! seed = 42
//!
//! [agent]
//! provider = "ollama"
//! model = "llama3"
//!
//! [server]
//! bind = "0.0.0.0:8000"
//! cors_origin = "http://localhost:5173"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    /// Local cache directory holding the shard files.
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
    /// Load exactly this file instead of the shard set.
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_shard_prefix")]
    pub shard_prefix: String,
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
    /// Explicit shard file names; overrides `shard_prefix`/`shard_count`.
    #[serde(default)]
    pub shards: Option<Vec<String>>,
    /// Public bucket URL that missing shards are downloaded from.
    #[serde(default)]
    pub remote_base_url: Option<String>,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
            file: None,
            shard_prefix: default_shard_prefix(),
            shard_count: default_shard_count(),
            shards: None,
            remote_base_url: None,
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_shard_prefix() -> String {
    "sewer-inspections-part".to_string()
}
fn default_shard_count() -> usize {
    5
}
fn default_fetch_timeout_secs() -> u64 {
    60
}

impl DataConfig {
    /// Shard file names in load order.
    pub fn shard_names(&self) -> Vec<String> {
        match &self.shards {
            Some(names) => names.clone(),
            None => (1..=self.shard_count)
                .map(|n| format!("{}{}.jsonl", self.shard_prefix, n))
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SamplingConfig {
    #[serde(default = "default_fraction")]
    pub fraction: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            fraction: default_fraction(),
            seed: default_seed(),
        }
    }
}

fn default_fraction() -> f64 {
    0.1
}
fn default_seed() -> u64 {
    42
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// `ollama` or `openai` (any OpenAI-compatible chat endpoint).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Base URL of the model runtime. Defaults per provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_true")]
    pub allow_code_execution: bool,
    #[serde(default = "default_true")]
    pub handle_parsing_errors: bool,
    #[serde(default = "default_true")]
    pub verbose: bool,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_max_result_rows")]
    pub max_result_rows: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Transport-level timeout for a single model call. `None` waits forever.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub temperature: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            url: None,
            allow_code_execution: true,
            handle_parsing_errors: true,
            verbose: true,
            max_iterations: default_max_iterations(),
            max_result_rows: default_max_result_rows(),
            max_retries: default_max_retries(),
            timeout_secs: None,
            temperature: 0.0,
        }
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_model() -> String {
    "llama3".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_iterations() -> usize {
    15
}
fn default_max_result_rows() -> usize {
    20
}
fn default_max_retries() -> u32 {
    2
}

impl AgentConfig {
    pub fn base_url(&self) -> &str {
        match (&self.url, self.provider.as_str()) {
            (Some(url), _) => url.trim_end_matches('/'),
            (None, "openai") => "https://api.openai.com",
            (None, _) => "http://localhost:11434",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// The only origin allowed to call the API from a browser.
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origin: default_cors_origin(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_cors_origin() -> String {
    "http://localhost:5173".to_string()
}

impl Config {
    /// All-defaults config, used when no config file is present.
    pub fn minimal() -> Self {
        Self {
            data: DataConfig::default(),
            sampling: SamplingConfig::default(),
            agent: AgentConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate data
    if config.data.file.is_none() && config.data.shard_names().is_empty() {
        anyhow::bail!("data: no shards configured (set data.shard_count, data.shards, or data.file)");
    }

    // Validate sampling
    let fraction = config.sampling.fraction;
    if !(fraction > 0.0 && fraction <= 1.0) {
        anyhow::bail!("sampling.fraction must be in (0.0, 1.0], got {}", fraction);
    }

    // Validate agent
    if config.agent.max_iterations == 0 {
        anyhow::bail!("agent.max_iterations must be > 0");
    }
    if config.agent.model.trim().is_empty() {
        anyhow::bail!("agent.model must not be empty");
    }
    match config.agent.provider.as_str() {
        "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown agent provider: '{}'. Must be ollama or openai.",
            other
        ),
    }

    // Validate server
    if config.server.cors_origin.trim().is_empty() {
        anyhow::bail!("server.cors_origin must not be empty");
    }

    Ok(())
}
