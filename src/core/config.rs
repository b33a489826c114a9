use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub swarm: SwarmConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    /// Catalog of named assistant agents a job can be routed to.
    #[serde(default)]
    pub agents: Vec<AgentDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,

    #[serde(default = "default_api_port")]
    pub port: u16,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Upper bound on how long a slot may sit suspended waiting for the user
    /// to answer a clarification request.
    #[serde(default = "default_clarification_timeout_secs")]
    pub clarification_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwarmConfig {
    #[serde(default = "default_agent_count")]
    pub default_agent_count: usize,

    #[serde(default = "default_idle_poll_secs")]
    pub idle_poll_secs: u64,

    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,

    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,

    #[serde(default = "default_worker_image")]
    pub worker_image: String,

    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,

    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_refresh_secs")]
    pub refresh_secs: u64,

    #[serde(default)]
    pub providers: Vec<ProviderDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderDef {
    pub id: String,
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key. Resolved at every pool
    /// rebuild so rotated credentials are picked up without a restart.
    pub api_key_env: String,
    /// Marks the inexpensive tier used for classification round-trips.
    #[serde(default)]
    pub cheap: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AgentDef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
}

fn default_api_host() -> String {
    "127.0.0.1".to_string()
}
fn default_api_port() -> u16 {
    17870
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_max_concurrent_jobs() -> usize {
    3
}
fn default_clarification_timeout_secs() -> u64 {
    1800
}
fn default_agent_count() -> usize {
    4
}
fn default_idle_poll_secs() -> u64 {
    5
}
fn default_error_backoff_secs() -> u64 {
    10
}
fn default_dispatch_timeout_secs() -> u64 {
    600
}
fn default_worker_image() -> String {
    "quorum-worker:latest".to_string()
}
fn default_memory_limit_mb() -> u64 {
    4096
}
fn default_cpu_limit() -> f64 {
    2.0
}
fn default_llm_refresh_secs() -> u64 {
    300
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            clarification_timeout_secs: default_clarification_timeout_secs(),
        }
    }
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            default_agent_count: default_agent_count(),
            idle_poll_secs: default_idle_poll_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
            worker_image: default_worker_image(),
            memory_limit_mb: default_memory_limit_mb(),
            cpu_limit: default_cpu_limit(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            refresh_secs: default_llm_refresh_secs(),
            providers: Vec::new(),
        }
    }
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config file at {:?}, using defaults.", path);
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
