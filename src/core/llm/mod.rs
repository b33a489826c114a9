pub mod providers;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::config::{AgentDef, LlmConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Inexpensive model used for classification round-trips.
    Cheap,
    #[default]
    Standard,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct LlmOutput {
    pub text: String,
    pub usage: TokenUsage,
}

/// One model endpoint. `stream` receives text chunks as they arrive; the
/// full text is still returned at the end.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn id(&self) -> &str;
    fn tier(&self) -> ModelTier;
    async fn generate(
        &self,
        messages: &[ChatMessage],
        stream: Option<mpsc::Sender<String>>,
    ) -> Result<LlmOutput>;
}

/// Shared provider pool, read by arbitrarily many concurrent jobs without
/// per-call locking. The set is never mutated in place: a refresh rebuilds
/// it from scratch (re-reading credentials) and swaps the whole `Arc`, so
/// in-flight calls finish on whichever set they grabbed.
pub struct LlmPool {
    config: LlmConfig,
    clients: RwLock<Arc<Vec<Arc<dyn LlmClient>>>>,
}

impl LlmPool {
    pub fn new(config: LlmConfig) -> Arc<Self> {
        let clients = providers::build_clients(&config);
        Arc::new(Self {
            config,
            clients: RwLock::new(Arc::new(clients)),
        })
    }

    /// Pool over a fixed client set; used by tests and embedders that bring
    /// their own transport.
    pub fn with_clients(clients: Vec<Arc<dyn LlmClient>>) -> Arc<Self> {
        Arc::new(Self {
            config: LlmConfig::default(),
            clients: RwLock::new(Arc::new(clients)),
        })
    }

    pub async fn refresh(&self) {
        let rebuilt = providers::build_clients(&self.config);
        let count = rebuilt.len();
        *self.clients.write().await = Arc::new(rebuilt);
        info!("LLM provider pool rebuilt ({} clients)", count);
    }

    pub fn spawn_refresh_loop(self: &Arc<Self>, cancel: CancellationToken) {
        let pool = self.clone();
        tokio::spawn(async move {
            let period = Duration::from_secs(pool.config.refresh_secs.max(1));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(period) => pool.refresh().await,
                }
            }
        });
    }

    async fn pick(&self, tier: ModelTier) -> Result<Arc<dyn LlmClient>> {
        let set = self.clients.read().await.clone();
        set.iter()
            .find(|c| c.tier() == tier)
            .or_else(|| set.first())
            .cloned()
            .ok_or_else(|| anyhow!("No LLM providers configured"))
    }

    pub async fn generate(
        &self,
        tier: ModelTier,
        messages: &[ChatMessage],
        stream: Option<mpsc::Sender<String>>,
    ) -> Result<LlmOutput> {
        let client = self.pick(tier).await?;
        client.generate(messages, stream).await
    }

    /// Single inexpensive round-trip asking the model to pick at most one
    /// agent from the catalog by name, or answer "none". Any failure falls
    /// back to "no specific agent" rather than failing the job.
    pub async fn classify_agent(&self, message: &str, catalog: &[AgentDef]) -> Option<String> {
        if catalog.is_empty() {
            return None;
        }
        let listing = catalog
            .iter()
            .map(|a| format!("- {}: {}", a.name, a.description))
            .collect::<Vec<_>>()
            .join("\n");
        let messages = [
            ChatMessage::system(format!(
                "You route user requests to specialist agents.\n\
                 Available agents:\n{listing}\n\n\
                 Reply with exactly one agent name from the list, or \"none\" \
                 if no specific agent fits. Reply with the name only."
            )),
            ChatMessage::user(message.to_string()),
        ];
        match self.generate(ModelTier::Cheap, &messages, None).await {
            Ok(out) => resolve_agent_name(&out.text, catalog),
            Err(e) => {
                warn!("Agent classification failed, routing to default: {}", e);
                None
            }
        }
    }
}

/// Match the model's textual answer back to an agent id: exact name or id
/// first, then substring in either direction.
pub(crate) fn resolve_agent_name(answer: &str, catalog: &[AgentDef]) -> Option<String> {
    let answer = answer
        .trim()
        .trim_matches('"')
        .trim_end_matches('.')
        .to_lowercase();
    if answer.is_empty() || answer == "none" {
        return None;
    }
    for agent in catalog {
        if agent.name.to_lowercase() == answer || agent.id.to_lowercase() == answer {
            return Some(agent.id.clone());
        }
    }
    for agent in catalog {
        let name = agent.name.to_lowercase();
        if answer.contains(&name) || name.contains(&answer) {
            return Some(agent.id.clone());
        }
    }
    None
}
