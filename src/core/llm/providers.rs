//! OpenAI-compatible HTTP provider. The exact provider wire formats are not
//! this crate's concern; anything speaking the chat-completions shape plugs
//! in through the configuration.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use super::{ChatMessage, LlmClient, LlmOutput, ModelTier, TokenUsage};
use crate::core::config::{LlmConfig, ProviderDef};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub struct HttpLlmClient {
    def: ProviderDef,
    api_key: String,
    client: Client,
}

impl HttpLlmClient {
    pub fn new(def: ProviderDef, api_key: String) -> Self {
        Self {
            def,
            api_key,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    fn id(&self) -> &str {
        &self.def.id
    }

    fn tier(&self) -> ModelTier {
        if self.def.cheap {
            ModelTier::Cheap
        } else {
            ModelTier::Standard
        }
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        stream: Option<mpsc::Sender<String>>,
    ) -> Result<LlmOutput> {
        let wire_messages: Vec<WireMessage> = messages
            .iter()
            .map(|m| WireMessage {
                role: &m.role,
                content: &m.content,
            })
            .collect();
        let req = ChatRequest {
            model: &self.def.model,
            messages: wire_messages,
        };

        let res = self
            .client
            .post(&self.def.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&req)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "{} API error: {}",
                self.def.id,
                res.status()
            ));
        }
        let body: ChatResponse = res.json().await?;
        let text = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("{} returned no choices", self.def.id))?;

        if let Some(tx) = stream {
            let _ = tx.send(text.clone()).await;
        }

        let usage = body.usage.unwrap_or_default();
        Ok(LlmOutput {
            text,
            usage: TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            },
        })
    }
}

/// Build the client set from configuration, resolving each provider's API
/// key from the environment. Providers with missing keys are skipped, not
/// fatal; the pool simply has fewer clients until the next rebuild.
pub fn build_clients(config: &LlmConfig) -> Vec<Arc<dyn LlmClient>> {
    let mut out: Vec<Arc<dyn LlmClient>> = Vec::new();
    for def in &config.providers {
        match std::env::var(&def.api_key_env) {
            Ok(key) if !key.is_empty() => {
                out.push(Arc::new(HttpLlmClient::new(def.clone(), key)));
            }
            _ => warn!(
                "Provider [{}] skipped: {} is not set",
                def.id, def.api_key_env
            ),
        }
    }
    out
}
