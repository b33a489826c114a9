//! Production agent runner: one streamed model call, with optional
//! structured directives in the model output for clarification and
//! background work.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::{AgentRunner, SlotContext};
use crate::core::events::{ClarificationQuestion, JobEventKind};
use crate::core::llm::{ChatMessage, ModelTier};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the user directly and concisely.";
const HISTORY_WINDOW: usize = 20;

/// Extract a JSON block from model output. Tries fenced ```json ... ```
/// first, then raw JSON starting with `{`.
pub(crate) fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let content_start = start + 7;
        if let Some(end) = trimmed[content_start..].find("```") {
            let block = trimmed[content_start..content_start + end].trim();
            if !block.is_empty() {
                return Some(block);
            }
        }
    }
    if trimmed.starts_with('{') {
        return Some(trimmed);
    }
    None
}

#[derive(Debug, Deserialize)]
pub(crate) struct Directive {
    #[serde(default)]
    pub clarify: Option<Vec<WireQuestion>>,
    #[serde(default)]
    pub background: Option<BackgroundDirective>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireQuestion {
    pub key: String,
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BackgroundDirective {
    pub kind: String,
    pub prompt: String,
}

pub(crate) fn parse_directive(text: &str) -> Option<Directive> {
    let block = extract_json_block(text)?;
    let directive: Directive = serde_json::from_str(block).ok()?;
    if directive.clarify.is_none() && directive.background.is_none() {
        return None;
    }
    Some(directive)
}

pub struct LlmAgentRunner;

impl LlmAgentRunner {
    async fn build_messages(&self, ctx: &SlotContext) -> Result<Vec<ChatMessage>> {
        let system = ctx
            .agent
            .as_ref()
            .filter(|a| !a.system_prompt.is_empty())
            .map(|a| a.system_prompt.clone())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        let mut messages = vec![ChatMessage::system(system)];
        if let Some(user_id) = &ctx.job.user_id {
            messages.push(ChatMessage::system(format!(
                "Messages in this session come from user {user_id}."
            )));
        }
        for record in ctx
            .store
            .list_messages(&ctx.job.session_id, HISTORY_WINDOW)
            .await?
        {
            messages.push(ChatMessage {
                role: record.role,
                content: record.content,
            });
        }

        let mut user = ctx.job.message.clone();
        if !ctx.job.attachments.is_empty() {
            let listing = ctx
                .job
                .attachments
                .iter()
                .map(|a| format!("- {} ({}) {}", a.name, a.content_type, a.url))
                .collect::<Vec<_>>()
                .join("\n");
            user.push_str(&format!("\n\nAttachments:\n{listing}"));
        }
        messages.push(ChatMessage::user(user));
        Ok(messages)
    }

    /// Forward streamed chunks to the slot's event stream until the model
    /// call drops its sender.
    fn spawn_token_forwarder(
        ctx: &SlotContext,
    ) -> (mpsc::Sender<String>, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<String>(32);
        let emitter = ctx.events.clone();
        let handle = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                emitter.send(JobEventKind::Token { text }).await;
            }
        });
        (tx, handle)
    }
}

#[async_trait]
impl AgentRunner for LlmAgentRunner {
    async fn run(&self, ctx: SlotContext) -> Result<String> {
        if ctx.cancel.is_cancelled() {
            anyhow::bail!("Job was cancelled");
        }
        let mut messages = self.build_messages(&ctx).await?;

        let (tx, forwarder) = Self::spawn_token_forwarder(&ctx);
        let first = ctx
            .llm
            .generate(ModelTier::Standard, &messages, Some(tx))
            .await;
        let _ = forwarder.await;
        let first = first?;

        let Some(directive) = parse_directive(&first.text) else {
            return Ok(first.text);
        };

        if let Some(questions) = directive.clarify {
            let questions: Vec<ClarificationQuestion> = questions
                .into_iter()
                .map(|q| ClarificationQuestion {
                    key: q.key,
                    prompt: q.prompt,
                })
                .collect();
            // Suspends this slot until the user answers or the wait expires.
            let answers = ctx.clarify.request(questions).await?;

            messages.push(ChatMessage::assistant(first.text.clone()));
            messages.push(ChatMessage::user(format!(
                "Clarification answers: {}",
                serde_json::to_string(&answers)?
            )));
            let (tx, forwarder) = Self::spawn_token_forwarder(&ctx);
            let second = ctx
                .llm
                .generate(ModelTier::Standard, &messages, Some(tx))
                .await;
            let _ = forwarder.await;
            return Ok(second?.text);
        }

        if let Some(bg) = directive.background {
            let llm = ctx.llm.clone();
            let prompt = bg.prompt.clone();
            let task_id = ctx
                .background
                .spawn(&ctx.job.session_id, &bg.kind, async move {
                    let out = llm
                        .generate(ModelTier::Standard, &[ChatMessage::user(prompt)], None)
                        .await?;
                    Ok(out.text)
                })
                .await?;
            ctx.events
                .send(JobEventKind::BackgroundTaskStart {
                    task_id,
                    kind: bg.kind.clone(),
                })
                .await;
            return Ok(format!(
                "Started background {} work; the result will be posted here when ready.",
                bg.kind
            ));
        }

        Ok(first.text)
    }
}
