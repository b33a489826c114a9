//! Per-job resolution of one or more agent executions.
//!
//! A job names zero, one, or many target agents. Zero targets triggers a
//! cheap classification round-trip against the agent catalog; many targets
//! run concurrently as independent slots. One slot's failure never cancels
//! or corrupts a sibling's stream, and every emitted event is tagged with
//! the slot it belongs to so consumers can demultiplex.

mod runner;

#[cfg(test)]
mod tests;

pub use runner::LlmAgentRunner;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::core::background::BackgroundTasks;
use crate::core::clarify::{ClarificationAnswers, ClarificationRegistry};
use crate::core::config::AgentDef;
use crate::core::events::{ClarificationQuestion, JobEvent, JobEventKind, SlotEmitter};
use crate::core::llm::LlmPool;
use crate::core::scheduler::{JobContext, JobExecutor};
use crate::core::store::Store;

/// Slot tag for "no specific agent".
pub const NO_AGENT_SLOT: &str = "assistant";

/// Everything one agent slot needs to execute.
pub struct SlotContext {
    pub job: JobContext,
    pub agent: Option<AgentDef>,
    pub events: SlotEmitter,
    pub clarify: ClarificationHandle,
    pub llm: Arc<LlmPool>,
    pub store: Arc<Store>,
    pub background: Arc<BackgroundTasks>,
    pub cancel: CancellationToken,
}

/// Runs a single agent execution and returns its final output text.
/// Seam for tests; the production implementation is [`LlmAgentRunner`].
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, ctx: SlotContext) -> Result<String>;
}

/// Lets a running slot suspend on structured user input. The wait is
/// bounded: an unanswered request fails the slot instead of pinning its
/// resources forever.
pub struct ClarificationHandle {
    registry: Arc<ClarificationRegistry>,
    session_id: String,
    timeout: Duration,
    events: SlotEmitter,
}

impl ClarificationHandle {
    pub async fn request(
        &self,
        questions: Vec<ClarificationQuestion>,
    ) -> Result<ClarificationAnswers> {
        let rx = self.registry.register(&self.session_id).await;
        self.events
            .send(JobEventKind::ClarificationRequest { questions })
            .await;
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(answers)) => Ok(answers),
            Ok(Err(_)) => Err(anyhow!("Clarification request was superseded")),
            Err(_) => {
                self.registry.discard(&self.session_id).await;
                Err(anyhow!(
                    "Clarification request timed out after {}s",
                    self.timeout.as_secs()
                ))
            }
        }
    }
}

pub struct AgentFanout {
    llm: Arc<LlmPool>,
    store: Arc<Store>,
    clarifications: Arc<ClarificationRegistry>,
    background: Arc<BackgroundTasks>,
    runner: Arc<dyn AgentRunner>,
    catalog: Vec<AgentDef>,
    clarification_timeout: Duration,
}

impl AgentFanout {
    pub fn new(
        llm: Arc<LlmPool>,
        store: Arc<Store>,
        clarifications: Arc<ClarificationRegistry>,
        background: Arc<BackgroundTasks>,
        runner: Arc<dyn AgentRunner>,
        catalog: Vec<AgentDef>,
        clarification_timeout: Duration,
    ) -> Self {
        Self {
            llm,
            store,
            clarifications,
            background,
            runner,
            catalog,
            clarification_timeout,
        }
    }

    /// Explicit ids run as given (unknown ids still get a slot under their
    /// own name); with no ids, one classification round-trip picks at most
    /// one catalog agent, falling back to "no specific agent".
    async fn resolve_targets(&self, job: &JobContext) -> Vec<Option<AgentDef>> {
        if !job.agent_ids.is_empty() {
            return job
                .agent_ids
                .iter()
                .map(|id| {
                    Some(
                        self.catalog
                            .iter()
                            .find(|a| &a.id == id)
                            .cloned()
                            .unwrap_or_else(|| {
                                warn!("Job targets unknown agent [{}]", id);
                                AgentDef {
                                    id: id.clone(),
                                    name: id.clone(),
                                    description: String::new(),
                                    system_prompt: String::new(),
                                }
                            }),
                    )
                })
                .collect();
        }
        match self.llm.classify_agent(&job.message, &self.catalog).await {
            Some(id) => vec![self.catalog.iter().find(|a| a.id == id).cloned()],
            None => vec![None],
        }
    }

    async fn run_slot(store: Arc<Store>, runner: Arc<dyn AgentRunner>, ctx: SlotContext) {
        let emitter = ctx.events.clone();
        let session_id = ctx.job.session_id.clone();
        let agent_id = ctx.agent.as_ref().map(|a| a.id.clone());

        emitter.send(JobEventKind::AgentStart).await;
        match runner.run(ctx).await {
            Ok(output) => {
                // Persisted unconditionally: in-memory delivery already
                // happened and the caller's connection state does not gate
                // durability. A failed write is logged, not re-thrown.
                if let Err(e) = store
                    .append_message(&session_id, "assistant", agent_id.as_deref(), &output)
                    .await
                {
                    warn!(
                        "Failed to persist agent output for session [{}]: {}",
                        session_id, e
                    );
                }
                emitter.send(JobEventKind::Done).await;
            }
            Err(e) => {
                emitter
                    .send(JobEventKind::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        }
    }
}

#[async_trait]
impl JobExecutor for AgentFanout {
    async fn execute(
        &self,
        job: &JobContext,
        events: mpsc::Sender<JobEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let targets = self.resolve_targets(job).await;

        let mut slots = JoinSet::new();
        for agent in targets {
            let slot_name = agent
                .as_ref()
                .map(|a| a.id.clone())
                .unwrap_or_else(|| NO_AGENT_SLOT.to_string());
            let emitter = SlotEmitter::new(Some(slot_name), events.clone());
            let ctx = SlotContext {
                job: job.clone(),
                agent,
                events: emitter.clone(),
                clarify: ClarificationHandle {
                    registry: self.clarifications.clone(),
                    session_id: job.session_id.clone(),
                    timeout: self.clarification_timeout,
                    events: emitter,
                },
                llm: self.llm.clone(),
                store: self.store.clone(),
                background: self.background.clone(),
                cancel: cancel.clone(),
            };
            let store = self.store.clone();
            let runner = self.runner.clone();
            slots.spawn(async move { Self::run_slot(store, runner, ctx).await });
        }

        while let Some(joined) = slots.join_next().await {
            if let Err(e) = joined {
                // A panicking slot is isolated like any other slot failure.
                warn!("Agent slot task aborted: {}", e);
            }
        }
        Ok(())
    }
}
