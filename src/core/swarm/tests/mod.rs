mod coordinator;
mod dispatching;
mod roles;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::agent::{SwarmAgentParams, TaskRunOutput, TaskRunner};
use super::dispatch::{DISPATCH_TOPIC, DispatchCorrelator, result_topic};
use super::*;
use crate::core::bus::{InProcessBus, MessageBus};
use crate::core::llm::{ModelTier, TokenUsage};
use crate::core::store::types::AgentRole;

/// Local fallback runner with scripted output, optional latency, and call
/// accounting.
pub(super) struct ScriptedTaskRunner {
    pub output: String,
    pub fail: bool,
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedTaskRunner {
    pub fn ok(output: &str) -> Arc<Self> {
        Arc::new(Self {
            output: output.to_string(),
            fail: false,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskRunner for ScriptedTaskRunner {
    async fn run_task(
        &self,
        _role_prompt: &str,
        task_prompt: &str,
        _tier: ModelTier,
    ) -> Result<TaskRunOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().await.push(task_prompt.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            anyhow::bail!("local execution failed");
        }
        Ok(TaskRunOutput {
            output: self.output.clone(),
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
        })
    }
}

/// Remote worker stub: answers every dispatch request on the task's reply
/// topic with a fixed payload. Subscribes before returning so no request
/// can slip past it.
pub(super) async fn spawn_responder(bus: Arc<InProcessBus>, reply: Value) -> JoinHandle<()> {
    let mut rx = bus.subscribe(DISPATCH_TOPIC).await;
    tokio::spawn(async move {
        while let Ok(request) = rx.recv().await {
            let Some(task_id) = request["taskId"].as_str() else {
                continue;
            };
            let topic = result_topic(task_id);
            let _ = bus.publish(&topic, reply.clone()).await;
        }
    })
}

pub(super) fn fast_swarm_config(dispatch_timeout_secs: u64) -> crate::core::config::SwarmConfig {
    crate::core::config::SwarmConfig {
        idle_poll_secs: 0,
        error_backoff_secs: 0,
        dispatch_timeout_secs,
        ..Default::default()
    }
}

pub(super) fn agent_params(
    id: &str,
    project_id: &str,
    role: AgentRole,
    store: Arc<crate::core::store::Store>,
    bus: Arc<InProcessBus>,
    correlator: Arc<DispatchCorrelator>,
    runner: Arc<dyn TaskRunner>,
    dispatch_timeout_secs: u64,
) -> SwarmAgentParams {
    SwarmAgentParams {
        id: id.to_string(),
        project_id: project_id.to_string(),
        role,
        store,
        bus,
        correlator,
        runner,
        config: fast_swarm_config(dispatch_timeout_secs),
        repo_url: "https://example.com/demo.git".to_string(),
        credentials: WorkerCredentials {
            token: "test-token".to_string(),
        },
        model_tier: ModelTier::Standard,
    }
}
