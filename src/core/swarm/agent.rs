//! The autonomous agent loop: claim, execute, report, repeat.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::dispatch::{
    DispatchCorrelator, DispatchOutcome, DispatchRequest, DispatchResult, WorkerContainerConfig,
    branch_name,
};
use super::{CLEANUP_TOPIC, WorkerCredentials};
use crate::core::bus::MessageBus;
use crate::core::config::SwarmConfig;
use crate::core::llm::{ChatMessage, LlmPool, ModelTier, TokenUsage};
use crate::core::store::Store;
use crate::core::store::types::{AgentRole, AgentStatus, TaskRecord};

/// Local fallback execution seam: runs a task in-process when no remote
/// worker takes it.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(
        &self,
        role_prompt: &str,
        task_prompt: &str,
        tier: ModelTier,
    ) -> Result<TaskRunOutput>;
}

pub struct TaskRunOutput {
    pub output: String,
    pub usage: TokenUsage,
}

pub struct LlmTaskRunner {
    llm: Arc<LlmPool>,
}

impl LlmTaskRunner {
    pub fn new(llm: Arc<LlmPool>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl TaskRunner for LlmTaskRunner {
    async fn run_task(
        &self,
        role_prompt: &str,
        task_prompt: &str,
        tier: ModelTier,
    ) -> Result<TaskRunOutput> {
        let messages = [
            ChatMessage::system(role_prompt.to_string()),
            ChatMessage::user(task_prompt.to_string()),
        ];
        let out = self.llm.generate(tier, &messages, None).await?;
        Ok(TaskRunOutput {
            output: out.text,
            usage: out.usage,
        })
    }
}

pub fn role_system_prompt(role: AgentRole) -> &'static str {
    match role {
        AgentRole::General => {
            "You are a software engineer on an autonomous team. Implement the assigned task \
             completely, including tests where they apply, and report what you changed."
        }
        AgentRole::Qa => {
            "You are a QA engineer on an autonomous team. Write and run tests for the assigned \
             task, and report every defect you find with reproduction steps."
        }
        AgentRole::Documentation => {
            "You are a technical writer on an autonomous team. Produce accurate, concise \
             documentation for the assigned task."
        }
        AgentRole::CodeQuality => {
            "You are a code quality reviewer on an autonomous team. Fix the assigned defect or \
             review finding without changing unrelated behavior."
        }
        AgentRole::Architecture => {
            "You are a software architect on an autonomous team. Resolve the assigned task with \
             attention to system-wide structure and interfaces."
        }
    }
}

pub fn compose_task_prompt(task: &TaskRecord) -> String {
    let mut parts = Vec::new();
    parts.push(format!(
        "# YOUR TASK ({}): {}\n",
        task.task_type.as_str(),
        task.title
    ));
    parts.push(
        "## SCOPE\nYou are responsible for this task only. Other agents handle their own \
         tasks in parallel.\n"
            .to_string(),
    );
    if !task.description.is_empty() {
        parts.push(format!("## Description\n{}\n", task.description));
    }
    parts.join("\n")
}

enum LoopStep {
    /// Backlog drained; the loop may exit.
    Finished,
    Worked,
    Idle,
}

enum Execution {
    Completed { output: String, usage: TokenUsage },
    /// Remote work landed but could not be merged. Retriable: the remote
    /// side keeps the environment alive for conflict resolution.
    MergeConflict { message: String },
}

pub struct SwarmAgentParams {
    pub id: String,
    pub project_id: String,
    pub role: AgentRole,
    pub store: Arc<Store>,
    pub bus: Arc<dyn MessageBus>,
    pub correlator: Arc<DispatchCorrelator>,
    pub runner: Arc<dyn TaskRunner>,
    pub config: SwarmConfig,
    pub repo_url: String,
    pub credentials: WorkerCredentials,
    pub model_tier: ModelTier,
}

pub struct SwarmAgent {
    id: String,
    project_id: String,
    role: AgentRole,
    store: Arc<Store>,
    bus: Arc<dyn MessageBus>,
    correlator: Arc<DispatchCorrelator>,
    runner: Arc<dyn TaskRunner>,
    config: SwarmConfig,
    repo_url: String,
    credentials: WorkerCredentials,
    model_tier: ModelTier,
}

impl SwarmAgent {
    pub fn new(params: SwarmAgentParams) -> Self {
        Self {
            id: params.id,
            project_id: params.project_id,
            role: params.role,
            store: params.store,
            bus: params.bus,
            correlator: params.correlator,
            runner: params.runner,
            config: params.config,
            repo_url: params.repo_url,
            credentials: params.credentials,
            model_tier: params.model_tier,
        }
    }

    /// Unbounded loop; a single task's failure never terminates it. Exits
    /// when the backlog drains or the swarm's stop signal fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "Swarm agent [{}] ({}) starting for project [{}]",
            self.id,
            self.role.as_str(),
            self.project_id
        );
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.step().await {
                Ok(LoopStep::Finished) => break,
                Ok(LoopStep::Worked) => {}
                Ok(LoopStep::Idle) => {
                    if pause(&cancel, Duration::from_secs(self.config.idle_poll_secs)).await {
                        break;
                    }
                }
                Err(e) => {
                    error!("Swarm agent [{}] iteration failed: {}", self.id, e);
                    if pause(&cancel, Duration::from_secs(self.config.error_backoff_secs)).await {
                        break;
                    }
                }
            }
        }
        if let Err(e) = self
            .store
            .set_agent_status(&self.id, AgentStatus::Stopped, None)
            .await
        {
            warn!("Failed to mark agent [{}] stopped: {}", self.id, e);
        }
        info!("Swarm agent [{}] stopped", self.id);
    }

    async fn step(&self) -> Result<LoopStep> {
        if self.store.open_task_count(&self.project_id).await? == 0 {
            self.store
                .set_agent_status(&self.id, AgentStatus::Idle, None)
                .await?;
            if self
                .store
                .all_agents_idle_or_stopped(&self.project_id)
                .await?
            {
                self.store
                    .set_project_status(&self.project_id, "completed")
                    .await?;
                info!(
                    "Project [{}] backlog drained; marked completed",
                    self.project_id
                );
            }
            return Ok(LoopStep::Finished);
        }

        let Some(task) = self.claim_next_task().await? else {
            self.store
                .set_agent_status(&self.id, AgentStatus::Waiting, None)
                .await?;
            return Ok(LoopStep::Idle);
        };

        self.store
            .set_agent_status(&self.id, AgentStatus::Working, Some(&task.id))
            .await?;
        let started = Instant::now();
        match self.execute_task(&task).await {
            Ok(Execution::Completed { output, usage }) => {
                self.store.complete_task(&task.id, &output).await?;
                self.store
                    .record_task_success(
                        &self.id,
                        usage.input_tokens as i64,
                        usage.output_tokens as i64,
                        started.elapsed().as_secs_f64(),
                    )
                    .await?;
                info!("Task [{}] completed by agent [{}]", task.id, self.id);
            }
            Ok(Execution::MergeConflict { message }) => {
                // Distinct retriable failure mode: no cleanup broadcast, the
                // remote environment is intentionally left running.
                self.store.fail_task(&task.id, &message).await?;
                self.store.record_task_failure(&self.id).await?;
                warn!("Task [{}] hit a merge conflict: {}", task.id, message);
            }
            Err(e) => {
                self.store.fail_task(&task.id, &e.to_string()).await?;
                self.store.record_task_failure(&self.id).await?;
                error!("Task [{}] failed on agent [{}]: {}", task.id, self.id, e);
                self.notify_cleanup(&task.id).await;
            }
        }
        self.store
            .set_agent_status(&self.id, AgentStatus::Idle, None)
            .await?;
        Ok(LoopStep::Worked)
    }

    /// Scan candidates in priority order and race on the conditional claim.
    /// A lost race just moves on to the next candidate.
    async fn claim_next_task(&self) -> Result<Option<TaskRecord>> {
        let completed = self.store.completed_task_ids(&self.project_id).await?;
        for task in self.store.list_pending_tasks(&self.project_id).await? {
            if !self.role.allows(task.task_type) {
                continue;
            }
            if !task.dependencies.iter().all(|dep| completed.contains(dep)) {
                continue;
            }
            if self.store.claim_task(&task.id, &self.id).await? {
                self.store.mark_task_in_progress(&task.id, &self.id).await?;
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    /// Remote-first with local fallback.
    async fn execute_task(&self, task: &TaskRecord) -> Result<Execution> {
        let request = self.build_dispatch_request(task);
        let wait = Duration::from_secs(self.config.dispatch_timeout_secs);
        match self.correlator.dispatch(&request, wait).await? {
            DispatchOutcome::Completed(result) => self.interpret_remote_result(result),
            DispatchOutcome::NoCapacity => {
                warn!(
                    "No remote capacity for task [{}]; executing locally",
                    task.id
                );
                self.run_locally(task).await
            }
            DispatchOutcome::TimedOut => {
                warn!("Dispatch timed out for task [{}]; executing locally", task.id);
                self.run_locally(task).await
            }
        }
    }

    fn interpret_remote_result(&self, result: DispatchResult) -> Result<Execution> {
        if result.success && result.merged {
            Ok(Execution::Completed {
                output: format!(
                    "{}\n\n[worker {}: {} files changed, {} commits]",
                    result.output, result.worker_id, result.files_changed, result.commits_created
                ),
                usage: result.tokens_used.into(),
            })
        } else if result.success {
            Ok(Execution::MergeConflict {
                message: format!(
                    "Remote work by worker {} could not be merged; \
                     environment kept alive for a conflict-resolution retry",
                    result.worker_id
                ),
            })
        } else {
            Err(anyhow!(
                "Remote execution failed: {}",
                result
                    .error
                    .unwrap_or_else(|| "unknown worker error".to_string())
            ))
        }
    }

    async fn run_locally(&self, task: &TaskRecord) -> Result<Execution> {
        let out = self
            .runner
            .run_task(
                role_system_prompt(self.role),
                &compose_task_prompt(task),
                self.model_tier,
            )
            .await?;
        Ok(Execution::Completed {
            output: out.output,
            usage: out.usage,
        })
    }

    fn build_dispatch_request(&self, task: &TaskRecord) -> DispatchRequest {
        let mut env_vars = HashMap::new();
        env_vars.insert("QUORUM_PROJECT_ID".to_string(), self.project_id.clone());
        env_vars.insert("QUORUM_TASK_ID".to_string(), task.id.clone());
        env_vars.insert(
            "QUORUM_DISPATCH_TOKEN".to_string(),
            self.credentials.token.clone(),
        );
        DispatchRequest {
            task_id: task.id.clone(),
            project_id: self.project_id.clone(),
            agent_id: self.id.clone(),
            role_prompt: role_system_prompt(self.role).to_string(),
            container_config: WorkerContainerConfig {
                image: self.config.worker_image.clone(),
                repo_path: format!("/workspace/{}", self.project_id),
                work_dir: "/workspace".to_string(),
                branch_name: branch_name(&task.id, &task.title),
                env_vars,
                memory_limit: self.config.memory_limit_mb,
                cpu_limit: self.config.cpu_limit,
            },
            task_prompt: compose_task_prompt(task),
            repo_url: self.repo_url.clone(),
        }
    }

    /// Best-effort: a failed cleanup broadcast is logged and can never mask
    /// the error that triggered it.
    async fn notify_cleanup(&self, task_id: &str) {
        let payload = json!({ "projectId": self.project_id, "taskId": task_id });
        if let Err(e) = self.bus.publish(CLEANUP_TOPIC, payload).await {
            warn!(
                "Remote cleanup notification failed for task [{}]: {}",
                task_id, e
            );
        }
    }
}

/// Sleep with a small jitter so a fleet of waiting agents does not hammer
/// the store in lockstep. Returns true when the stop signal fired.
async fn pause(cancel: &CancellationToken, base: Duration) -> bool {
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(base + jitter) => false,
    }
}
