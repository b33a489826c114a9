//! Publish-and-wait hand-off of a task to a remote worker.
//!
//! The sender subscribes to the reply topic before publishing the request,
//! so a fast responder cannot slip its reply past us. Correlation is an
//! explicit table from task id to a waiting channel; the deterministic
//! reply-topic name is only the wire-level convention. The timeout path and
//! the arrival path race on removing the table entry, which makes teardown
//! exactly-once.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, oneshot};
use tracing::warn;

use crate::core::bus::MessageBus;
use crate::core::llm::TokenUsage;

/// Well-known topic remote workers watch for work.
pub const DISPATCH_TOPIC: &str = "dispatch.tasks";

/// Distinguished error value meaning "fall back locally, nothing is wrong".
pub const NO_CAPACITY: &str = "no_capacity";

pub fn result_topic(task_id: &str) -> String {
    format!("dispatch.result.{task_id}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub task_id: String,
    pub project_id: String,
    pub agent_id: String,
    pub role_prompt: String,
    pub container_config: WorkerContainerConfig,
    pub task_prompt: String,
    pub repo_url: String,
}

/// Description of the isolated environment a remote worker should create.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerContainerConfig {
    pub image: String,
    pub repo_path: String,
    pub work_dir: String,
    pub branch_name: String,
    pub env_vars: HashMap<String, String>,
    pub memory_limit: u64,
    pub cpu_limit: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub files_changed: i64,
    #[serde(default)]
    pub commits_created: i64,
    #[serde(default)]
    pub worker_id: String,
    #[serde(default)]
    pub tokens_used: DispatchTokens,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DispatchTokens {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
}

impl From<DispatchTokens> for TokenUsage {
    fn from(t: DispatchTokens) -> Self {
        TokenUsage {
            input_tokens: t.input,
            output_tokens: t.output,
        }
    }
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Completed(DispatchResult),
    /// No remote worker has room; run locally instead.
    NoCapacity,
    TimedOut,
}

pub struct DispatchCorrelator {
    bus: Arc<dyn MessageBus>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<DispatchResult>>>>,
}

impl DispatchCorrelator {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Publish `request` and await its correlated reply for at most `wait`.
    pub async fn dispatch(
        &self,
        request: &DispatchRequest,
        wait: Duration,
    ) -> Result<DispatchOutcome> {
        let task_id = request.task_id.clone();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.contains_key(&task_id) {
                bail!("Dispatch already in flight for task {}", task_id);
            }
            pending.insert(task_id.clone(), tx);
        }

        // Wire-level subscription goes up before the request is published.
        let mut sub = self.bus.subscribe(&result_topic(&task_id)).await;
        let relay = {
            let pending = self.pending.clone();
            let task_id = task_id.clone();
            tokio::spawn(async move {
                loop {
                    match sub.recv().await {
                        Ok(payload) => {
                            let result: DispatchResult = match serde_json::from_value(payload) {
                                Ok(result) => result,
                                Err(e) => {
                                    warn!(
                                        "Discarding malformed dispatch reply for task [{}]: {}",
                                        task_id, e
                                    );
                                    continue;
                                }
                            };
                            // Removing the entry is the settled flag shared
                            // with the timeout path.
                            if let Some(waiter) = pending.lock().await.remove(&task_id) {
                                let _ = waiter.send(result);
                            }
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        self.bus
            .publish(DISPATCH_TOPIC, serde_json::to_value(request)?)
            .await?;

        let outcome = match tokio::time::timeout(wait, rx).await {
            Ok(Ok(result)) => {
                if result.error.as_deref() == Some(NO_CAPACITY) {
                    DispatchOutcome::NoCapacity
                } else {
                    DispatchOutcome::Completed(result)
                }
            }
            // Sender dropped without a reply, or the clock ran out.
            Ok(Err(_)) | Err(_) => DispatchOutcome::TimedOut,
        };

        self.pending.lock().await.remove(&task_id);
        relay.abort();
        Ok(outcome)
    }
}

/// Sanitized git branch name derived from the task: lowercase, disallowed
/// characters replaced, separators collapsed and trimmed, length capped.
pub fn branch_name(task_id: &str, title: &str) -> String {
    let short_id: String = task_id.chars().take(8).collect();
    let mut slug = String::new();
    let mut last_separator = true;
    for c in title.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_separator = false;
        } else if !last_separator {
            slug.push('-');
            last_separator = true;
        }
    }
    let slug = slug.trim_end_matches('-');
    let mut name = if slug.is_empty() {
        format!("swarm/{short_id}")
    } else {
        format!("swarm/{short_id}-{slug}")
    };
    name.truncate(60);
    name.trim_end_matches('-').to_string()
}
