//! Bounded-concurrency FIFO scheduler for conversational jobs.
//!
//! Jobs under the cap start immediately; the rest queue in submission order.
//! Draining is self-sustaining: every settlement triggers the next drain
//! attempt, so no external poller exists.
//!
//! Cancellation is two-tiered by design. The caller's token typically means
//! "the network connection to the user is still open" and is checked only
//! before a job starts; it is deliberately not wired into the execution's
//! own token. A job that has started must run to completion and durably
//! record its result even if the caller goes away — losing results on
//! disconnect is a correctness bug, not a feature. Only an explicit
//! `cancel(job_id)` aborts an in-flight execution.


use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::events::{JobEvent, JobOutcome};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub url: String,
    #[serde(default)]
    pub size: u64,
}

/// Immutable description of one unit of conversational work, handed to the
/// executor once the job starts.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    pub session_id: String,
    pub message: String,
    pub user_id: Option<String>,
    pub agent_ids: Vec<String>,
    pub attachments: Vec<Attachment>,
}

pub struct JobRequest {
    /// Caller-supplied id; generated when absent.
    pub job_id: Option<String>,
    pub session_id: String,
    pub message: String,
    pub user_id: Option<String>,
    pub agent_ids: Vec<String>,
    pub attachments: Vec<Attachment>,
    pub events: mpsc::Sender<JobEvent>,
    pub completion: oneshot::Sender<JobOutcome>,
    /// Tied to the caller's connection lifetime. Checked before start only.
    pub caller_token: Option<CancellationToken>,
}

#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(
        &self,
        job: &JobContext,
        events: mpsc::Sender<JobEvent>,
        cancel: CancellationToken,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct QueueSnapshot {
    pub active: usize,
    pub queued: usize,
    pub total_processed: u64,
    pub limit: usize,
}

struct QueuedJob {
    ctx: JobContext,
    events: mpsc::Sender<JobEvent>,
    completion: oneshot::Sender<JobOutcome>,
    caller_token: Option<CancellationToken>,
}

impl QueuedJob {
    /// Terminal path for jobs that never start: cancellation event, then the
    /// completion callback, exactly once.
    async fn settle_cancelled(self, message: &str) {
        let _ = self
            .events
            .send(JobEvent::error(None, message.to_string()))
            .await;
        let _ = self.completion.send(JobOutcome {
            job_id: self.ctx.job_id.clone(),
            cancelled: true,
            error: Some(message.to_string()),
        });
    }
}

struct ActiveJob {
    cancel: CancellationToken,
}

struct SchedulerState {
    queue: VecDeque<QueuedJob>,
    active: HashMap<String, ActiveJob>,
    limit: usize,
    total_processed: u64,
}

enum DrainAction {
    Idle,
    Skip(QueuedJob),
    Start(QueuedJob, CancellationToken),
}

pub struct JobScheduler {
    executor: Arc<dyn JobExecutor>,
    state: Mutex<SchedulerState>,
}

impl JobScheduler {
    pub fn new(executor: Arc<dyn JobExecutor>, limit: usize) -> Arc<Self> {
        Arc::new(Self {
            executor,
            state: Mutex::new(SchedulerState {
                queue: VecDeque::new(),
                active: HashMap::new(),
                limit: limit.max(1),
                total_processed: 0,
            }),
        })
    }

    pub async fn submit(self: &Arc<Self>, request: JobRequest) -> Result<String> {
        if request.session_id.trim().is_empty() {
            return Err(anyhow!("Job is missing a session id"));
        }
        if request.message.trim().is_empty() {
            return Err(anyhow!("Job message is empty"));
        }

        let job_id = request
            .job_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let job = QueuedJob {
            ctx: JobContext {
                job_id: job_id.clone(),
                session_id: request.session_id,
                message: request.message,
                user_id: request.user_id,
                agent_ids: request.agent_ids,
                attachments: request.attachments,
            },
            events: request.events,
            completion: request.completion,
            caller_token: request.caller_token,
        };

        // Dead on arrival: the caller was already gone at submission. The
        // job never enters the queue.
        if job
            .caller_token
            .as_ref()
            .is_some_and(|t| t.is_cancelled())
        {
            job.settle_cancelled("Job was cancelled before it was queued")
                .await;
            return Ok(job_id);
        }

        self.state.lock().await.queue.push_back(job);
        self.drain().await;
        Ok(job_id)
    }

    /// Two-tier cancel: a still-queued job is removed with a synthesized
    /// cancellation event; a running job gets its execution-scoped signal
    /// triggered. Returns false when the id is unknown (or already settled).
    pub async fn cancel(self: &Arc<Self>, job_id: &str) -> bool {
        let queued = {
            let mut state = self.state.lock().await;
            if let Some(pos) = state.queue.iter().position(|j| j.ctx.job_id == job_id) {
                state.queue.remove(pos)
            } else if let Some(active) = state.active.get(job_id) {
                active.cancel.cancel();
                return true;
            } else {
                return false;
            }
        };
        if let Some(job) = queued {
            job.settle_cancelled("Job was cancelled while queued").await;
            return true;
        }
        false
    }

    pub async fn set_concurrency_limit(self: &Arc<Self>, limit: usize) {
        {
            let mut state = self.state.lock().await;
            state.limit = limit.max(1);
            info!("Scheduler concurrency limit set to {}", state.limit);
        }
        // Capacity may have grown; pull queued work immediately.
        self.drain().await;
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock().await;
        QueueSnapshot {
            active: state.active.len(),
            queued: state.queue.len(),
            total_processed: state.total_processed,
            limit: state.limit,
        }
    }

    async fn drain(self: &Arc<Self>) {
        loop {
            let action = {
                let mut state = self.state.lock().await;
                if state.active.len() >= state.limit || state.queue.is_empty() {
                    DrainAction::Idle
                } else {
                    let job = match state.queue.pop_front() {
                        Some(job) => job,
                        None => return,
                    };
                    if job
                        .caller_token
                        .as_ref()
                        .is_some_and(|t| t.is_cancelled())
                    {
                        DrainAction::Skip(job)
                    } else {
                        let cancel = CancellationToken::new();
                        state.active.insert(
                            job.ctx.job_id.clone(),
                            ActiveJob {
                                cancel: cancel.clone(),
                            },
                        );
                        DrainAction::Start(job, cancel)
                    }
                }
            };
            match action {
                DrainAction::Idle => return,
                DrainAction::Skip(job) => {
                    job.settle_cancelled("Job was cancelled while queued").await;
                }
                DrainAction::Start(job, cancel) => self.start_job(job, cancel),
            }
        }
    }

    fn start_job(self: &Arc<Self>, job: QueuedJob, cancel: CancellationToken) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let QueuedJob {
                ctx,
                events,
                completion,
                ..
            } = job;

            let result = tokio::select! {
                res = scheduler.executor.execute(&ctx, events.clone(), cancel.clone()) => res,
                _ = cancel.cancelled() => Err(anyhow!("Job was cancelled")),
            };

            let cancelled = cancel.is_cancelled();
            let error = match result {
                Ok(()) => None,
                Err(e) => {
                    let message = e.to_string();
                    warn!("Job [{}] finished with error: {}", ctx.job_id, message);
                    let _ = events.send(JobEvent::error(None, message.clone())).await;
                    Some(message)
                }
            };

            {
                let mut state = scheduler.state.lock().await;
                state.active.remove(&ctx.job_id);
                state.total_processed += 1;
            }
            let _ = completion.send(JobOutcome {
                job_id: ctx.job_id.clone(),
                cancelled,
                error,
            });
            // Each settlement pulls the next queued job, which keeps the
            // drain self-sustaining.
            scheduler.drain().await;
        });
    }
}
