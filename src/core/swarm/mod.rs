//! Distributed swarm task coordination.
//!
//! The coordinator owns per-project swarms and reacts to start/stop
//! commands. Agents in a swarm claim tasks through the store's conditional
//! write and execute them remotely when a worker responds, locally when
//! none does. The atomic claim is the only cross-process correctness
//! guarantee; there is no lock service and no leader.

pub mod agent;
pub mod dispatch;
pub mod project;

#[cfg(test)]
mod tests;

use anyhow::{Result, anyhow, bail};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use agent::TaskRunner;
use dispatch::DispatchCorrelator;
use project::{ProjectSwarm, SwarmRuntime};

use crate::core::bus::MessageBus;
use crate::core::config::SwarmConfig;
use crate::core::llm::ModelTier;
use crate::core::store::Store;
use crate::core::store::types::ProjectRecord;

/// Topic carrying best-effort "clean up remote resources" notifications.
pub const CLEANUP_TOPIC: &str = "swarm.cleanup";

/// Topic external collaborators publish start/stop commands on.
pub const CONTROL_TOPIC: &str = "swarm.control";

#[derive(Debug, Clone, Deserialize)]
pub struct SwarmSettings {
    /// Agent count; the configured default applies when absent.
    #[serde(default)]
    pub agents: Option<usize>,
    #[serde(default)]
    pub model_tier: ModelTier,
}

impl Default for SwarmSettings {
    fn default() -> Self {
        Self {
            agents: None,
            model_tier: ModelTier::Standard,
        }
    }
}

#[derive(Debug)]
pub enum SwarmCommand {
    StartProject {
        project_id: String,
        settings: SwarmSettings,
    },
    StopProject {
        project_id: String,
    },
}

/// Credentials remote workers present back on the dispatch token; rotated
/// on every swarm start.
#[derive(Clone)]
pub struct WorkerCredentials {
    pub token: String,
}

pub struct SwarmCoordinator {
    store: Arc<Store>,
    bus: Arc<dyn MessageBus>,
    correlator: Arc<DispatchCorrelator>,
    runner: Arc<dyn TaskRunner>,
    config: SwarmConfig,
    swarms: Mutex<HashMap<String, ProjectSwarm>>,
}

impl SwarmCoordinator {
    pub fn new(
        store: Arc<Store>,
        bus: Arc<dyn MessageBus>,
        runner: Arc<dyn TaskRunner>,
        config: SwarmConfig,
    ) -> Arc<Self> {
        let correlator = Arc::new(DispatchCorrelator::new(bus.clone()));
        Arc::new(Self {
            store,
            bus,
            correlator,
            runner,
            config,
            swarms: Mutex::new(HashMap::new()),
        })
    }

    /// Translate control messages arriving on the bus into commands. Kept
    /// separate from the command loop so in-process callers and remote
    /// publishers share one code path.
    pub fn spawn_control_bridge(
        self: &Arc<Self>,
        commands: mpsc::Sender<SwarmCommand>,
        cancel: CancellationToken,
    ) {
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let mut rx = bus.subscribe(CONTROL_TOPIC).await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    message = rx.recv() => match message {
                        Ok(payload) => {
                            let Some(command) = parse_control_message(&payload) else {
                                warn!("Ignoring malformed swarm control message: {}", payload);
                                continue;
                            };
                            if commands.send(command).await.is_err() {
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
    }

    /// React to external start/stop signals until the shutdown token fires.
    pub fn spawn_command_loop(
        self: &Arc<Self>,
        mut commands: mpsc::Receiver<SwarmCommand>,
        cancel: CancellationToken,
    ) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    command = commands.recv() => match command {
                        Some(SwarmCommand::StartProject { project_id, settings }) => {
                            if let Err(e) = coordinator.start_project(&project_id, settings).await {
                                error!("Failed to start swarm for project [{}]: {}", project_id, e);
                            }
                        }
                        Some(SwarmCommand::StopProject { project_id }) => {
                            if let Err(e) = coordinator.stop_project(&project_id).await {
                                error!("Failed to stop swarm for project [{}]: {}", project_id, e);
                            }
                        }
                        None => break,
                    }
                }
            }
        });
    }

    pub async fn start_project(&self, project_id: &str, settings: SwarmSettings) -> Result<()> {
        let mut swarms = self.swarms.lock().await;
        // Swarms whose agents all drained their backlog are done; reap them
        // so the project can be started again later.
        swarms.retain(|_, swarm| !swarm.is_finished());
        if swarms.contains_key(project_id) {
            bail!("Project {} already has a running swarm", project_id);
        }

        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| anyhow!("Unknown project {}", project_id))?;
        if !project.is_startable() {
            bail!(
                "Project {} is {}; refusing to start a swarm",
                project_id,
                project.status
            );
        }

        let credentials = self.provision_worker_credentials(&project).await;
        let runtime = SwarmRuntime {
            store: self.store.clone(),
            bus: self.bus.clone(),
            correlator: self.correlator.clone(),
            runner: self.runner.clone(),
            config: self.config.clone(),
        };
        let swarm = ProjectSwarm::launch(&project, &settings, &runtime, credentials).await?;
        self.store
            .set_project_status(project_id, "in_progress")
            .await?;
        info!(
            "Swarm started for project [{}] with {} agents",
            project_id,
            swarm.agent_count()
        );
        swarms.insert(project_id.to_string(), swarm);
        Ok(())
    }

    /// Returns false when no swarm was running for the project.
    pub async fn stop_project(&self, project_id: &str) -> Result<bool> {
        let swarm = self.swarms.lock().await.remove(project_id);
        let Some(swarm) = swarm else {
            return Ok(false);
        };
        swarm.signal_stop();
        self.store.stop_all_agents(project_id).await?;
        // Best-effort remote teardown; a failure here is logged, never
        // surfaced as the stop's result.
        if let Err(e) = self
            .bus
            .publish(CLEANUP_TOPIC, json!({ "projectId": project_id }))
            .await
        {
            warn!(
                "Cleanup broadcast for project [{}] failed: {}",
                project_id, e
            );
        }
        info!("Swarm stopped for project [{}]", project_id);
        Ok(true)
    }

    pub async fn running_projects(&self) -> Vec<String> {
        self.swarms.lock().await.keys().cloned().collect()
    }

    /// Cross-node credentials for remote dispatch, rotated per swarm start.
    /// Workers echo the token back with results; the deterministic reply
    /// topics stay unauthenticated inside the bus.
    async fn provision_worker_credentials(&self, project: &ProjectRecord) -> WorkerCredentials {
        let token = uuid::Uuid::new_v4().to_string();
        info!(
            "Provisioned dispatch credentials for project [{}]",
            project.id
        );
        WorkerCredentials { token }
    }
}

fn parse_control_message(payload: &serde_json::Value) -> Option<SwarmCommand> {
    let action = payload.get("action")?.as_str()?;
    let project_id = payload.get("projectId")?.as_str()?.to_string();
    match action {
        "start" => {
            let settings = payload
                .get("settings")
                .and_then(|s| serde_json::from_value(s.clone()).ok())
                .unwrap_or_default();
            Some(SwarmCommand::StartProject {
                project_id,
                settings,
            })
        }
        "stop" => Some(SwarmCommand::StopProject { project_id }),
        _ => None,
    }
}
