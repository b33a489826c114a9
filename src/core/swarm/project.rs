//! One project's swarm: a fixed set of role-assigned agents, each running
//! its own non-blocking loop.

use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::agent::{SwarmAgent, SwarmAgentParams, TaskRunner};
use super::dispatch::DispatchCorrelator;
use super::{SwarmSettings, WorkerCredentials};
use crate::core::bus::MessageBus;
use crate::core::config::SwarmConfig;
use crate::core::store::Store;
use crate::core::store::types::{AgentRole, ProjectRecord};

/// Collaborators every agent in a swarm shares.
pub struct SwarmRuntime {
    pub store: Arc<Store>,
    pub bus: Arc<dyn MessageBus>,
    pub correlator: Arc<DispatchCorrelator>,
    pub runner: Arc<dyn TaskRunner>,
    pub config: SwarmConfig,
}

/// Split N agents into a majority general pool plus specialists as the
/// count crosses each threshold: one `qa` from 2 agents, one
/// `documentation` from 4, one `code_quality` from 6.
pub fn assign_roles(count: usize) -> Vec<AgentRole> {
    let mut specialists = Vec::new();
    if count >= 2 {
        specialists.push(AgentRole::Qa);
    }
    if count >= 4 {
        specialists.push(AgentRole::Documentation);
    }
    if count >= 6 {
        specialists.push(AgentRole::CodeQuality);
    }
    let mut roles = vec![AgentRole::General; count - specialists.len()];
    roles.extend(specialists);
    roles
}

pub struct ProjectSwarm {
    project_id: String,
    cancel: CancellationToken,
    agents: Vec<JoinHandle<()>>,
}

impl ProjectSwarm {
    pub async fn launch(
        project: &ProjectRecord,
        settings: &SwarmSettings,
        runtime: &SwarmRuntime,
        credentials: WorkerCredentials,
    ) -> Result<Self> {
        let count = settings
            .agents
            .unwrap_or(runtime.config.default_agent_count)
            .max(1);
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        for (i, role) in assign_roles(count).into_iter().enumerate() {
            let agent_id = format!("{}-agent-{}", project.id, i + 1);
            runtime
                .store
                .register_agent(&agent_id, &project.id, role)
                .await?;
            let agent = SwarmAgent::new(SwarmAgentParams {
                id: agent_id,
                project_id: project.id.clone(),
                role,
                store: runtime.store.clone(),
                bus: runtime.bus.clone(),
                correlator: runtime.correlator.clone(),
                runner: runtime.runner.clone(),
                config: runtime.config.clone(),
                repo_url: project.repo_url.clone(),
                credentials: credentials.clone(),
                model_tier: settings.model_tier,
            });
            let token = cancel.clone();
            handles.push(tokio::spawn(async move { agent.run(token).await }));
        }

        Ok(Self {
            project_id: project.id.clone(),
            cancel,
            agents: handles,
        })
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Signal every agent loop to exit. Not awaited: loops notice the token
    /// at their next suspension point.
    pub fn signal_stop(&self) {
        info!("Signalling swarm for project [{}] to stop", self.project_id);
        self.cancel.cancel();
    }

    /// True once every agent loop has exited (backlog drained or stopped).
    pub fn is_finished(&self) -> bool {
        self.agents.iter().all(|h| h.is_finished())
    }
}
