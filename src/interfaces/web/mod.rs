mod handlers;
mod router;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};
use tracing::info;

use crate::core::clarify::ClarificationRegistry;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::scheduler::JobScheduler;
use crate::core::store::Store;
use crate::core::swarm::SwarmCoordinator;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) scheduler: Arc<JobScheduler>,
    pub(crate) clarifications: Arc<ClarificationRegistry>,
    pub(crate) coordinator: Arc<SwarmCoordinator>,
    pub(crate) store: Arc<Store>,
    pub(crate) log_tx: tokio::sync::broadcast::Sender<String>,
}

pub struct ApiServerConfig {
    pub scheduler: Arc<JobScheduler>,
    pub clarifications: Arc<ClarificationRegistry>,
    pub coordinator: Arc<SwarmCoordinator>,
    pub store: Arc<Store>,
    pub log_tx: tokio::sync::broadcast::Sender<String>,
    pub api_host: String,
    pub api_port: u16,
}

pub struct ApiServer {
    state: AppState,
    api_host: String,
    api_port: u16,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            state: AppState {
                scheduler: config.scheduler,
                clarifications: config.clarifications,
                coordinator: config.coordinator,
                store: config.store,
                log_tx: config.log_tx,
            },
            api_host: config.api_host,
            api_port: config.api_port,
        }
    }
}

// --- SSE log relay (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(line) => Ok(Event::default().data(line)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });
    Sse::new(stream)
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API Server initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let state = self.state.clone();
        let addr = format!("{}:{}", self.api_host, self.api_port);
        tokio::spawn(async move {
            let app = router::build_api_router(state);
            if let Ok(listener) = tokio::net::TcpListener::bind(&addr).await {
                info!("API Server running at http://{addr}");
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!("API Server crashed: {}", e);
                }
            } else {
                tracing::error!("API Server failed to bind {addr}");
            }
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server shutting down...");
        Ok(())
    }
}
