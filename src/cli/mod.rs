//! Process entry: argument parsing, service construction, lifecycle.
//!
//! Every shared service (store, LLM pool, scheduler, coordinator) is built
//! here and injected; nothing is a process-wide global.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use crate::core::background::BackgroundTasks;
use crate::core::bus::InProcessBus;
use crate::core::clarify::ClarificationRegistry;
use crate::core::config::Config;
use crate::core::fanout::{AgentFanout, LlmAgentRunner};
use crate::core::lifecycle::LifecycleManager;
use crate::core::llm::LlmPool;
use crate::core::scheduler::JobScheduler;
use crate::core::store::Store;
use crate::core::swarm::SwarmCoordinator;
use crate::core::swarm::agent::LlmTaskRunner;
use crate::interfaces::web::{ApiServer, ApiServerConfig};
use crate::logging::LogRelayMakeWriter;

struct CliArgs {
    config_path: PathBuf,
    api_host: Option<String>,
    api_port: Option<u16>,
}

fn print_help() {
    println!("quorum - scheduling and coordination core");
    println!();
    println!("Usage: quorum [--config <path>] [--api-host <host>] [--api-port <port>]");
    println!();
    println!("  --config, -c   Path to config.toml (default: ./config.toml)");
    println!("  --api-host     Bind address for the API server");
    println!("  --api-port     Bind port for the API server");
}

fn parse_args(args: &[String]) -> CliArgs {
    let mut cli = CliArgs {
        config_path: PathBuf::from("config.toml"),
        api_host: None,
        api_port: None,
    };
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    cli.config_path = PathBuf::from(&args[i + 1]);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-host" => {
                if i + 1 < args.len() {
                    cli.api_host = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-port" => {
                if i + 1 < args.len() {
                    cli.api_port = args[i + 1].parse().ok();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    cli
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h" || a == "help") {
        print_help();
        return Ok(());
    }
    let cli = parse_args(&args);

    let (log_tx, _) = broadcast::channel::<String>(500);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(LogRelayMakeWriter {
            sender: log_tx.clone(),
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let config = Config::load(&cli.config_path).await?;
    let api_host = cli.api_host.unwrap_or_else(|| config.api.host.clone());
    let api_port = cli.api_port.unwrap_or(config.api.port);
    let shutdown = CancellationToken::new();

    let store = Arc::new(Store::open(config.api.data_dir.join("quorum.db"))?);
    let llm = LlmPool::new(config.llm.clone());
    llm.spawn_refresh_loop(shutdown.clone());

    // Conversational side: fanout executor behind the bounded scheduler.
    let clarifications = Arc::new(ClarificationRegistry::new());
    let background = Arc::new(BackgroundTasks::new(store.clone()));
    let fanout = Arc::new(AgentFanout::new(
        llm.clone(),
        store.clone(),
        clarifications.clone(),
        background,
        Arc::new(LlmAgentRunner),
        config.agents.clone(),
        Duration::from_secs(config.scheduler.clarification_timeout_secs),
    ));
    let scheduler = JobScheduler::new(fanout, config.scheduler.max_concurrent_jobs);

    // Swarm side: coordinator driven by the API and by bus control messages.
    let bus = Arc::new(InProcessBus::new());
    let runner = Arc::new(LlmTaskRunner::new(llm.clone()));
    let coordinator = SwarmCoordinator::new(store.clone(), bus, runner, config.swarm.clone());
    let (command_tx, command_rx) = mpsc::channel(32);
    coordinator.spawn_control_bridge(command_tx, shutdown.clone());
    coordinator.spawn_command_loop(command_rx, shutdown.clone());

    let api_server = ApiServer::new(ApiServerConfig {
        scheduler,
        clarifications,
        coordinator: coordinator.clone(),
        store,
        log_tx,
        api_host: api_host.clone(),
        api_port,
    });

    let mut lifecycle = LifecycleManager::new();
    lifecycle.attach(Arc::new(Mutex::new(api_server)));
    lifecycle.start().await?;
    info!("quorum core ready (API on {}:{})", api_host, api_port);

    tokio::signal::ctrl_c().await?;

    shutdown.cancel();
    for project in coordinator.running_projects().await {
        let _ = coordinator.stop_project(&project).await;
    }
    lifecycle.shutdown().await?;
    Ok(())
}
