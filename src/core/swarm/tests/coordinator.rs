use super::*;
use crate::core::store::Store;
use crate::core::store::types::{AgentStatus, TaskType};
use crate::core::swarm::SwarmCoordinator;
use serde_json::json;
use tokio_util::sync::CancellationToken;

async fn coordinator_harness() -> (Arc<SwarmCoordinator>, Arc<Store>, Arc<InProcessBus>) {
    let store = Arc::new(Store::open_in_memory().unwrap());
    store
        .upsert_project("proj", "Demo", "https://example.com/demo.git")
        .await
        .unwrap();
    let bus = Arc::new(InProcessBus::new());
    let runner = ScriptedTaskRunner::ok("swarm output");
    let coordinator = SwarmCoordinator::new(
        store.clone(),
        bus.clone(),
        runner,
        fast_swarm_config(0),
    );
    (coordinator, store, bus)
}

async fn wait_for_project_status(store: &Store, project_id: &str, status: &str) -> bool {
    for _ in 0..200 {
        let project = store.get_project(project_id).await.unwrap().unwrap();
        if project.status == status {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

#[tokio::test]
async fn a_started_swarm_drains_the_backlog_to_completion() {
    let (coordinator, store, _bus) = coordinator_harness().await;
    for i in 0..3 {
        store
            .create_task("proj", &format!("Task {i}"), "", TaskType::Feature, i, &[])
            .await
            .unwrap();
    }

    coordinator
        .start_project(
            "proj",
            SwarmSettings {
                agents: Some(2),
                model_tier: ModelTier::Standard,
            },
        )
        .await
        .unwrap();
    assert_eq!(coordinator.running_projects().await, vec!["proj"]);

    assert!(wait_for_project_status(&store, "proj", "completed").await);
    let tasks = store.list_tasks("proj").await.unwrap();
    assert!(tasks.iter().all(|t| t.status.is_terminal()));

    // A drained swarm is reaped, so the project can be started again after
    // new work arrives.
    store
        .create_task("proj", "Late task", "", TaskType::Feature, 0, &[])
        .await
        .unwrap();
    store.set_project_status("proj", "ready").await.unwrap();
    coordinator
        .start_project("proj", SwarmSettings::default())
        .await
        .unwrap();
    assert!(wait_for_project_status(&store, "proj", "completed").await);
}

#[tokio::test]
async fn double_start_is_refused() {
    let (coordinator, store, _bus) = coordinator_harness().await;
    // An agent parked on unclaimable work keeps the swarm alive.
    store
        .create_task("proj", "Parked", "", TaskType::Documentation, 0, &[])
        .await
        .unwrap();

    let settings = SwarmSettings {
        agents: Some(2),
        model_tier: ModelTier::Standard,
    };
    coordinator
        .start_project("proj", settings.clone())
        .await
        .unwrap();
    let err = coordinator
        .start_project("proj", settings)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already has a running swarm"));

    coordinator.stop_project("proj").await.unwrap();
}

#[tokio::test]
async fn unknown_and_finished_projects_are_not_startable() {
    let (coordinator, store, _bus) = coordinator_harness().await;

    let err = coordinator
        .start_project("ghost", SwarmSettings::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Unknown project"));

    store
        .set_project_status("proj", "completed")
        .await
        .unwrap();
    let err = coordinator
        .start_project("proj", SwarmSettings::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("refusing to start"));
}

#[tokio::test]
async fn stop_signals_agents_and_broadcasts_cleanup() {
    let (coordinator, store, bus) = coordinator_harness().await;
    // Unclaimable work parks the agents in their waiting state.
    store
        .create_task("proj", "Parked", "", TaskType::Documentation, 0, &[])
        .await
        .unwrap();
    let mut cleanup_rx = bus.subscribe(CLEANUP_TOPIC).await;

    coordinator
        .start_project(
            "proj",
            SwarmSettings {
                agents: Some(2),
                model_tier: ModelTier::Standard,
            },
        )
        .await
        .unwrap();

    assert!(coordinator.stop_project("proj").await.unwrap());
    assert!(!coordinator.stop_project("proj").await.unwrap());
    assert!(coordinator.running_projects().await.is_empty());

    let cleanup = cleanup_rx.recv().await.unwrap();
    assert_eq!(cleanup, json!({ "projectId": "proj" }));

    let agents = store.list_agents("proj").await.unwrap();
    assert_eq!(agents.len(), 2);
    assert!(agents.iter().all(|a| a.status == AgentStatus::Stopped));
}

#[tokio::test]
async fn bus_control_messages_start_a_swarm() {
    let (coordinator, store, bus) = coordinator_harness().await;
    store
        .create_task("proj", "Bus task", "", TaskType::Feature, 0, &[])
        .await
        .unwrap();

    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let cancel = CancellationToken::new();
    coordinator.spawn_control_bridge(tx, cancel.clone());
    coordinator.spawn_command_loop(rx, cancel.clone());
    // Let the bridge's subscription come up before publishing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    bus.publish(
        crate::core::swarm::CONTROL_TOPIC,
        json!({ "action": "start", "projectId": "proj", "settings": { "agents": 1 } }),
    )
    .await
    .unwrap();

    assert!(wait_for_project_status(&store, "proj", "completed").await);
    cancel.cancel();
}

#[tokio::test]
async fn the_command_loop_drives_start_and_stop() {
    let (coordinator, store, _bus) = coordinator_harness().await;
    store
        .create_task("proj", "Loop task", "", TaskType::Feature, 0, &[])
        .await
        .unwrap();

    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let cancel = CancellationToken::new();
    coordinator.spawn_command_loop(rx, cancel.clone());

    tx.send(SwarmCommand::StartProject {
        project_id: "proj".to_string(),
        settings: SwarmSettings {
            agents: Some(1),
            model_tier: ModelTier::Standard,
        },
    })
    .await
    .unwrap();

    assert!(wait_for_project_status(&store, "proj", "completed").await);
    tx.send(SwarmCommand::StopProject {
        project_id: "proj".to_string(),
    })
    .await
    .unwrap();
    cancel.cancel();
}
