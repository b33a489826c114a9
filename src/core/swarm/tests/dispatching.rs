use super::*;
use crate::core::swarm::dispatch::{
    DispatchOutcome, DispatchRequest, NO_CAPACITY, WorkerContainerConfig,
};
use serde_json::json;
use std::collections::HashMap;

fn request(task_id: &str) -> DispatchRequest {
    DispatchRequest {
        task_id: task_id.to_string(),
        project_id: "proj".to_string(),
        agent_id: "agent-1".to_string(),
        role_prompt: "be useful".to_string(),
        container_config: WorkerContainerConfig {
            image: "quorum-worker:latest".to_string(),
            repo_path: "/workspace/proj".to_string(),
            work_dir: "/workspace".to_string(),
            branch_name: "swarm/t1-demo".to_string(),
            env_vars: HashMap::new(),
            memory_limit: 2048,
            cpu_limit: 1.0,
        },
        task_prompt: "do the task".to_string(),
        repo_url: "https://example.com/demo.git".to_string(),
    }
}

fn success_reply() -> serde_json::Value {
    json!({
        "success": true,
        "merged": true,
        "output": "remote output",
        "filesChanged": 3,
        "commitsCreated": 2,
        "workerId": "worker-7",
        "tokensUsed": { "input": 120, "output": 40 }
    })
}

#[tokio::test]
async fn a_reply_resolves_the_waiting_dispatch() {
    let bus = Arc::new(InProcessBus::new());
    let correlator = DispatchCorrelator::new(bus.clone());
    let responder = spawn_responder(bus.clone(), success_reply()).await;

    let outcome = correlator
        .dispatch(&request("t-1"), Duration::from_secs(5))
        .await
        .unwrap();
    let DispatchOutcome::Completed(result) = outcome else {
        panic!("expected a completed dispatch");
    };
    assert!(result.success && result.merged);
    assert_eq!(result.worker_id, "worker-7");
    assert_eq!(result.files_changed, 3);
    assert_eq!(result.tokens_used.input, 120);

    // Settled: correlation entry gone, reply subscription torn down.
    assert_eq!(correlator.pending_count().await, 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(bus.subscriber_count(&result_topic("t-1")).await, 0);
    responder.abort();
}

#[tokio::test]
async fn timeout_tears_down_the_subscription_exactly_once() {
    let bus = Arc::new(InProcessBus::new());
    let correlator = DispatchCorrelator::new(bus.clone());

    let outcome = correlator
        .dispatch(&request("t-2"), Duration::from_millis(50))
        .await
        .unwrap();
    assert!(matches!(outcome, DispatchOutcome::TimedOut));

    assert_eq!(correlator.pending_count().await, 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(bus.subscriber_count(&result_topic("t-2")).await, 0);

    // A late reply after settlement is inert.
    bus.publish(&result_topic("t-2"), success_reply())
        .await
        .unwrap();
    assert_eq!(correlator.pending_count().await, 0);
}

#[tokio::test]
async fn no_capacity_is_a_fallback_signal_not_a_failure() {
    let bus = Arc::new(InProcessBus::new());
    let correlator = DispatchCorrelator::new(bus.clone());
    let responder = spawn_responder(
        bus.clone(),
        json!({ "success": false, "error": NO_CAPACITY }),
    )
    .await;

    let outcome = correlator
        .dispatch(&request("t-3"), Duration::from_secs(5))
        .await
        .unwrap();
    assert!(matches!(outcome, DispatchOutcome::NoCapacity));
    responder.abort();
}

#[tokio::test]
async fn a_second_in_flight_dispatch_for_the_same_task_is_rejected() {
    let bus = Arc::new(InProcessBus::new());
    let correlator = Arc::new(DispatchCorrelator::new(bus.clone()));

    let slow = {
        let correlator = correlator.clone();
        tokio::spawn(async move {
            correlator
                .dispatch(&request("t-4"), Duration::from_secs(5))
                .await
        })
    };
    // Wait for the first dispatch to take the correlation slot.
    for _ in 0..100 {
        if correlator.pending_count().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = correlator
        .dispatch(&request("t-4"), Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already in flight"));

    // Unblock the first dispatch once its reply subscription is up.
    for _ in 0..100 {
        if bus.subscriber_count(&result_topic("t-4")).await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    bus.publish(&result_topic("t-4"), success_reply())
        .await
        .unwrap();
    assert!(matches!(
        slow.await.unwrap().unwrap(),
        DispatchOutcome::Completed(_)
    ));
}

#[tokio::test]
async fn malformed_replies_are_skipped_until_a_real_one_arrives() {
    let bus = Arc::new(InProcessBus::new());
    let correlator = Arc::new(DispatchCorrelator::new(bus.clone()));

    let waiting = {
        let correlator = correlator.clone();
        tokio::spawn(async move {
            correlator
                .dispatch(&request("t-5"), Duration::from_secs(5))
                .await
        })
    };
    for _ in 0..100 {
        if bus.subscriber_count(&result_topic("t-5")).await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    bus.publish(&result_topic("t-5"), json!("not an object"))
        .await
        .unwrap();
    bus.publish(&result_topic("t-5"), success_reply())
        .await
        .unwrap();

    assert!(matches!(
        waiting.await.unwrap().unwrap(),
        DispatchOutcome::Completed(_)
    ));
}
