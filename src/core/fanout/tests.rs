use super::runner::{extract_json_block, parse_directive};
use super::*;
use crate::core::llm::tests::ScriptedLlm;
use crate::core::llm::ModelTier;
use std::collections::HashMap;
use std::time::Duration;

/// Runner scripted per agent id: `Ok` text or an error message.
struct MockRunner {
    outcomes: HashMap<String, Result<String, String>>,
}

#[async_trait]
impl AgentRunner for MockRunner {
    async fn run(&self, ctx: SlotContext) -> Result<String> {
        let key = ctx
            .agent
            .as_ref()
            .map(|a| a.id.clone())
            .unwrap_or_else(|| NO_AGENT_SLOT.to_string());
        match self.outcomes.get(&key) {
            Some(Ok(text)) => Ok(text.clone()),
            Some(Err(message)) => Err(anyhow!("{message}")),
            None => Ok(String::new()),
        }
    }
}

/// Runner that immediately suspends on a clarification and echoes the
/// answer back.
struct ClarifyingRunner;

#[async_trait]
impl AgentRunner for ClarifyingRunner {
    async fn run(&self, ctx: SlotContext) -> Result<String> {
        let answers = ctx
            .clarify
            .request(vec![ClarificationQuestion {
                key: "color".to_string(),
                prompt: "Which color?".to_string(),
            }])
            .await?;
        Ok(format!(
            "picked {}",
            answers.get("color").cloned().unwrap_or_default()
        ))
    }
}

fn agent_def(id: &str, name: &str) -> AgentDef {
    AgentDef {
        id: id.to_string(),
        name: name.to_string(),
        description: String::new(),
        system_prompt: String::new(),
    }
}

struct Harness {
    fanout: AgentFanout,
    store: Arc<Store>,
    clarifications: Arc<ClarificationRegistry>,
}

fn harness(
    runner: Arc<dyn AgentRunner>,
    catalog: Vec<AgentDef>,
    llm: Arc<LlmPool>,
    clarification_timeout: Duration,
) -> Harness {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let clarifications = Arc::new(ClarificationRegistry::new());
    let background = Arc::new(BackgroundTasks::new(store.clone()));
    let fanout = AgentFanout::new(
        llm,
        store.clone(),
        clarifications.clone(),
        background,
        runner,
        catalog,
        clarification_timeout,
    );
    Harness {
        fanout,
        store,
        clarifications,
    }
}

fn job(agent_ids: &[&str]) -> JobContext {
    JobContext {
        job_id: "job-1".to_string(),
        session_id: "sess".to_string(),
        message: "do the thing".to_string(),
        user_id: None,
        agent_ids: agent_ids.iter().map(|s| s.to_string()).collect(),
        attachments: Vec::new(),
    }
}

async fn collect_events(mut rx: mpsc::Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut out = Vec::new();
    while let Some(ev) = rx.recv().await {
        out.push(ev);
    }
    out
}

#[tokio::test]
async fn one_failing_slot_does_not_disturb_its_siblings() {
    let mut outcomes = HashMap::new();
    outcomes.insert("a1".to_string(), Ok("OK".to_string()));
    outcomes.insert("a2".to_string(), Err("agent a2 blew up".to_string()));
    let h = harness(
        Arc::new(MockRunner { outcomes }),
        vec![agent_def("a1", "One"), agent_def("a2", "Two")],
        LlmPool::with_clients(vec![]),
        Duration::from_secs(5),
    );

    let (tx, rx) = mpsc::channel(64);
    let result = h
        .fanout
        .execute(&job(&["a1", "a2"]), tx, CancellationToken::new())
        .await;
    // Fan-out failures do not fail the parent job.
    assert!(result.is_ok());

    let events = collect_events(rx).await;
    let done_slots: Vec<_> = events
        .iter()
        .filter(|e| e.kind == JobEventKind::Done)
        .filter_map(|e| e.slot.clone())
        .collect();
    assert_eq!(done_slots, vec!["a1".to_string()]);
    assert!(events.iter().any(|e| {
        e.slot.as_deref() == Some("a2")
            && matches!(&e.kind, JobEventKind::Error { message } if message.contains("blew up"))
    }));

    let messages = h.store.list_messages("sess", 10).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "OK");
    assert_eq!(messages[0].agent_id.as_deref(), Some("a1"));
}

#[tokio::test]
async fn no_targets_and_no_classifier_runs_the_default_slot() {
    let mut outcomes = HashMap::new();
    outcomes.insert(NO_AGENT_SLOT.to_string(), Ok("plain answer".to_string()));
    let h = harness(
        Arc::new(MockRunner { outcomes }),
        vec![agent_def("a1", "One")],
        LlmPool::with_clients(vec![]),
        Duration::from_secs(5),
    );

    let (tx, rx) = mpsc::channel(64);
    h.fanout
        .execute(&job(&[]), tx, CancellationToken::new())
        .await
        .unwrap();

    let events = collect_events(rx).await;
    assert!(events
        .iter()
        .all(|e| e.slot.as_deref() == Some(NO_AGENT_SLOT)));
    assert!(events.iter().any(|e| e.kind == JobEventKind::Done));

    let messages = h.store.list_messages("sess", 10).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].agent_id.is_none());
}

#[tokio::test]
async fn classification_routes_to_the_named_agent() {
    let mut outcomes = HashMap::new();
    outcomes.insert("coder".to_string(), Ok("routed".to_string()));
    let llm = LlmPool::with_clients(vec![Arc::new(ScriptedLlm {
        reply: "Coder".to_string(),
        tier: ModelTier::Cheap,
    })]);
    let h = harness(
        Arc::new(MockRunner { outcomes }),
        vec![agent_def("coder", "Coder"), agent_def("writer", "Writer")],
        llm,
        Duration::from_secs(5),
    );

    let (tx, rx) = mpsc::channel(64);
    h.fanout
        .execute(&job(&[]), tx, CancellationToken::new())
        .await
        .unwrap();

    let events = collect_events(rx).await;
    assert!(events.iter().any(|e| {
        e.slot.as_deref() == Some("coder") && e.kind == JobEventKind::Done
    }));
    let messages = h.store.list_messages("sess", 10).await.unwrap();
    assert_eq!(messages[0].agent_id.as_deref(), Some("coder"));
}

#[tokio::test]
async fn clarification_suspends_and_resumes_the_slot() {
    let h = harness(
        Arc::new(ClarifyingRunner),
        vec![agent_def("helper", "Helper")],
        LlmPool::with_clients(vec![]),
        Duration::from_secs(5),
    );
    let store = h.store.clone();
    let clarifications = h.clarifications.clone();

    let (tx, mut rx) = mpsc::channel(64);
    let exec = tokio::spawn(async move {
        h.fanout
            .execute(&job(&["helper"]), tx, CancellationToken::new())
            .await
    });

    // Wait for the slot to suspend on its clarification request.
    loop {
        let ev = rx.recv().await.expect("event stream ended early");
        if matches!(ev.kind, JobEventKind::ClarificationRequest { .. }) {
            assert_eq!(ev.slot.as_deref(), Some("helper"));
            break;
        }
    }

    let mut answers = HashMap::new();
    answers.insert("color".to_string(), "red".to_string());
    assert!(clarifications.resolve("sess", answers).await);

    exec.await.unwrap().unwrap();
    let messages = store.list_messages("sess", 10).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "picked red");
}

#[tokio::test]
async fn an_unanswered_clarification_fails_only_that_slot() {
    let h = harness(
        Arc::new(ClarifyingRunner),
        vec![agent_def("helper", "Helper")],
        LlmPool::with_clients(vec![]),
        Duration::from_millis(50),
    );
    let clarifications = h.clarifications.clone();

    let (tx, rx) = mpsc::channel(64);
    let result = h
        .fanout
        .execute(&job(&["helper"]), tx, CancellationToken::new())
        .await;
    assert!(result.is_ok());

    let events = collect_events(rx).await;
    assert!(events.iter().any(|e| {
        matches!(&e.kind, JobEventKind::Error { message } if message.contains("timed out"))
    }));
    // The expired ticket is gone; a later answer finds nothing to resolve.
    assert!(!clarifications.resolve("sess", HashMap::new()).await);
}

#[test]
fn json_blocks_are_extracted_from_fences_or_raw_text() {
    assert_eq!(
        extract_json_block("```json\n{\"a\": 1}\n```"),
        Some("{\"a\": 1}")
    );
    assert_eq!(extract_json_block("{\"a\": 1}"), Some("{\"a\": 1}"));
    assert_eq!(extract_json_block("no json here"), None);
}

#[test]
fn directives_require_a_known_shape() {
    let directive =
        parse_directive("{\"clarify\": [{\"key\": \"k\", \"prompt\": \"p\"}]}").unwrap();
    assert_eq!(directive.clarify.unwrap().len(), 1);

    let directive =
        parse_directive("{\"background\": {\"kind\": \"media\", \"prompt\": \"draw\"}}").unwrap();
    assert_eq!(directive.background.unwrap().kind, "media");

    assert!(parse_directive("{\"unrelated\": true}").is_none());
    assert!(parse_directive("plain text").is_none());
}
