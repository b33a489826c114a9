//! Streamed job event envelope.
//!
//! Every event a job emits carries an optional `slot` identifying which
//! agent's stream it belongs to, so a consumer can demultiplex interleaved
//! output from concurrently running agents back into separate threads.

use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
    #[serde(flatten)]
    pub kind: JobEventKind,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventKind {
    AgentStart,
    Token {
        text: String,
    },
    Status {
        message: String,
    },
    ToolCallStart {
        tool: String,
    },
    ToolCallEnd {
        tool: String,
        ok: bool,
    },
    ClarificationRequest {
        questions: Vec<ClarificationQuestion>,
    },
    BackgroundTaskStart {
        task_id: String,
        kind: String,
    },
    Done,
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClarificationQuestion {
    pub key: String,
    pub prompt: String,
}

impl JobEvent {
    pub fn error(slot: Option<String>, message: impl Into<String>) -> Self {
        Self {
            slot,
            kind: JobEventKind::Error {
                message: message.into(),
            },
        }
    }
}

/// Terminal result delivered through a job's completion callback.
/// Fan-out slot failures do not fail the parent job, so `error` is only set
/// for job-level failures (executor errors, cancellation).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobOutcome {
    pub job_id: String,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Event sender pre-bound to one slot. Delivery is best-effort: a consumer
/// that went away must not stall or fail the producing agent.
#[derive(Clone)]
pub struct SlotEmitter {
    slot: Option<String>,
    tx: mpsc::Sender<JobEvent>,
}

impl SlotEmitter {
    pub fn new(slot: Option<String>, tx: mpsc::Sender<JobEvent>) -> Self {
        Self { slot, tx }
    }

    pub async fn send(&self, kind: JobEventKind) {
        let _ = self
            .tx
            .send(JobEvent {
                slot: self.slot.clone(),
                kind,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_internal_tag_and_slot() {
        let ev = JobEvent {
            slot: Some("a1".to_string()),
            kind: JobEventKind::Token {
                text: "hi".to_string(),
            },
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "token");
        assert_eq!(json["slot"], "a1");
        assert_eq!(json["text"], "hi");
    }

    #[test]
    fn slotless_events_omit_the_slot_field() {
        let ev = JobEvent::error(None, "boom");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "boom");
        assert!(json.get("slot").is_none());
    }

    #[tokio::test]
    async fn emitter_tags_every_event_with_its_slot() {
        let (tx, mut rx) = mpsc::channel(4);
        let emitter = SlotEmitter::new(Some("coder".to_string()), tx);
        emitter.send(JobEventKind::AgentStart).await;
        emitter.send(JobEventKind::Done).await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.slot.as_deref(), Some("coder"));
        assert_eq!(first.kind, JobEventKind::AgentStart);
        assert_eq!(second.slot.as_deref(), Some("coder"));
        assert_eq!(second.kind, JobEventKind::Done);
    }

    #[tokio::test]
    async fn emitter_ignores_a_dropped_consumer() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let emitter = SlotEmitter::new(None, tx);
        // Must not panic or block.
        emitter.send(JobEventKind::Done).await;
    }
}
