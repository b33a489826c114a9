//! Suspend/resume hand-shake for mid-execution user input.
//!
//! An agent that needs structured input registers a resolver keyed by the
//! conversation session and suspends on it; an out-of-band call later
//! supplies the answers and unblocks the suspended slot. At most one ticket
//! is outstanding per session; a second registration silently replaces the
//! first, whose waiter observes a closed channel.

use std::collections::HashMap;
use tokio::sync::{Mutex, oneshot};

pub type ClarificationAnswers = HashMap<String, String>;

pub struct ClarificationRegistry {
    pending: Mutex<HashMap<String, oneshot::Sender<ClarificationAnswers>>>,
}

impl ClarificationRegistry {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register(&self, session_id: &str) -> oneshot::Receiver<ClarificationAnswers> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(session_id.to_string(), tx);
        rx
    }

    /// Deliver answers to the outstanding ticket for this session. Returns
    /// false when no ticket is outstanding (or its waiter already gave up).
    pub async fn resolve(&self, session_id: &str, answers: ClarificationAnswers) -> bool {
        match self.pending.lock().await.remove(session_id) {
            Some(tx) => tx.send(answers).is_ok(),
            None => false,
        }
    }

    /// Drop a ticket without answering it (timeout or slot teardown).
    pub async fn discard(&self, session_id: &str) -> bool {
        self.pending.lock().await.remove(session_id).is_some()
    }

    pub async fn outstanding(&self) -> usize {
        self.pending.lock().await.len()
    }
}

impl Default for ClarificationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_unblocks_the_registered_waiter() {
        let registry = ClarificationRegistry::new();
        let rx = registry.register("sess").await;

        let mut answers = ClarificationAnswers::new();
        answers.insert("color".to_string(), "blue".to_string());
        assert!(registry.resolve("sess", answers).await);

        let received = rx.await.unwrap();
        assert_eq!(received.get("color").map(String::as_str), Some("blue"));
        assert_eq!(registry.outstanding().await, 0);
    }

    #[tokio::test]
    async fn resolve_without_a_ticket_returns_false() {
        let registry = ClarificationRegistry::new();
        assert!(!registry.resolve("nobody", ClarificationAnswers::new()).await);
    }

    #[tokio::test]
    async fn second_registration_replaces_the_first() {
        let registry = ClarificationRegistry::new();
        let first = registry.register("sess").await;
        let second = registry.register("sess").await;
        assert_eq!(registry.outstanding().await, 1);

        assert!(registry.resolve("sess", ClarificationAnswers::new()).await);
        // The superseded waiter sees a closed channel, not the answers.
        assert!(first.await.is_err());
        assert!(second.await.is_ok());
    }

    #[tokio::test]
    async fn discard_drops_the_ticket() {
        let registry = ClarificationRegistry::new();
        let rx = registry.register("sess").await;
        assert!(registry.discard("sess").await);
        assert!(!registry.discard("sess").await);
        assert!(rx.await.is_err());
    }
}
