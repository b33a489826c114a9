//! Registry for long-running side effects that outlive their job.
//!
//! Work is handed off as an explicit spawned task, not a dangling future:
//! the registry records the task as pending in the store before the work
//! starts, and the spawned task reports back by persisting a message and
//! marking the record finished. The store row is the single source of truth
//! for in-flight background work.

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use super::store::Store;

pub struct BackgroundTasks {
    store: Arc<Store>,
}

impl BackgroundTasks {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Fire-and-forget: the originating job does not wait for the work. On
    /// success the produced text is persisted as a new message in the
    /// session; failures are recorded on the registry row and logged, never
    /// re-thrown into any caller.
    pub async fn spawn<F>(&self, session_id: &str, kind: &str, work: F) -> Result<String>
    where
        F: Future<Output = Result<String>> + Send + 'static,
    {
        let task_id = uuid::Uuid::new_v4().to_string();
        self.store
            .create_background_task(&task_id, session_id, kind)
            .await?;

        let store = self.store.clone();
        let session_id = session_id.to_string();
        let kind = kind.to_string();
        let id = task_id.clone();
        tokio::spawn(async move {
            match work.await {
                Ok(output) => {
                    if let Err(e) = store
                        .append_message(&session_id, "assistant", None, &output)
                        .await
                    {
                        warn!("Failed to persist background task [{}] output: {}", id, e);
                    }
                    if let Err(e) = store.finish_background_task(&id, "completed", None).await {
                        warn!("Failed to mark background task [{}] complete: {}", id, e);
                    }
                    info!("Background task [{}] ({}) completed", id, kind);
                }
                Err(e) => {
                    let detail = e.to_string();
                    if let Err(we) = store
                        .finish_background_task(&id, "failed", Some(&detail))
                        .await
                    {
                        warn!("Failed to mark background task [{}] failed: {}", id, we);
                    }
                    warn!("Background task [{}] ({}) failed: {}", id, kind, detail);
                }
            }
        });

        Ok(task_id)
    }
}
