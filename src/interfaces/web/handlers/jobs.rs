use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
    response::sse::{Event, Sse},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::convert::Infallible;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;

use super::super::AppState;
use crate::core::scheduler::{Attachment, JobRequest};

#[derive(Deserialize)]
pub struct SubmitJobRequest {
    #[serde(default)]
    pub job_id: Option<String>,
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub agent_ids: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Deserialize)]
pub struct ConcurrencyLimitRequest {
    pub limit: usize,
}

/// Cancels the caller-side token when the SSE stream is dropped. Only the
/// caller token: a disconnect must never abort the execution itself.
struct DisconnectGuard(CancellationToken);

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

pub async fn submit_job(
    State(state): State<AppState>,
    Json(payload): Json<SubmitJobRequest>,
) -> axum::response::Response {
    let caller_token = CancellationToken::new();
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let (done_tx, done_rx) = oneshot::channel();

    let submitted = state
        .scheduler
        .submit(JobRequest {
            job_id: payload.job_id,
            session_id: payload.session_id,
            message: payload.message,
            user_id: payload.user_id,
            agent_ids: payload.agent_ids,
            attachments: payload.attachments,
            events: event_tx,
            completion: done_tx,
            caller_token: Some(caller_token.clone()),
        })
        .await;
    let job_id = match submitted {
        Ok(id) => id,
        Err(e) => {
            return Json(json!({ "success": false, "error": e.to_string() })).into_response();
        }
    };

    // Relay typed events as serialized SSE lines, closing with the job's
    // terminal outcome.
    let (out_tx, out_rx) = mpsc::channel::<String>(64);
    tokio::spawn(async move {
        let _ = out_tx
            .send(json!({ "type": "accepted", "jobId": job_id }).to_string())
            .await;
        while let Some(event) = event_rx.recv().await {
            let Ok(line) = serde_json::to_string(&event) else {
                continue;
            };
            if out_tx.send(line).await.is_err() {
                // Consumer went away; keep draining so the job is unaffected.
                continue;
            }
        }
        if let Ok(outcome) = done_rx.await {
            let _ = out_tx
                .send(json!({ "type": "complete", "outcome": outcome }).to_string())
                .await;
        }
    });

    let guard = DisconnectGuard(caller_token);
    let stream = ReceiverStream::new(out_rx).map(move |line| {
        let _keep = &guard;
        Ok::<_, Infallible>(Event::default().data(line))
    });
    Sse::new(stream).into_response()
}

pub async fn cancel_job(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> Json<Value> {
    let cancelled = state.scheduler.cancel(&job_id).await;
    Json(json!({ "cancelled": cancelled }))
}

pub async fn scheduler_stats(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.scheduler.snapshot().await;
    Json(json!(snapshot))
}

pub async fn set_concurrency_limit(
    State(state): State<AppState>,
    Json(payload): Json<ConcurrencyLimitRequest>,
) -> Json<Value> {
    state.scheduler.set_concurrency_limit(payload.limit).await;
    let snapshot = state.scheduler.snapshot().await;
    Json(json!(snapshot))
}

pub async fn resolve_clarification(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Json(answers): Json<HashMap<String, String>>,
) -> Json<Value> {
    let resolved = state.clarifications.resolve(&session_id, answers).await;
    Json(json!({ "resolved": resolved }))
}

pub async fn list_messages(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Json<Value> {
    match state.store.list_messages(&session_id, 100).await {
        Ok(messages) => Json(json!({ "success": true, "messages": messages })),
        Err(e) => Json(json!({ "success": false, "error": e.to_string() })),
    }
}
