use axum::{
    Router,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers::{jobs, swarm};

fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = ["http://127.0.0.1", "http://localhost"]
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/jobs", post(jobs::submit_job))
        .route("/api/jobs/{job_id}/cancel", post(jobs::cancel_job))
        .route("/api/scheduler/stats", get(jobs::scheduler_stats))
        .route(
            "/api/scheduler/limit",
            post(jobs::set_concurrency_limit),
        )
        .route(
            "/api/sessions/{session_id}/clarification",
            post(jobs::resolve_clarification),
        )
        .route(
            "/api/sessions/{session_id}/messages",
            get(jobs::list_messages),
        )
        .route("/api/projects/{project_id}", post(swarm::upsert_project))
        .route("/api/projects/{project_id}/tasks", post(swarm::create_task))
        .route("/api/swarm/{project_id}/start", post(swarm::start_swarm))
        .route("/api/swarm/{project_id}/stop", post(swarm::stop_swarm))
        .route("/api/swarm/{project_id}/status", get(swarm::swarm_status))
        .route("/api/logs/stream", get(super::sse_logs_endpoint))
        .layer(build_localhost_cors())
        .with_state(state)
}
