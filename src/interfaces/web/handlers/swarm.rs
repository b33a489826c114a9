use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::super::AppState;
use crate::core::store::types::{TaskStatus, TaskType};
use crate::core::swarm::SwarmSettings;

#[derive(Deserialize)]
pub struct UpsertProjectRequest {
    pub name: String,
    #[serde(default)]
    pub repo_url: String,
}

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub task_type: TaskType,
    #[serde(default)]
    pub priority: i64,
    /// Ids of tasks that must complete first.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

pub async fn upsert_project(
    Path(project_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<UpsertProjectRequest>,
) -> Json<Value> {
    match state
        .store
        .upsert_project(&project_id, &payload.name, &payload.repo_url)
        .await
    {
        Ok(project) => Json(json!({ "success": true, "project": project })),
        Err(e) => Json(json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn create_task(
    Path(project_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<CreateTaskRequest>,
) -> Json<Value> {
    match state
        .store
        .create_task(
            &project_id,
            &payload.title,
            &payload.description,
            payload.task_type,
            payload.priority,
            &payload.dependencies,
        )
        .await
    {
        Ok(task) => Json(json!({ "success": true, "task": task })),
        Err(e) => Json(json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn start_swarm(
    Path(project_id): Path<String>,
    State(state): State<AppState>,
    Json(settings): Json<SwarmSettings>,
) -> Json<Value> {
    match state.coordinator.start_project(&project_id, settings).await {
        Ok(()) => Json(json!({ "success": true })),
        Err(e) => Json(json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn stop_swarm(
    Path(project_id): Path<String>,
    State(state): State<AppState>,
) -> Json<Value> {
    match state.coordinator.stop_project(&project_id).await {
        Ok(stopped) => Json(json!({ "success": true, "stopped": stopped })),
        Err(e) => Json(json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn swarm_status(
    Path(project_id): Path<String>,
    State(state): State<AppState>,
) -> Json<Value> {
    let project = match state.store.get_project(&project_id).await {
        Ok(Some(project)) => project,
        Ok(None) => return Json(json!({ "success": false, "error": "Project not found" })),
        Err(e) => return Json(json!({ "success": false, "error": e.to_string() })),
    };
    let agents = match state.store.list_agents(&project_id).await {
        Ok(agents) => agents,
        Err(e) => return Json(json!({ "success": false, "error": e.to_string() })),
    };
    let tasks = match state.store.list_tasks(&project_id).await {
        Ok(tasks) => tasks,
        Err(e) => return Json(json!({ "success": false, "error": e.to_string() })),
    };

    let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
    Json(json!({
        "success": true,
        "project": project,
        "agents": agents,
        "tasks": {
            "total": tasks.len(),
            "open": tasks.iter().filter(|t| !t.status.is_terminal()).count(),
            "pending": count(TaskStatus::Pending),
            "locked": count(TaskStatus::Locked),
            "in_progress": count(TaskStatus::InProgress),
            "completed": count(TaskStatus::Completed),
            "failed": count(TaskStatus::Failed),
            "blocked": count(TaskStatus::Blocked),
        }
    }))
}
