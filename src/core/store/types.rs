use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Feature,
    Bugfix,
    Test,
    Qa,
    Documentation,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Feature => "feature",
            TaskType::Bugfix => "bugfix",
            TaskType::Test => "test",
            TaskType::Qa => "qa",
            TaskType::Documentation => "documentation",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "feature" => Some(TaskType::Feature),
            "bugfix" => Some(TaskType::Bugfix),
            "test" => Some(TaskType::Test),
            "qa" => Some(TaskType::Qa),
            "documentation" => Some(TaskType::Documentation),
            _ => None,
        }
    }
}

/// `pending -> locked -> in_progress -> {completed | failed | blocked}`.
/// The `pending -> locked` edge is only ever taken through the conditional
/// claim write. `blocked` is a legal terminal state other collaborators may
/// set for tasks whose dependencies can never be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Locked,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Locked => "locked",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskStatus::Pending),
            "locked" => Some(TaskStatus::Locked),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "blocked" => Some(TaskStatus::Blocked),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Blocked
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    General,
    Qa,
    Documentation,
    CodeQuality,
    Architecture,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::General => "general",
            AgentRole::Qa => "qa",
            AgentRole::Documentation => "documentation",
            AgentRole::CodeQuality => "code_quality",
            AgentRole::Architecture => "architecture",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "general" => Some(AgentRole::General),
            "qa" => Some(AgentRole::Qa),
            "documentation" => Some(AgentRole::Documentation),
            "code_quality" => Some(AgentRole::CodeQuality),
            "architecture" => Some(AgentRole::Architecture),
            _ => None,
        }
    }

    /// Static filter over the task types this role may claim.
    /// `general` and `architecture` claim anything.
    pub fn allows(self, task_type: TaskType) -> bool {
        match self {
            AgentRole::General | AgentRole::Architecture => true,
            AgentRole::Qa => matches!(task_type, TaskType::Test | TaskType::Qa),
            AgentRole::Documentation => matches!(task_type, TaskType::Documentation),
            AgentRole::CodeQuality => matches!(task_type, TaskType::Bugfix | TaskType::Qa),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Working,
    Waiting,
    Stopped,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Waiting => "waiting",
            AgentStatus::Stopped => "stopped",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "idle" => Some(AgentStatus::Idle),
            "working" => Some(AgentStatus::Working),
            "waiting" => Some(AgentStatus::Waiting),
            "stopped" => Some(AgentStatus::Stopped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    pub repo_url: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ProjectRecord {
    /// A swarm may be started for any project that has not already finished.
    pub fn is_startable(&self) -> bool {
        self.status != "completed"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: i64,
    /// Task ids this task depends on. Gating is keyed by id, not title:
    /// titles are free text and renaming one must not break the graph.
    pub dependencies: Vec<String>,
    pub assigned_agent_id: Option<String>,
    pub locked_by: Option<String>,
    pub locked_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentRecord {
    pub id: String,
    pub project_id: String,
    pub role: AgentRole,
    pub status: AgentStatus,
    pub current_task_id: Option<String>,
    pub tasks_completed: i64,
    pub tasks_failed: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub avg_task_seconds: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: i64,
    pub session_id: String,
    pub role: String,
    pub agent_id: Option<String>,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackgroundTaskRecord {
    pub id: String,
    pub session_id: String,
    pub kind: String,
    pub status: String,
    pub detail: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}
