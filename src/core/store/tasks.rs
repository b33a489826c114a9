use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};

use super::Store;
use super::types::{TaskRecord, TaskStatus, TaskType};

fn task_from_row(row: &Row) -> rusqlite::Result<TaskRecord> {
    let task_type: String = row.get(4)?;
    let status: String = row.get(5)?;
    let dependencies: String = row.get(7)?;
    Ok(TaskRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        task_type: TaskType::from_status(&task_type).unwrap_or(TaskType::Feature),
        status: TaskStatus::from_status(&status).unwrap_or(TaskStatus::Pending),
        priority: row.get(6)?,
        dependencies: serde_json::from_str(&dependencies).unwrap_or_default(),
        assigned_agent_id: row.get(8)?,
        locked_by: row.get(9)?,
        locked_at: row.get(10)?,
        started_at: row.get(11)?,
        completed_at: row.get(12)?,
        result: row.get(13)?,
        error_message: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

const TASK_COLUMNS: &str = "id, project_id, title, description, task_type, status, priority, \
     dependencies, assigned_agent_id, locked_by, locked_at, started_at, completed_at, \
     result, error_message, created_at, updated_at";

impl Store {
    pub async fn create_task(
        &self,
        project_id: &str,
        title: &str,
        description: &str,
        task_type: TaskType,
        priority: i64,
        dependencies: &[String],
    ) -> Result<TaskRecord> {
        let task_id = uuid::Uuid::new_v4().to_string();
        let deps = serde_json::to_string(dependencies)?;
        let db = self.db().lock().await;
        db.execute(
            "INSERT INTO project_tasks (id, project_id, title, description, task_type, priority, dependencies)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![task_id, project_id, title, description, task_type.as_str(), priority, deps],
        )?;
        let rec = db.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM project_tasks WHERE id = ?1"),
            params![task_id],
            task_from_row,
        )?;
        Ok(rec)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let db = self.db().lock().await;
        let rec = db
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM project_tasks WHERE id = ?1"),
                params![task_id],
                task_from_row,
            )
            .optional()?;
        Ok(rec)
    }

    pub async fn list_tasks(&self, project_id: &str) -> Result<Vec<TaskRecord>> {
        let db = self.db().lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM project_tasks WHERE project_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![project_id], task_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Unclaimed work, highest priority first, oldest first within a
    /// priority. This is the candidate order each agent scans before racing
    /// on the conditional claim.
    pub async fn list_pending_tasks(&self, project_id: &str) -> Result<Vec<TaskRecord>> {
        let db = self.db().lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM project_tasks
             WHERE project_id = ?1 AND status = 'pending' AND locked_by IS NULL
             ORDER BY priority DESC, created_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![project_id], task_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Count of tasks still in flight (`pending`, `locked`, `in_progress`).
    /// Zero means the backlog is drained and agents may wind down.
    pub async fn open_task_count(&self, project_id: &str) -> Result<i64> {
        let db = self.db().lock().await;
        let count = db.query_row(
            "SELECT COUNT(*) FROM project_tasks
             WHERE project_id = ?1 AND status IN ('pending', 'locked', 'in_progress')",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub async fn completed_task_ids(
        &self,
        project_id: &str,
    ) -> Result<std::collections::HashSet<String>> {
        let db = self.db().lock().await;
        let mut stmt = db.prepare(
            "SELECT id FROM project_tasks WHERE project_id = ?1 AND status = 'completed'",
        )?;
        let rows = stmt.query_map(params![project_id], |row| row.get::<_, String>(0))?;
        let mut out = std::collections::HashSet::new();
        for row in rows {
            out.insert(row?);
        }
        Ok(out)
    }

    /// Atomic claim: `pending` and unlocked -> `locked` by `agent_id`.
    /// A compare-and-swap over the row, not an in-memory lock; competing
    /// agents in other processes race on this same write, and exactly one
    /// of them sees an affected row.
    pub async fn claim_task(&self, task_id: &str, agent_id: &str) -> Result<bool> {
        let db = self.db().lock().await;
        let rows = db.execute(
            "UPDATE project_tasks
             SET status = 'locked', locked_by = ?1, locked_at = CURRENT_TIMESTAMP,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?2 AND status = 'pending' AND locked_by IS NULL",
            params![agent_id, task_id],
        )?;
        Ok(rows > 0)
    }

    /// `locked -> in_progress`, performed by the lock holder right after a
    /// successful claim.
    pub async fn mark_task_in_progress(&self, task_id: &str, agent_id: &str) -> Result<bool> {
        let db = self.db().lock().await;
        let rows = db.execute(
            "UPDATE project_tasks
             SET status = 'in_progress', assigned_agent_id = ?1,
                 started_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?2 AND locked_by = ?1",
            params![agent_id, task_id],
        )?;
        Ok(rows > 0)
    }

    pub async fn complete_task(&self, task_id: &str, result: &str) -> Result<bool> {
        let db = self.db().lock().await;
        let rows = db.execute(
            "UPDATE project_tasks
             SET status = 'completed', result = ?1,
                 completed_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?2",
            params![result, task_id],
        )?;
        Ok(rows > 0)
    }

    pub async fn fail_task(&self, task_id: &str, error_message: &str) -> Result<bool> {
        let db = self.db().lock().await;
        let rows = db.execute(
            "UPDATE project_tasks
             SET status = 'failed', error_message = ?1,
                 completed_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?2",
            params![error_message, task_id],
        )?;
        Ok(rows > 0)
    }
}
