use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};

use super::Store;
use super::types::{AgentRecord, AgentRole, AgentStatus};

fn agent_from_row(row: &Row) -> rusqlite::Result<AgentRecord> {
    let role: String = row.get(2)?;
    let status: String = row.get(3)?;
    Ok(AgentRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        role: AgentRole::from_status(&role).unwrap_or(AgentRole::General),
        status: AgentStatus::from_status(&status).unwrap_or(AgentStatus::Idle),
        current_task_id: row.get(4)?,
        tasks_completed: row.get(5)?,
        tasks_failed: row.get(6)?,
        input_tokens: row.get(7)?,
        output_tokens: row.get(8)?,
        avg_task_seconds: row.get(9)?,
    })
}

const AGENT_COLUMNS: &str = "id, project_id, role, status, current_task_id, tasks_completed, \
     tasks_failed, input_tokens, output_tokens, avg_task_seconds";

impl Store {
    /// Swarm agents are registered on swarm start and never deleted; a
    /// restarted swarm reuses the row and resets it to `idle`.
    pub async fn register_agent(
        &self,
        agent_id: &str,
        project_id: &str,
        role: AgentRole,
    ) -> Result<AgentRecord> {
        let db = self.db().lock().await;
        db.execute(
            "INSERT INTO project_agents (id, project_id, role, status)
             VALUES (?1, ?2, ?3, 'idle')
             ON CONFLICT(id) DO UPDATE SET
                 role = excluded.role, status = 'idle', current_task_id = NULL,
                 updated_at = CURRENT_TIMESTAMP",
            params![agent_id, project_id, role.as_str()],
        )?;
        let rec = db.query_row(
            &format!("SELECT {AGENT_COLUMNS} FROM project_agents WHERE id = ?1"),
            params![agent_id],
            agent_from_row,
        )?;
        Ok(rec)
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>> {
        let db = self.db().lock().await;
        let rec = db
            .query_row(
                &format!("SELECT {AGENT_COLUMNS} FROM project_agents WHERE id = ?1"),
                params![agent_id],
                agent_from_row,
            )
            .optional()?;
        Ok(rec)
    }

    pub async fn list_agents(&self, project_id: &str) -> Result<Vec<AgentRecord>> {
        let db = self.db().lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {AGENT_COLUMNS} FROM project_agents WHERE project_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![project_id], agent_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn set_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        current_task_id: Option<&str>,
    ) -> Result<bool> {
        let db = self.db().lock().await;
        let rows = db.execute(
            "UPDATE project_agents
             SET status = ?1, current_task_id = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?3",
            params![status.as_str(), current_task_id, agent_id],
        )?;
        Ok(rows > 0)
    }

    pub async fn all_agents_idle_or_stopped(&self, project_id: &str) -> Result<bool> {
        let db = self.db().lock().await;
        let busy: i64 = db.query_row(
            "SELECT COUNT(*) FROM project_agents
             WHERE project_id = ?1 AND status NOT IN ('idle', 'stopped')",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(busy == 0)
    }

    pub async fn stop_all_agents(&self, project_id: &str) -> Result<usize> {
        let db = self.db().lock().await;
        let rows = db.execute(
            "UPDATE project_agents
             SET status = 'stopped', current_task_id = NULL, updated_at = CURRENT_TIMESTAMP
             WHERE project_id = ?1",
            params![project_id],
        )?;
        Ok(rows)
    }

    /// Fold one finished task into the agent's cumulative statistics. The
    /// running average is rebuilt from the prior average and the new sample.
    pub async fn record_task_success(
        &self,
        agent_id: &str,
        input_tokens: i64,
        output_tokens: i64,
        duration_seconds: f64,
    ) -> Result<()> {
        let db = self.db().lock().await;
        let (completed, avg): (i64, f64) = db.query_row(
            "SELECT tasks_completed, avg_task_seconds FROM project_agents WHERE id = ?1",
            params![agent_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let new_avg = (avg * completed as f64 + duration_seconds) / (completed + 1) as f64;
        db.execute(
            "UPDATE project_agents
             SET tasks_completed = tasks_completed + 1,
                 input_tokens = input_tokens + ?1,
                 output_tokens = output_tokens + ?2,
                 avg_task_seconds = ?3,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?4",
            params![input_tokens, output_tokens, new_avg, agent_id],
        )?;
        Ok(())
    }

    pub async fn record_task_failure(&self, agent_id: &str) -> Result<()> {
        let db = self.db().lock().await;
        db.execute(
            "UPDATE project_agents
             SET tasks_failed = tasks_failed + 1, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1",
            params![agent_id],
        )?;
        Ok(())
    }
}
