use anyhow::Result;
use rusqlite::params;

use super::Store;
use super::types::BackgroundTaskRecord;

impl Store {
    pub async fn create_background_task(
        &self,
        task_id: &str,
        session_id: &str,
        kind: &str,
    ) -> Result<()> {
        let db = self.db().lock().await;
        db.execute(
            "INSERT INTO background_tasks (id, session_id, kind, status) VALUES (?1, ?2, ?3, 'pending')",
            params![task_id, session_id, kind],
        )?;
        Ok(())
    }

    pub async fn finish_background_task(
        &self,
        task_id: &str,
        status: &str,
        detail: Option<&str>,
    ) -> Result<bool> {
        let db = self.db().lock().await;
        let rows = db.execute(
            "UPDATE background_tasks
             SET status = ?1, detail = ?2, completed_at = CURRENT_TIMESTAMP
             WHERE id = ?3",
            params![status, detail, task_id],
        )?;
        Ok(rows > 0)
    }

    pub async fn list_background_tasks(
        &self,
        session_id: &str,
    ) -> Result<Vec<BackgroundTaskRecord>> {
        let db = self.db().lock().await;
        let mut stmt = db.prepare(
            "SELECT id, session_id, kind, status, detail, created_at, completed_at
             FROM background_tasks WHERE session_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(BackgroundTaskRecord {
                id: row.get(0)?,
                session_id: row.get(1)?,
                kind: row.get(2)?,
                status: row.get(3)?,
                detail: row.get(4)?,
                created_at: row.get(5)?,
                completed_at: row.get(6)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
