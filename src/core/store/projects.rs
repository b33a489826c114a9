use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};

use super::Store;
use super::types::ProjectRecord;

fn project_from_row(row: &Row) -> rusqlite::Result<ProjectRecord> {
    Ok(ProjectRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        repo_url: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

impl Store {
    pub async fn upsert_project(
        &self,
        project_id: &str,
        name: &str,
        repo_url: &str,
    ) -> Result<ProjectRecord> {
        let db = self.db().lock().await;
        db.execute(
            "INSERT INTO projects (id, name, repo_url)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name, repo_url = excluded.repo_url,
                 updated_at = CURRENT_TIMESTAMP",
            params![project_id, name, repo_url],
        )?;
        let rec = db.query_row(
            "SELECT id, name, repo_url, status, created_at, updated_at
             FROM projects WHERE id = ?1",
            params![project_id],
            project_from_row,
        )?;
        Ok(rec)
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Option<ProjectRecord>> {
        let db = self.db().lock().await;
        let rec = db
            .query_row(
                "SELECT id, name, repo_url, status, created_at, updated_at
                 FROM projects WHERE id = ?1",
                params![project_id],
                project_from_row,
            )
            .optional()?;
        Ok(rec)
    }

    pub async fn set_project_status(&self, project_id: &str, status: &str) -> Result<bool> {
        let db = self.db().lock().await;
        let rows = db.execute(
            "UPDATE projects SET status = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
            params![status, project_id],
        )?;
        Ok(rows > 0)
    }
}
