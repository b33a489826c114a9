use anyhow::Result;
use rusqlite::params;

use super::Store;
use super::types::MessageRecord;

impl Store {
    pub async fn append_message(
        &self,
        session_id: &str,
        role: &str,
        agent_id: Option<&str>,
        content: &str,
    ) -> Result<i64> {
        let db = self.db().lock().await;
        db.execute(
            "INSERT INTO messages (session_id, role, agent_id, content) VALUES (?1, ?2, ?3, ?4)",
            params![session_id, role, agent_id, content],
        )?;
        Ok(db.last_insert_rowid())
    }

    pub async fn list_messages(&self, session_id: &str, limit: usize) -> Result<Vec<MessageRecord>> {
        let db = self.db().lock().await;
        let mut stmt = db.prepare(
            "SELECT id, session_id, role, agent_id, content, created_at FROM (
                 SELECT id, session_id, role, agent_id, content, created_at
                 FROM messages WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2
             ) ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id, limit as i64], |row| {
            Ok(MessageRecord {
                id: row.get(0)?,
                session_id: row.get(1)?,
                role: row.get(2)?,
                agent_id: row.get(3)?,
                content: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
