use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::types::{MemoryCandidate, MemoryFact, MemoryMessage, MemoryScope, MemorySummary};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS memory_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    profile_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memory_messages_session
    ON memory_messages (session_id, id);

CREATE TABLE IF NOT EXISTS memory_facts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    profile_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    content TEXT NOT NULL,
    tags_json TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memory_facts_scope
    ON memory_facts (profile_id, user_id, id);

CREATE TABLE IF NOT EXISTS memory_summaries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    profile_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memory_summaries_scope
    ON memory_summaries (profile_id, user_id, id);

CREATE TABLE IF NOT EXISTS memory_candidates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    profile_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    content TEXT NOT NULL,
    reason TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memory_candidates_scope
    ON memory_candidates (profile_id, user_id, id);
CREATE INDEX IF NOT EXISTS idx_memory_candidates_status
    ON memory_candidates (status, id);
"#;

/// Single-file relational store. Every operation opens and closes its own
/// connection — deliberately short-lived rather than a held `Mutex<Connection>`
/// — matching the reference store's per-call `sqlite3.connect` pattern.
/// Schema creation is idempotent and run at the start of every call via
/// `ensure_schema`, the same way the reference store's `_ensure_db` runs once
/// lazily; here it is cheap (`CREATE TABLE IF NOT EXISTS`) so re-running it is
/// harmless.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    db_path: String,
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl MemoryStore {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    fn connect(&self) -> Result<Connection> {
        if let Some(parent) = std::path::Path::new(&self.db_path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }

    pub fn add_message(&self, scope: &MemoryScope, role: &str, content: &str) -> Result<i64> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO memory_messages (session_id, profile_id, user_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![scope.session_id, scope.profile_id, scope.user_id, role, content, now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_messages(&self, scope: &MemoryScope, limit: i64, ascending: bool) -> Result<Vec<MemoryMessage>> {
        let conn = self.connect()?;
        let order = if ascending { "ASC" } else { "DESC" };
        let sql = format!(
            "SELECT id, session_id, role, content, created_at FROM memory_messages
             WHERE session_id = ?1 ORDER BY id {order} LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![scope.session_id, limit], |row| {
                Ok(MemoryMessage {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    role: row.get(2)?,
                    content: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_messages(&self, scope: &MemoryScope) -> Result<i64> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT COUNT(*) FROM memory_messages WHERE session_id = ?1",
            params![scope.session_id],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }

    /// Deletes the oldest `count - keep` rows for the session and returns
    /// exactly the rows that were deleted, oldest first.
    pub fn trim_messages(&self, scope: &MemoryScope, keep: i64) -> Result<Vec<MemoryMessage>> {
        let conn = self.connect()?;
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memory_messages WHERE session_id = ?1",
            params![scope.session_id],
            |row| row.get(0),
        )?;
        let overflow = total - keep;
        if overflow <= 0 {
            return Ok(Vec::new());
        }

        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, created_at FROM memory_messages
             WHERE session_id = ?1 ORDER BY id ASC LIMIT ?2",
        )?;
        let removed = stmt
            .query_map(params![scope.session_id, overflow], |row| {
                Ok(MemoryMessage {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    role: row.get(2)?,
                    content: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);

        for msg in &removed {
            conn.execute("DELETE FROM memory_messages WHERE id = ?1", params![msg.id])?;
        }
        Ok(removed)
    }

    pub fn fact_exists(&self, scope: &MemoryScope, content: &str) -> Result<bool> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memory_facts WHERE profile_id = ?1 AND user_id = ?2 AND content = ?3",
            params![scope.profile_id, scope.user_id, content],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn get_fact_by_content(&self, scope: &MemoryScope, content: &str) -> Result<Option<MemoryFact>> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT id, profile_id, user_id, content, tags_json, created_at FROM memory_facts
             WHERE profile_id = ?1 AND user_id = ?2 AND content = ?3",
            params![scope.profile_id, scope.user_id, content],
            row_to_fact,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn add_fact(&self, scope: &MemoryScope, content: &str, tags: &[String]) -> Result<MemoryFact> {
        let conn = self.connect()?;
        let tags_json = serde_json::to_string(tags)?;
        conn.execute(
            "INSERT INTO memory_facts (profile_id, user_id, content, tags_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![scope.profile_id, scope.user_id, content, tags_json, now()],
        )?;
        let id = conn.last_insert_rowid();
        Ok(MemoryFact {
            id,
            profile_id: scope.profile_id.clone(),
            user_id: scope.user_id.clone(),
            content: content.to_string(),
            tags: tags.to_vec(),
            created_at: now(),
        })
    }

    pub fn delete_fact(&self, scope: &MemoryScope, id: i64) -> Result<bool> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "DELETE FROM memory_facts WHERE id = ?1 AND profile_id = ?2 AND user_id = ?3",
            params![id, scope.profile_id, scope.user_id],
        )?;
        Ok(changed > 0)
    }

    pub fn list_facts(&self, scope: &MemoryScope, limit: i64) -> Result<Vec<MemoryFact>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, profile_id, user_id, content, tags_json, created_at FROM memory_facts
             WHERE profile_id = ?1 AND user_id = ?2 ORDER BY id DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![scope.profile_id, scope.user_id, limit], row_to_fact)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn add_summary(&self, scope: &MemoryScope, content: &str) -> Result<MemorySummary> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO memory_summaries (session_id, profile_id, user_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![scope.session_id, scope.profile_id, scope.user_id, content, now()],
        )?;
        Ok(MemorySummary {
            id: conn.last_insert_rowid(),
            session_id: scope.session_id.clone(),
            profile_id: scope.profile_id.clone(),
            user_id: scope.user_id.clone(),
            content: content.to_string(),
            created_at: now(),
        })
    }

    pub fn delete_summary(&self, scope: &MemoryScope, id: i64) -> Result<bool> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "DELETE FROM memory_summaries WHERE id = ?1 AND profile_id = ?2 AND user_id = ?3",
            params![id, scope.profile_id, scope.user_id],
        )?;
        Ok(changed > 0)
    }

    /// Summaries scoped to (profile, user), optionally excluding a session id.
    pub fn list_summaries(
        &self,
        scope: &MemoryScope,
        limit: i64,
        exclude_session_id: Option<&str>,
    ) -> Result<Vec<MemorySummary>> {
        let conn = self.connect()?;
        let rows = if let Some(exclude) = exclude_session_id {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, profile_id, user_id, content, created_at FROM memory_summaries
                 WHERE profile_id = ?1 AND user_id = ?2 AND session_id != ?3
                 ORDER BY id DESC LIMIT ?4",
            )?;
            stmt.query_map(
                params![scope.profile_id, scope.user_id, exclude, limit],
                row_to_summary,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, profile_id, user_id, content, created_at FROM memory_summaries
                 WHERE profile_id = ?1 AND user_id = ?2 ORDER BY id DESC LIMIT ?3",
            )?;
            stmt.query_map(params![scope.profile_id, scope.user_id, limit], row_to_summary)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        Ok(rows)
    }

    pub fn candidate_exists(&self, scope: &MemoryScope, content: &str) -> Result<bool> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memory_candidates
             WHERE profile_id = ?1 AND user_id = ?2 AND content = ?3 AND status = 'pending'",
            params![scope.profile_id, scope.user_id, content],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn add_candidate(&self, scope: &MemoryScope, content: &str, reason: &str) -> Result<MemoryCandidate> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO memory_candidates (profile_id, user_id, content, reason, status, created_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
            params![scope.profile_id, scope.user_id, content, reason, now()],
        )?;
        Ok(MemoryCandidate {
            id: conn.last_insert_rowid(),
            profile_id: scope.profile_id.clone(),
            user_id: scope.user_id.clone(),
            content: content.to_string(),
            reason: reason.to_string(),
            status: "pending".to_string(),
            created_at: now(),
        })
    }

    pub fn list_candidates(&self, scope: &MemoryScope, status: &str, limit: i64) -> Result<Vec<MemoryCandidate>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, profile_id, user_id, content, reason, status, created_at FROM memory_candidates
             WHERE profile_id = ?1 AND user_id = ?2 AND status = ?3 ORDER BY id DESC LIMIT ?4",
        )?;
        let rows = stmt
            .query_map(params![scope.profile_id, scope.user_id, status, limit], row_to_candidate)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_candidate(&self, scope: &MemoryScope, id: i64) -> Result<Option<MemoryCandidate>> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT id, profile_id, user_id, content, reason, status, created_at FROM memory_candidates
             WHERE id = ?1 AND profile_id = ?2 AND user_id = ?3",
            params![id, scope.profile_id, scope.user_id],
            row_to_candidate,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn update_candidate_status(&self, scope: &MemoryScope, id: i64, status: &str) -> Result<bool> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE memory_candidates SET status = ?1 WHERE id = ?2 AND profile_id = ?3 AND user_id = ?4",
            params![status, id, scope.profile_id, scope.user_id],
        )?;
        Ok(changed > 0)
    }
}

fn row_to_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryFact> {
    let tags_json: String = row.get(4)?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
    Ok(MemoryFact {
        id: row.get(0)?,
        profile_id: row.get(1)?,
        user_id: row.get(2)?,
        content: row.get(3)?,
        tags,
        created_at: row.get(5)?,
    })
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemorySummary> {
    Ok(MemorySummary {
        id: row.get(0)?,
        session_id: row.get(1)?,
        profile_id: row.get(2)?,
        user_id: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn row_to_candidate(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryCandidate> {
    Ok(MemoryCandidate {
        id: row.get(0)?,
        profile_id: row.get(1)?,
        user_id: row.get(2)?,
        content: row.get(3)?,
        reason: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_store() -> MemoryStore {
        let path = std::env::temp_dir().join(format!("skynet-memory-test-{}.db", uuid::Uuid::new_v4()));
        MemoryStore::new(path.to_string_lossy().to_string())
    }

    #[test]
    fn add_fact_is_deduplicated_by_caller_via_fact_exists() {
        let store = tmp_store();
        let scope = MemoryScope::new("s1", "u1", "p1");
        assert!(!store.fact_exists(&scope, "foo").unwrap());
        store.add_fact(&scope, "foo", &["explicit".to_string()]).unwrap();
        assert!(store.fact_exists(&scope, "foo").unwrap());
    }

    #[test]
    fn trim_messages_deletes_oldest_and_returns_them() {
        let store = tmp_store();
        let scope = MemoryScope::new("s1", "u1", "p1");
        for i in 0..5 {
            store.add_message(&scope, "user", &format!("msg{i}")).unwrap();
        }
        let removed = store.trim_messages(&scope, 2).unwrap();
        assert_eq!(removed.len(), 3);
        assert_eq!(removed[0].content, "msg0");
        assert_eq!(store.count_messages(&scope).unwrap(), 2);
    }

    #[test]
    fn trim_messages_is_noop_under_window() {
        let store = tmp_store();
        let scope = MemoryScope::new("s1", "u1", "p1");
        store.add_message(&scope, "user", "hi").unwrap();
        let removed = store.trim_messages(&scope, 10).unwrap();
        assert!(removed.is_empty());
    }

    #[test]
    fn list_summaries_excludes_session_when_requested() {
        let store = tmp_store();
        let s1 = MemoryScope::new("s1", "u1", "p1");
        let s2 = MemoryScope::new("s2", "u1", "p1");
        store.add_summary(&s1, "summary for s1").unwrap();
        store.add_summary(&s2, "summary for s2").unwrap();
        let visible = store.list_summaries(&s2, 10, Some("s2")).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].session_id, "s1");
    }
}
