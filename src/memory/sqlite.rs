//! SQLite 结果存储（storage.backend = "sqlite"）
//!
//! 每条结果一行，完整记录以 JSON 存于 `record` 列；`seq` 单调递增，覆盖非终态记录时取新序号，
//! 因此 `ORDER BY seq DESC` 即插入顺序倒序。重启后序号从 MAX(seq) 续接。

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::core::TaskId;
use crate::memory::{AgentResult, MemoryError, MemoryStore};

fn storage_err(e: impl std::fmt::Display) -> MemoryError {
    MemoryError::Storage(e.to_string())
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MemoryError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(storage_err)?;
            }
        }
        let conn = Connection::open(&path).map_err(storage_err)?;
        Self::init_schema(&conn)?;
        tracing::debug!(path = %path.display(), "sqlite memory store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// 内存数据库，测试用
    pub fn open_in_memory() -> Result<Self, MemoryError> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_schema(conn: &Connection) -> Result<(), MemoryError> {
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS agent_results (
                task_id TEXT PRIMARY KEY,
                seq INTEGER NOT NULL,
                request_id TEXT NOT NULL,
                role TEXT NOT NULL,
                status TEXT NOT NULL,
                record TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_agent_results_seq ON agent_results(seq);
            CREATE INDEX IF NOT EXISTS idx_agent_results_request ON agent_results(request_id);
            ",
        )
        .map_err(storage_err)
    }

    fn decode(record: String) -> Result<AgentResult, MemoryError> {
        serde_json::from_str(&record).map_err(storage_err)
    }
}

impl MemoryStore for SqliteStore {
    fn put(&self, result: AgentResult) -> Result<(), MemoryError> {
        let record = serde_json::to_string(&result).map_err(storage_err)?;
        let mut conn = self.conn.lock().map_err(storage_err)?;
        let tx = conn.transaction().map_err(storage_err)?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT record FROM agent_results WHERE task_id = ?1",
                params![result.task_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        if let Some(prev) = existing {
            if Self::decode(prev)?.is_terminal() {
                return Err(MemoryError::ImmutableResult(result.task_id.to_string()));
            }
        }

        let next_seq: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM agent_results",
                [],
                |row| row.get(0),
            )
            .map_err(storage_err)?;
        tx.execute(
            "INSERT OR REPLACE INTO agent_results
                (task_id, seq, request_id, role, status, record, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                result.task_id.as_str(),
                next_seq,
                result.request_id.as_str(),
                result.role.as_str(),
                result.status.as_str(),
                record,
                result.recorded_at.to_rfc3339(),
            ],
        )
        .map_err(storage_err)?;
        tx.commit().map_err(storage_err)
    }

    fn get(&self, task_id: &TaskId) -> Result<AgentResult, MemoryError> {
        let conn = self.conn.lock().map_err(storage_err)?;
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM agent_results WHERE task_id = ?1",
                params![task_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        match record {
            Some(r) => Self::decode(r),
            None => Err(MemoryError::NotFound(task_id.to_string())),
        }
    }

    fn recent(&self, n: usize) -> Result<Vec<AgentResult>, MemoryError> {
        let conn = self.conn.lock().map_err(storage_err)?;
        let mut stmt = conn
            .prepare("SELECT record FROM agent_results ORDER BY seq DESC LIMIT ?1")
            .map_err(storage_err)?;
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![limit], |row| row.get::<_, String>(0))
            .map_err(storage_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(Self::decode(row.map_err(storage_err)?)?);
        }
        Ok(out)
    }

    fn len(&self) -> Result<usize, MemoryError> {
        let conn = self.conn.lock().map_err(storage_err)?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM agent_results", [], |row| row.get(0))
            .map_err(storage_err)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn flush(&self) -> Result<(), MemoryError> {
        let conn = self.conn.lock().map_err(storage_err)?;
        conn.cache_flush().map_err(storage_err)
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AgentRole, ErrorKind, RequestId, Task, TaskStatus};

    fn task() -> Task {
        Task::new(RequestId::new(), AgentRole::Recon, serde_json::json!({"target": "x"}))
    }

    #[test]
    fn test_put_get_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let t = task();
        store.put(AgentResult::success(&t, serde_json::json!({"hosts": 3}))).unwrap();
        let got = store.get(&t.id).unwrap();
        assert_eq!(got.task_id, t.id);
        assert_eq!(got.data().unwrap()["hosts"], 3);
        assert!(matches!(
            store.get(&TaskId::from("missing")),
            Err(MemoryError::NotFound(_))
        ));
    }

    #[test]
    fn test_input_is_kept_with_result() {
        let store = SqliteStore::open_in_memory().unwrap();
        let t = task();
        let rewritten = serde_json::json!({"target": "x", "safety_rewritten": true});
        store
            .put(AgentResult::success(&t, serde_json::json!({})).with_input(rewritten.clone()))
            .unwrap();
        assert_eq!(store.get(&t.id).unwrap().input, rewritten);

        let other = task();
        store.put(AgentResult::failure(&other, ErrorKind::Timeout, "slow")).unwrap();
        assert_eq!(store.recent(1).unwrap()[0].input["target"], "x");
    }

    #[test]
    fn test_terminal_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let t = task();
        store.put(AgentResult::failure(&t, ErrorKind::Timeout, "slow")).unwrap();
        let err = store.put(AgentResult::success(&t, serde_json::json!({}))).unwrap_err();
        assert!(matches!(err, MemoryError::ImmutableResult(_)));
        assert_eq!(store.get(&t.id).unwrap().error_kind(), Some(ErrorKind::Timeout));
    }

    #[test]
    fn test_overwrite_non_terminal_reorders() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut a = task();
        let b = task();
        a.status = TaskStatus::Running;
        store.put(AgentResult::in_progress(&a)).unwrap();
        store.put(AgentResult::success(&b, serde_json::json!({}))).unwrap();
        store.put(AgentResult::success(&a, serde_json::json!({}))).unwrap();

        let recent = store.recent(5).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].task_id, a.id);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.db");
        let first = task();
        let second = task();
        {
            let store = SqliteStore::open(&path).unwrap();
            store.put(AgentResult::success(&first, serde_json::json!({}))).unwrap();
            store.flush().unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        store.put(AgentResult::success(&second, serde_json::json!({}))).unwrap();
        let recent = store.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].task_id, second.id);
        assert_eq!(recent[1].task_id, first.id);
    }
}
