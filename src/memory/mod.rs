//! 记忆层：任务结果的追加式存储（内存 / SQLite）与有界上下文窗口

pub mod context;
pub mod result;
pub mod sqlite;
pub mod store;

use std::sync::Arc;

pub use context::{build_context, context_prompt_section};
pub use result::AgentResult;
pub use sqlite::SqliteStore;
pub use store::{InMemoryStore, MemoryError, MemoryStore};

use crate::config::StorageSection;

/// 按配置创建存储后端
pub fn create_store(cfg: &StorageSection) -> Result<Arc<dyn MemoryStore>, MemoryError> {
    match cfg.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        "sqlite" => Ok(Arc::new(SqliteStore::open(&cfg.sqlite_path)?)),
        other => Err(MemoryError::Storage(format!(
            "unknown storage backend: {other}"
        ))),
    }
}
