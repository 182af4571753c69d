//! 结果存储 trait 与内存实现
//!
//! 追加式、按 task_id 幂等：覆盖仅允许发生在前一条为非终态时，覆盖终态返回 ImmutableResult。
//! recent(n) 按写入顺序倒序返回，覆盖视为一次新写入。

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use thiserror::Error;

use crate::core::TaskId;
use crate::memory::AgentResult;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Result not found: {0}")]
    NotFound(String),

    #[error("Result for task {0} is terminal and cannot be overwritten")]
    ImmutableResult(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// 结果存储：单 key 单写者，读者只能看到旧终态或新值
pub trait MemoryStore: Send + Sync {
    fn put(&self, result: AgentResult) -> Result<(), MemoryError>;

    fn get(&self, task_id: &TaskId) -> Result<AgentResult, MemoryError>;

    /// 最近 n 条，最新在前，至多 n 条
    fn recent(&self, n: usize) -> Result<Vec<AgentResult>, MemoryError>;

    fn len(&self) -> Result<usize, MemoryError>;

    fn is_empty(&self) -> Result<bool, MemoryError> {
        Ok(self.len()? == 0)
    }

    /// 关闭前落盘；内存实现无事可做
    fn flush(&self) -> Result<(), MemoryError> {
        Ok(())
    }

    fn name(&self) -> &'static str;
}

#[derive(Default)]
struct Inner {
    /// task_id -> (写入序号, 结果)
    by_id: HashMap<TaskId, (u64, AgentResult)>,
    /// 写入序号 -> task_id，倒序遍历即 recent
    order: BTreeMap<u64, TaskId>,
    next_seq: u64,
}

/// 进程内实现（storage.backend = "memory" 或测试）
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> MemoryError {
    MemoryError::Storage("memory store lock poisoned".to_string())
}

impl MemoryStore for InMemoryStore {
    fn put(&self, result: AgentResult) -> Result<(), MemoryError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        if let Some((old_seq, existing)) = inner.by_id.get(&result.task_id) {
            if existing.is_terminal() {
                return Err(MemoryError::ImmutableResult(result.task_id.to_string()));
            }
            let old_seq = *old_seq;
            inner.order.remove(&old_seq);
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, result.task_id.clone());
        inner.by_id.insert(result.task_id.clone(), (seq, result));
        Ok(())
    }

    fn get(&self, task_id: &TaskId) -> Result<AgentResult, MemoryError> {
        let inner = self.inner.read().map_err(poisoned)?;
        inner
            .by_id
            .get(task_id)
            .map(|(_, r)| r.clone())
            .ok_or_else(|| MemoryError::NotFound(task_id.to_string()))
    }

    fn recent(&self, n: usize) -> Result<Vec<AgentResult>, MemoryError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .order
            .values()
            .rev()
            .take(n)
            .filter_map(|id| inner.by_id.get(id).map(|(_, r)| r.clone()))
            .collect())
    }

    fn len(&self) -> Result<usize, MemoryError> {
        Ok(self.inner.read().map_err(poisoned)?.by_id.len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
