//! 任务准入：按档位限制同时处于 running 的任务数
//!
//! 超出上限的任务进入优先级等待集：优先级高者先；同优先级按创建时间（再按序号）FIFO。
//! 上限随硬件档位调整；调低上限不会中断已运行的任务，只影响之后的准入。

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::core::Task;

/// 等待集排序键
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionKey {
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub seq: u64,
}

impl AdmissionKey {
    pub fn for_task(task: &Task) -> Self {
        Self {
            priority: task.priority,
            created_at: task.created_at,
            seq: task.seq,
        }
    }
}

impl Ord for AdmissionKey {
    /// 大者先出堆：优先级高、创建早、序号小
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for AdmissionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Waiter {
    key: AdmissionKey,
    /// 入队序号，键完全相同时保持 FIFO
    enqueued: u64,
    tx: oneshot::Sender<AdmissionPermit>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Waiter {}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.enqueued.cmp(&self.enqueued))
    }
}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct GateState {
    running: usize,
    limit: usize,
    waiters: BinaryHeap<Waiter>,
    next_enqueued: u64,
    peak: usize,
}

fn lock(state: &Mutex<GateState>) -> MutexGuard<'_, GateState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 在上限允许时按顺序唤醒等待者；接收端已放弃（取消）的跳过
fn wake_next(state: &Arc<Mutex<GateState>>, guard: &mut GateState) {
    while guard.running < guard.limit {
        let Some(waiter) = guard.waiters.pop() else {
            break;
        };
        guard.running += 1;
        guard.peak = guard.peak.max(guard.running);
        let permit = AdmissionPermit {
            state: Arc::clone(state),
            armed: true,
        };
        if let Err(mut unclaimed) = waiter.tx.send(permit) {
            // 持锁中，直接回收名额，不能走 Drop
            unclaimed.armed = false;
            guard.running -= 1;
        }
    }
}

/// 运行许可；drop 时释放名额并唤醒下一个等待者
pub struct AdmissionPermit {
    state: Arc<Mutex<GateState>>,
    armed: bool,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let state = Arc::clone(&self.state);
        let mut guard = lock(&state);
        guard.running = guard.running.saturating_sub(1);
        wake_next(&state, &mut guard);
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit").field("armed", &self.armed).finish()
    }
}

/// 准入闸门快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct GateStats {
    pub running: usize,
    pub waiting: usize,
    pub limit: usize,
    /// 观测到的最大同时运行数
    pub peak: usize,
}

#[derive(Clone)]
pub struct AdmissionGate {
    state: Arc<Mutex<GateState>>,
}

impl AdmissionGate {
    pub fn new(limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState {
                running: 0,
                limit: limit.max(1),
                waiters: BinaryHeap::new(),
                next_enqueued: 0,
                peak: 0,
            })),
        }
    }

    /// 等待运行许可；future 被丢弃（如取消）时自动退出等待集
    pub async fn acquire(&self, key: AdmissionKey) -> AdmissionPermit {
        loop {
            let rx = {
                let mut guard = lock(&self.state);
                if guard.running < guard.limit && guard.waiters.is_empty() {
                    guard.running += 1;
                    guard.peak = guard.peak.max(guard.running);
                    return AdmissionPermit {
                        state: Arc::clone(&self.state),
                        armed: true,
                    };
                }
                let (tx, rx) = oneshot::channel();
                let enqueued = guard.next_enqueued;
                guard.next_enqueued += 1;
                guard.waiters.push(Waiter {
                    key: key.clone(),
                    enqueued,
                    tx,
                });
                rx
            };
            if let Ok(permit) = rx.await {
                return permit;
            }
        }
    }

    /// 调整上限（至少为 1），返回旧值
    pub fn set_limit(&self, limit: usize) -> usize {
        let limit = limit.max(1);
        let mut guard = lock(&self.state);
        let old = guard.limit;
        guard.limit = limit;
        if limit != old {
            tracing::info!(from = old, to = limit, running = guard.running, "concurrency limit changed");
        }
        wake_next(&self.state, &mut guard);
        old
    }

    pub fn stats(&self) -> GateStats {
        let guard = lock(&self.state);
        GateStats {
            running: guard.running,
            waiting: guard.waiters.len(),
            limit: guard.limit,
            peak: guard.peak,
        }
    }

    pub fn limit(&self) -> usize {
        lock(&self.state).limit
    }

    pub fn running(&self) -> usize {
        lock(&self.state).running
    }
}
