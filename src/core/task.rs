//! 任务与请求数据模型
//!
//! Request 由编排循环接收，经分解器变为有序的 Task 列表；Task 状态只能沿
//! pending → routed → running → {succeeded | failed} 单调前进，唯一的回退是显式重试（回到 pending 并计数）。

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::OrchestratorError;

/// 任务 ID（`task_<uuid>`）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new() -> Self {
        Self(format!("task_{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 请求关联 ID（correlation id）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(format!("req_{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 能力等级：1 = 轻量，2 = 标准，3 = 重型（后端按档位声明，任务声明最低要求）
pub type Capability = u8;

/// Agent 角色（已知角色 + 可扩展的自定义角色）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AgentRole {
    Planner,
    Recon,
    Exploit,
    Chain,
    Pattern,
    Bypass,
    Report,
    /// 无法确定角色时的默认归宿
    General,
    Custom(String),
}

impl AgentRole {
    pub const KNOWN: [AgentRole; 8] = [
        AgentRole::Planner,
        AgentRole::Recon,
        AgentRole::Exploit,
        AgentRole::Chain,
        AgentRole::Pattern,
        AgentRole::Bypass,
        AgentRole::Report,
        AgentRole::General,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Recon => "recon",
            AgentRole::Exploit => "exploit",
            AgentRole::Chain => "chain",
            AgentRole::Pattern => "pattern",
            AgentRole::Bypass => "bypass",
            AgentRole::Report => "report",
            AgentRole::General => "general",
            AgentRole::Custom(name) => name,
        }
    }

    /// 默认最低能力要求（任务可覆盖）
    pub fn min_capability(&self) -> Capability {
        match self {
            AgentRole::Exploit | AgentRole::Chain | AgentRole::Bypass => 2,
            _ => 1,
        }
    }

    /// 默认优先级（越大越先调度）
    pub fn default_priority(&self) -> i32 {
        match self {
            AgentRole::Planner => 90,
            AgentRole::Recon => 80,
            AgentRole::Pattern => 60,
            AgentRole::Exploit | AgentRole::General => 50,
            AgentRole::Chain | AgentRole::Bypass => 40,
            AgentRole::Report => 10,
            AgentRole::Custom(_) => 50,
        }
    }
}

impl From<String> for AgentRole {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "planner" => AgentRole::Planner,
            "recon" => AgentRole::Recon,
            "exploit" => AgentRole::Exploit,
            "chain" => AgentRole::Chain,
            "pattern" => AgentRole::Pattern,
            "bypass" => AgentRole::Bypass,
            "report" => AgentRole::Report,
            "general" => AgentRole::General,
            _ => AgentRole::Custom(s.trim().to_string()),
        }
    }
}

impl From<&str> for AgentRole {
    fn from(s: &str) -> Self {
        AgentRole::from(s.to_string())
    }
}

impl From<AgentRole> for String {
    fn from(role: AgentRole) -> Self {
        role.as_str().to_string()
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    /// 已选定后端，等待并发许可
    Routed,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Routed => 1,
            TaskStatus::Running => 2,
            TaskStatus::Succeeded | TaskStatus::Failed => 3,
        }
    }

    /// 单调前进：Succeeded 只能从 Running 到达；Failed 可从任一非终态到达
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            TaskStatus::Succeeded => *self == TaskStatus::Running,
            TaskStatus::Failed => true,
            _ => next.rank() == self.rank() + 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Routed => "routed",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static NEXT_TASK_SEQ: AtomicU64 = AtomicU64::new(0);

/// 工作单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub request_id: RequestId,
    pub role: AgentRole,
    /// 不透明输入
    pub input: serde_json::Value,
    pub priority: i32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    /// 进程内单调序号：同一时间戳下的 FIFO 次序
    pub seq: u64,
    /// 全部 succeeded 后才允许进入 routed
    pub depends_on: Vec<TaskId>,
    pub retries: u32,
    pub min_capability: Capability,
}

impl Task {
    pub fn new(request_id: RequestId, role: AgentRole, input: serde_json::Value) -> Self {
        Self {
            id: TaskId::new(),
            request_id,
            priority: role.default_priority(),
            min_capability: role.min_capability(),
            role,
            input,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            seq: NEXT_TASK_SEQ.fetch_add(1, Ordering::Relaxed),
            depends_on: Vec::new(),
            retries: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependency(mut self, task_id: TaskId) -> Self {
        if !self.depends_on.contains(&task_id) {
            self.depends_on.push(task_id);
        }
        self
    }

    pub fn with_min_capability(mut self, capability: Capability) -> Self {
        self.min_capability = capability;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 推进状态；非法迁移返回 InvalidTransition，状态不变
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), OrchestratorError> {
        if !self.status.can_transition_to(next) {
            return Err(OrchestratorError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// 显式重试：回到 pending，重试计数 +1；超过上限返回 RetryLimit
    pub fn reset_for_retry(&mut self, max_retries: u32) -> Result<(), OrchestratorError> {
        if self.status.is_terminal() || self.status == TaskStatus::Pending {
            return Err(OrchestratorError::InvalidTransition {
                from: self.status.to_string(),
                to: TaskStatus::Pending.to_string(),
            });
        }
        if self.retries >= max_retries {
            return Err(OrchestratorError::RetryLimit(max_retries));
        }
        self.retries += 1;
        self.status = TaskStatus::Pending;
        Ok(())
    }
}

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationalMode {
    /// 全自动
    Autopilot,
    /// 默认：模型辅助规划 + 用户可见
    #[default]
    Assisted,
    /// 用户驱动：只用确定性关键词分解
    Manual,
}

impl std::str::FromStr for OperationalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "autopilot" => Ok(OperationalMode::Autopilot),
            "assisted" => Ok(OperationalMode::Assisted),
            "manual" => Ok(OperationalMode::Manual),
            other => Err(format!("unknown operational mode: {other}")),
        }
    }
}

impl std::fmt::Display for OperationalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationalMode::Autopilot => "autopilot",
            OperationalMode::Assisted => "assisted",
            OperationalMode::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// 请求输入：自由文本，或结构化命令（如 `recon <target>`）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestInput {
    Text { text: String },
    Command {
        role: AgentRole,
        #[serde(default)]
        args: serde_json::Value,
    },
}

impl RequestInput {
    pub fn is_blank(&self) -> bool {
        match self {
            RequestInput::Text { text } => text.trim().is_empty(),
            RequestInput::Command { .. } => false,
        }
    }

    /// 用于日志与规划提示的文本形式
    pub fn describe(&self) -> String {
        match self {
            RequestInput::Text { text } => text.clone(),
            RequestInput::Command { role, args } => format!("{role} {args}"),
        }
    }
}

/// 外部提交的工作单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub input: RequestInput,
    pub mode: OperationalMode,
    pub created_at: DateTime<Utc>,
}

impl Request {
    pub fn text(text: impl Into<String>, mode: OperationalMode) -> Self {
        Self::new(RequestInput::Text { text: text.into() }, mode)
    }

    pub fn command(role: AgentRole, args: serde_json::Value, mode: OperationalMode) -> Self {
        Self::new(RequestInput::Command { role, args }, mode)
    }

    pub fn new(input: RequestInput, mode: OperationalMode) -> Self {
        Self {
            id: RequestId::new(),
            input,
            mode,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: RequestId) -> Self {
        self.id = id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(RequestId::new(), AgentRole::Recon, serde_json::json!({}))
    }

    #[test]
    fn test_status_forward_only() {
        let mut t = task();
        assert!(t.transition(TaskStatus::Running).is_err());
        t.transition(TaskStatus::Routed).unwrap();
        assert!(t.transition(TaskStatus::Pending).is_err());
        t.transition(TaskStatus::Running).unwrap();
        t.transition(TaskStatus::Succeeded).unwrap();
        assert!(t.transition(TaskStatus::Failed).is_err());
        assert_eq!(t.status, TaskStatus::Succeeded);
    }

    #[test]
    fn test_fail_from_pending() {
        let mut t = task();
        t.transition(TaskStatus::Failed).unwrap();
        assert!(t.is_terminal());
    }

    #[test]
    fn test_succeed_requires_running() {
        let mut t = task();
        t.transition(TaskStatus::Routed).unwrap();
        assert!(t.transition(TaskStatus::Succeeded).is_err());
    }

    #[test]
    fn test_retry_bounded() {
        let mut t = task();
        for _ in 0..2 {
            t.transition(TaskStatus::Routed).unwrap();
            t.transition(TaskStatus::Running).unwrap();
            t.reset_for_retry(2).unwrap();
            assert_eq!(t.status, TaskStatus::Pending);
        }
        t.transition(TaskStatus::Routed).unwrap();
        t.transition(TaskStatus::Running).unwrap();
        assert!(matches!(
            t.reset_for_retry(2),
            Err(OrchestratorError::RetryLimit(2))
        ));
        assert_eq!(t.retries, 2);
    }

    #[test]
    fn test_role_roundtrip_and_custom() {
        assert_eq!(AgentRole::from("Recon"), AgentRole::Recon);
        assert_eq!(AgentRole::from("osint"), AgentRole::Custom("osint".into()));
        let v = serde_json::to_value(AgentRole::Report).unwrap();
        assert_eq!(v, serde_json::json!("report"));
    }

    #[test]
    fn test_seq_monotonic() {
        let a = task();
        let b = task();
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("AUTOPILOT".parse::<OperationalMode>().unwrap(), OperationalMode::Autopilot);
        assert!("yolo".parse::<OperationalMode>().is_err());
    }
}
