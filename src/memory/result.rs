//! AgentResult：一次任务执行的结构化输出
//!
//! payload 至少包含 `status`；失败时另含 `error_kind` 与 `message`。写入 MemoryStore 后不可变。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{AgentRole, ErrorKind, RequestId, Task, TaskId, TaskStatus};
use crate::routing::RouteDecision;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub task_id: TaskId,
    pub request_id: RequestId,
    pub role: AgentRole,
    pub status: TaskStatus,
    /// 实际下发给 Agent 的输入（经路由后可能已被安全改写）
    #[serde(default)]
    pub input: Value,
    pub payload: Map<String, Value>,
    /// 审计用：本次执行所选后端
    pub route: Option<RouteDecision>,
    /// 实际调用 Agent 的次数（含重试）
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

impl AgentResult {
    fn base(task: &Task, status: TaskStatus, payload: Map<String, Value>) -> Self {
        Self {
            task_id: task.id.clone(),
            request_id: task.request_id.clone(),
            role: task.role.clone(),
            status,
            input: task.input.clone(),
            payload,
            route: None,
            attempts: 0,
            recorded_at: Utc::now(),
        }
    }

    /// 成功结果：`{"status": "success", "data": ...}`
    pub fn success(task: &Task, data: Value) -> Self {
        let mut payload = Map::new();
        payload.insert("status".into(), Value::from("success"));
        payload.insert("data".into(), data);
        Self::base(task, TaskStatus::Succeeded, payload)
    }

    /// 失败结果：`{"status": "failure", "error_kind": ..., "message": ...}`
    pub fn failure(task: &Task, kind: ErrorKind, message: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert("status".into(), Value::from("failure"));
        payload.insert("error_kind".into(), Value::from(kind.as_str()));
        payload.insert("message".into(), Value::from(message.into()));
        Self::base(task, TaskStatus::Failed, payload)
    }

    /// 非终态快照（如 running），之后可被覆盖
    pub fn in_progress(task: &Task) -> Self {
        let mut payload = Map::new();
        payload.insert("status".into(), Value::from(task.status.as_str()));
        Self::base(task, task.status, payload)
    }

    pub fn with_route(mut self, route: Option<RouteDecision>) -> Self {
        self.route = route;
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.payload
            .get("error_kind")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn message(&self) -> Option<&str> {
        self.payload.get("message").and_then(Value::as_str)
    }

    pub fn data(&self) -> Option<&Value> {
        self.payload.get("data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_payload_fields() {
        let task = Task::new(RequestId::new(), AgentRole::Recon, serde_json::json!({}));
        let r = AgentResult::failure(&task, ErrorKind::Timeout, "took too long");
        assert_eq!(r.payload["status"], "failure");
        assert_eq!(r.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(r.message(), Some("took too long"));
        assert!(r.is_terminal());
    }

    #[test]
    fn test_success_payload_fields() {
        let task = Task::new(RequestId::new(), AgentRole::Report, serde_json::json!({}));
        let r = AgentResult::success(&task, serde_json::json!({"summary": "ok"}));
        assert_eq!(r.payload["status"], "success");
        assert!(r.error_kind().is_none());
        assert_eq!(r.data().unwrap()["summary"], "ok");
    }
}
