//! Agent 通信协议（ACP）：协调器与 Agent 之间交换的消息
//!
//! 请求：`{agent_role, task_id, input, priority, context, timestamp}`；
//! 响应必须回显 `task_id` 与 `agent_role`，`status` ∈ {success, failure}。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{AgentRole, Task, TaskId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcpMessage {
    pub agent_role: AgentRole,
    pub task_id: TaskId,
    pub input: Value,
    pub priority: i32,
    /// 有界的最近结果窗口
    pub context: Value,
    /// ISO-8601
    pub timestamp: DateTime<Utc>,
}

impl AcpMessage {
    /// `input` 取路由后的（可能已改写的）输入
    pub fn for_task(task: &Task, input: Value, context: Value) -> Self {
        Self {
            agent_role: task.role.clone(),
            task_id: task.id.clone(),
            input,
            priority: task.priority,
            context,
            timestamp: Utc::now(),
        }
    }

    /// 读取输入中的字符串字段
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcpStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcpResponse {
    pub task_id: TaskId,
    pub agent_role: AgentRole,
    pub status: AcpStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AcpResponse {
    pub fn success(msg: &AcpMessage, data: Value) -> Self {
        Self {
            task_id: msg.task_id.clone(),
            agent_role: msg.agent_role.clone(),
            status: AcpStatus::Success,
            data: Some(data),
            error_kind: None,
            message: None,
        }
    }

    pub fn failure(msg: &AcpMessage, message: impl Into<String>) -> Self {
        Self {
            task_id: msg.task_id.clone(),
            agent_role: msg.agent_role.clone(),
            status: AcpStatus::Failure,
            data: None,
            error_kind: Some("AgentError".to_string()),
            message: Some(message.into()),
        }
    }

    /// 输入本身不可用（如缺少必填字段）；重试无意义
    pub fn invalid_input(msg: &AcpMessage, message: impl Into<String>) -> Self {
        Self {
            error_kind: Some("SchemaInvalid".to_string()),
            ..Self::failure(msg, message)
        }
    }

    /// 校验回显字段与 success 时的 data；失败返回原因
    pub fn validate_against(&self, msg: &AcpMessage) -> Result<(), String> {
        if self.task_id != msg.task_id {
            return Err(format!(
                "response task_id {} does not match {}",
                self.task_id, msg.task_id
            ));
        }
        if self.agent_role != msg.agent_role {
            return Err(format!(
                "response agent_role {} does not match {}",
                self.agent_role, msg.agent_role
            ));
        }
        if self.status == AcpStatus::Success && self.data.is_none() {
            return Err("success response without data".to_string());
        }
        Ok(())
    }
}
