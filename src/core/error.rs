//! 错误分类与编排错误
//!
//! ErrorKind 是写入 AgentResult 的终态失败类型；OrchestratorError 是库内部传播的错误，
//! 二者一一对应（另含配置 / 存储 / 空请求等结构性错误）。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::MemoryError;

/// 任务终态失败类型（写入结果 payload 的 `error_kind` 字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// 协调器找不到该角色的 Agent
    UnknownRole,
    /// 路由器所有路径均不可用
    NoBackendAvailable,
    Timeout,
    /// Agent 内部出错或返回 failure
    AgentError,
    /// 同一请求中的上游任务失败
    DependencyFailed,
    /// 试图覆盖终态结果
    ImmutableResult,
    /// 分解输出或 Agent 响应未通过校验
    SchemaInvalid,
    Cancelled,
}

impl ErrorKind {
    /// 仅 Timeout / AgentError 可重试；其余表示结构性问题，直接成为终态
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::AgentError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownRole => "UnknownRole",
            ErrorKind::NoBackendAvailable => "NoBackendAvailable",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::AgentError => "AgentError",
            ErrorKind::DependencyFailed => "DependencyFailed",
            ErrorKind::ImmutableResult => "ImmutableResult",
            ErrorKind::SchemaInvalid => "SchemaInvalid",
            ErrorKind::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 编排过程中的错误
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Unknown agent role: {0}")]
    UnknownRole(String),

    #[error("No backend available: {0}")]
    NoBackendAvailable(String),

    #[error("Agent invocation timed out after {0}s")]
    Timeout(u64),

    #[error("Agent error: {0}")]
    AgentError(String),

    #[error("Dependency failed: {0}")]
    DependencyFailed(String),

    #[error("Result for task {0} is already terminal")]
    ImmutableResult(String),

    #[error("Schema invalid: {0}")]
    SchemaInvalid(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Retry limit reached ({0})")]
    RetryLimit(u32),

    #[error("Request input is empty")]
    EmptyRequest,

    #[error("Request {0} is already in progress")]
    DuplicateRequest(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl OrchestratorError {
    /// 映射为写入结果的 ErrorKind；结构性错误（非法迁移等）归为 AgentError
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::UnknownRole(_) => ErrorKind::UnknownRole,
            OrchestratorError::NoBackendAvailable(_) => ErrorKind::NoBackendAvailable,
            OrchestratorError::Timeout(_) => ErrorKind::Timeout,
            OrchestratorError::AgentError(_) => ErrorKind::AgentError,
            OrchestratorError::DependencyFailed(_) => ErrorKind::DependencyFailed,
            OrchestratorError::ImmutableResult(_) => ErrorKind::ImmutableResult,
            OrchestratorError::SchemaInvalid(_) => ErrorKind::SchemaInvalid,
            OrchestratorError::Cancelled => ErrorKind::Cancelled,
            OrchestratorError::InvalidTransition { .. }
            | OrchestratorError::RetryLimit(_)
            | OrchestratorError::EmptyRequest
            | OrchestratorError::DuplicateRequest(_)
            | OrchestratorError::Storage(_)
            | OrchestratorError::Config(_) => ErrorKind::AgentError,
        }
    }
}

impl From<MemoryError> for OrchestratorError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::ImmutableResult(id) => OrchestratorError::ImmutableResult(id),
            other => OrchestratorError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::AgentError.is_retryable());
        for kind in [
            ErrorKind::UnknownRole,
            ErrorKind::NoBackendAvailable,
            ErrorKind::DependencyFailed,
            ErrorKind::ImmutableResult,
            ErrorKind::SchemaInvalid,
            ErrorKind::Cancelled,
        ] {
            assert!(!kind.is_retryable(), "{kind} must not be retried");
        }
    }

    #[test]
    fn test_kind_wire_form() {
        let v = serde_json::to_value(ErrorKind::DependencyFailed).unwrap();
        assert_eq!(v, serde_json::json!("DependencyFailed"));
        assert_eq!(ErrorKind::NoBackendAvailable.to_string(), "NoBackendAvailable");
    }

    #[test]
    fn test_memory_error_conversion() {
        let err: OrchestratorError = MemoryError::ImmutableResult("t1".into()).into();
        assert_eq!(err.kind(), ErrorKind::ImmutableResult);
    }
}
