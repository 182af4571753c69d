//! 推理后端抽象
//!
//! 所有后端（本地 Ollama / OpenAI 兼容远程 / Mock）实现 LlmClient：complete（非流式）与 is_available（探活）。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 后端错误；路由器把 Unavailable / Policy 视为可降级，不致命
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend refused by policy: {0}")]
    Policy(String),

    #[error("Backend request failed: {0}")]
    Request(String),

    #[error("Backend timed out")]
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// 本地 / 离线推理
    Local,
    /// 远程 / 在线推理
    Remote,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Local => f.write_str("local"),
            BackendKind::Remote => f.write_str("remote"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// 推理后端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 后端标识（写入 RouteDecision 供审计）
    fn id(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// 非流式完成
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, BackendError>;

    /// 探活；默认认为可用
    async fn is_available(&self) -> bool {
        true
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
