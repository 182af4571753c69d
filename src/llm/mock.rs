//! Mock 后端（用于测试，无需网络）
//!
//! 默认回显最后一条 User 消息；可脚本化回复、可用性与失败，并统计调用次数。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{BackendError, BackendKind, ChatMessage, ChatRole, LlmClient};

pub struct MockLlmClient {
    id: String,
    kind: BackendKind,
    available: AtomicBool,
    replies: Mutex<VecDeque<Result<String, BackendError>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    probes: AtomicUsize,
    /// 每次调用的最后一条 User 消息
    prompts: Mutex<Vec<String>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new("mock", BackendKind::Local)
    }
}

impl MockLlmClient {
    pub fn new(id: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            id: id.into(),
            kind,
            available: AtomicBool::new(true),
            replies: Mutex::new(VecDeque::new()),
            delay: None,
            calls: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn local() -> Self {
        Self::new("mock-local", BackendKind::Local)
    }

    pub fn remote() -> Self {
        Self::new("mock-remote", BackendKind::Remote)
    }

    /// 追加一条脚本回复；脚本耗尽后回到回显
    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        self.push_reply(Ok(reply.into()));
        self
    }

    pub fn with_error(self, err: BackendError) -> Self {
        self.push_reply(Err(err));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn unavailable(self) -> Self {
        self.set_available(false);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn push_reply(&self, reply: Result<String, BackendError>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(reply);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        if let Ok(mut p) = self.prompts.lock() {
            p.push(last_user.to_string());
        }
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        let scripted = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        if let Some(reply) = scripted {
            return reply;
        }
        Ok(format!("Echo from {}: {}", self.id, last_user))
    }

    async fn is_available(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.available.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_then_echo() {
        let mock = MockLlmClient::local().with_reply("first");
        assert_eq!(mock.complete(&[ChatMessage::user("x")]).await.unwrap(), "first");
        let echo = mock.complete(&[ChatMessage::user("ping")]).await.unwrap();
        assert!(echo.ends_with("ping"));
        assert_eq!(mock.calls(), 2);
        assert_eq!(mock.prompts(), vec!["x".to_string(), "ping".to_string()]);
    }
}
