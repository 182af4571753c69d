//! 远程推理后端：OpenAI 兼容 API
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）。API Key 从配置指定的环境变量读取，
//! 缺失时 `is_available` 返回 false，路由器据此降级而不是报错。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::RemoteBackendSection;
use crate::llm::{BackendError, BackendKind, ChatMessage, ChatRole, LlmClient};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        let p = self.prompt_tokens.load(Ordering::Relaxed);
        let c = self.completion_tokens.load(Ordering::Relaxed);
        (p, c, p + c)
    }
}

pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    has_key: bool,
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<String>) -> Self {
        let has_key = api_key.as_deref().is_some_and(|k| !k.trim().is_empty());
        let mut config = OpenAIConfig::new().with_api_key(api_key.unwrap_or_default());
        if let Some(url) = base_url {
            config = config.with_api_base(url);
        }
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            has_key,
            usage: TokenUsage::default(),
        }
    }

    pub fn from_config(cfg: &RemoteBackendSection) -> Self {
        let api_key = std::env::var(&cfg.api_key_env).ok();
        Self::new(cfg.base_url.as_deref(), &cfg.model, api_key)
    }

    fn to_openai_messages(
        messages: &[ChatMessage],
    ) -> Result<Vec<ChatCompletionRequestMessage>, BackendError> {
        let build_err = |e: async_openai::error::OpenAIError| BackendError::Request(e.to_string());
        messages
            .iter()
            .map(|m| {
                Ok(match m.role {
                    ChatRole::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(build_err)?,
                    ),
                    ChatRole::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(build_err)?,
                    ),
                    ChatRole::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(build_err)?,
                    ),
                })
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn id(&self) -> &str {
        "openai"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, BackendError> {
        if !self.has_key {
            return Err(BackendError::Policy("no API key configured".to_string()));
        }
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::to_openai_messages(messages)?)
            .build()
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        Ok(response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }

    async fn is_available(&self) -> bool {
        self.has_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_is_policy_refusal() {
        let client = OpenAiClient::new(None, "gpt-4o-mini", None);
        assert!(!client.is_available().await);
        let err = client.complete(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, BackendError::Policy(_)));
    }

    #[test]
    fn test_message_conversion() {
        let msgs = OpenAiClient::to_openai_messages(&[
            ChatMessage::system("s"),
            ChatMessage::user("u"),
            ChatMessage::assistant("a"),
        ])
        .unwrap();
        assert_eq!(msgs.len(), 3);
        assert!(matches!(msgs[0], ChatCompletionRequestMessage::System(_)));
    }
}
