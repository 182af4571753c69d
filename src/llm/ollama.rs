//! 本地推理后端：Ollama HTTP API（/api/chat、/api/tags）
//!
//! 模型按当前硬件档位选择（3B / 8B / 70B 级默认值），档位来自 HardwareProfiler 的 watch 通道。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::config::{LocalBackendSection, TierValues};
use crate::hardware::{HardwareProfile, HardwareTier};
use crate::llm::{BackendError, BackendKind, ChatMessage, LlmClient};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    models: TierValues<String>,
    profile: Option<watch::Receiver<HardwareProfile>>,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, models: TierValues<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            models,
            profile: None,
        }
    }

    pub fn from_config(cfg: &LocalBackendSection) -> Self {
        Self::new(cfg.base_url.clone(), cfg.models.clone())
    }

    /// 跟随硬件档位切换模型
    pub fn with_profile(mut self, rx: watch::Receiver<HardwareProfile>) -> Self {
        self.profile = Some(rx);
        self
    }

    pub fn current_tier(&self) -> HardwareTier {
        self.profile
            .as_ref()
            .map(|rx| rx.borrow().tier)
            .unwrap_or(HardwareTier::Balanced)
    }

    pub fn current_model(&self) -> &str {
        self.models.get(self.current_tier())
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    fn id(&self) -> &str {
        "ollama"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, BackendError> {
        let model = self.current_model();
        let body = ChatRequest {
            model,
            messages,
            stream: false,
        };
        let resp = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    BackendError::Unavailable(e.to_string())
                } else if e.is_timeout() {
                    BackendError::Timeout
                } else {
                    BackendError::Request(e.to_string())
                }
            })?;
        if !resp.status().is_success() {
            return Err(BackendError::Request(format!(
                "ollama returned {} for model {model}",
                resp.status()
            )));
        }
        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;
        Ok(parsed.message.content)
    }

    async fn is_available(&self) -> bool {
        let probe = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;
        match probe {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "ollama probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_follows_tier() {
        let cfg = LocalBackendSection::default();
        let (tx, rx) = watch::channel(HardwareProfile::fixed(HardwareTier::High));
        let client = OllamaClient::from_config(&cfg).with_profile(rx);
        assert_eq!(client.current_model(), "llama3.1:70b");
        tx.send_replace(HardwareProfile::fixed(HardwareTier::Low));
        assert_eq!(client.current_model(), "llama3.2:3b");
    }

    #[tokio::test]
    async fn test_unreachable_is_unavailable() {
        let client = OllamaClient::new("http://127.0.0.1:9", LocalBackendSection::default().models);
        assert!(!client.is_available().await);
    }
}
