//! 推理后端层：抽象与实现（本地 Ollama / OpenAI 兼容远程 / Mock）

pub mod mock;
pub mod ollama;
pub mod openai;
pub mod traits;

pub use mock::MockLlmClient;
pub use ollama::OllamaClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{BackendError, BackendKind, ChatMessage, ChatRole, LlmClient};
