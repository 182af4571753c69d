//! Agent 层：能力接口、ACP 消息、注册表与内置 Agent
//!
//! 协调器只依赖 `Agent` trait；新增角色只需实现该 trait 并注册，无需修改协调器。

pub mod acp;
pub mod builtin;
pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use acp::{AcpMessage, AcpResponse, AcpStatus};
pub use builtin::{AnalysisAgent, GeneralAgent, ReconAgent, ReportAgent};
pub use registry::AgentRegistry;

use crate::core::AgentRole;
use crate::llm::LlmClient;

/// 角色元数据（shell `agents` / API `/api/agents`）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub role: AgentRole,
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl AgentDescriptor {
    pub fn new(role: AgentRole, description: impl Into<String>) -> Self {
        Self {
            role,
            description: description.into(),
            capabilities: Vec::new(),
        }
    }

    pub fn with_capabilities(mut self, caps: &[&str]) -> Self {
        self.capabilities = caps.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// 可插拔的 Worker；`backend` 是路由器为该任务选中的后端
#[async_trait]
pub trait Agent: Send + Sync {
    fn describe(&self) -> AgentDescriptor;

    /// Err 与 `status = failure` 的响应视为 AgentError（可重试）；
    /// `error_kind = SchemaInvalid` 的失败响应不重试
    async fn execute(
        &self,
        message: AcpMessage,
        backend: Arc<dyn LlmClient>,
    ) -> Result<AcpResponse, String>;
}

/// 注册默认内置 Agent；关键词表能产生的每个角色都有对应实现
pub fn register_builtin(registry: &AgentRegistry, simulation_only: bool) {
    registry.register(AgentRole::Recon, Arc::new(ReconAgent::new(simulation_only)));
    registry.register(AgentRole::Pattern, Arc::new(AnalysisAgent::pattern(simulation_only)));
    registry.register(AgentRole::Exploit, Arc::new(AnalysisAgent::exploit(simulation_only)));
    registry.register(AgentRole::Chain, Arc::new(AnalysisAgent::chain(simulation_only)));
    registry.register(AgentRole::Bypass, Arc::new(AnalysisAgent::bypass(simulation_only)));
    registry.register(AgentRole::Report, Arc::new(ReportAgent::new(simulation_only)));
    registry.register(AgentRole::General, Arc::new(GeneralAgent::new(simulation_only)));
}
