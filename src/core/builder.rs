//! 编排器构建器：统一的初始化逻辑
//!
//! Shell、API 与测试共用同一条装配路径：配置 → 硬件画像 → 后端路由 → 结果存储 → Agent 注册表 → 协调器 / 分解器。
//! 各组件都可注入替身（探针、后端、存储、Agent），未注入时按配置创建。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::agents::{register_builtin, Agent, AgentRegistry};
use crate::config::{load_config, AppConfig};
use crate::core::coordinator::{AgentCoordinator, CoordinatorSettings};
use crate::core::orchestrator::Orchestrator;
use crate::core::session_supervisor::SessionSupervisor;
use crate::core::{AgentRole, OrchestratorError};
use crate::hardware::{HardwareProfiler, ResourceProbe, SysinfoProbe, TierThresholds};
use crate::llm::{LlmClient, OllamaClient, OpenAiClient};
use crate::memory::{create_store, MemoryStore};
use crate::planning::{PlannerSettings, TaskDecomposer};
use crate::routing::{BackendRouter, LocalRoute, RemoteRoute};

pub struct OrchestratorBuilder {
    config: AppConfig,
    probe: Option<Box<dyn ResourceProbe>>,
    local: Option<Arc<dyn LlmClient>>,
    remote: Option<Arc<dyn LlmClient>>,
    store: Option<Arc<dyn MemoryStore>>,
    agents: Vec<(AgentRole, Arc<dyn Agent>)>,
    builtin_agents: bool,
    agent_timeout: Option<Duration>,
    root: Option<CancellationToken>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            probe: None,
            local: None,
            remote: None,
            store: None,
            agents: Vec::new(),
            builtin_agents: true,
            agent_timeout: None,
            root: None,
        }
    }

    /// 替换资源探针（默认 sysinfo）
    pub fn with_probe(mut self, probe: Box<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// 注入本地后端；优先于 backends.local 配置
    pub fn with_local_backend(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.local = Some(client);
        self
    }

    /// 注入远程后端；优先于 backends.remote 配置
    pub fn with_remote_backend(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.remote = Some(client);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 追加 Agent；同角色覆盖内置 Agent
    pub fn with_agent(mut self, role: AgentRole, agent: Arc<dyn Agent>) -> Self {
        self.agents.push((role, agent));
        self
    }

    pub fn without_builtin_agents(mut self) -> Self {
        self.builtin_agents = false;
        self
    }

    /// 覆盖单次 Agent 调用超时（配置只支持整秒）
    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = Some(timeout);
        self
    }

    /// 以外部 token（关闭信号）作为所有请求的根
    pub fn with_root_token(mut self, token: CancellationToken) -> Self {
        self.root = Some(token);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn build_router(&mut self, profiler: &HardwareProfiler) -> BackendRouter {
        let cfg = &self.config.backends;
        let ttl = Duration::from_secs(cfg.local.probe_ttl_secs);

        let local_client: Option<Arc<dyn LlmClient>> = match self.local.take() {
            Some(client) => Some(client),
            None if cfg.local.enabled => Some(Arc::new(
                OllamaClient::from_config(&cfg.local).with_profile(profiler.subscribe()),
            )),
            None => None,
        };
        let remote_client: Option<Arc<dyn LlmClient>> = match self.remote.take() {
            Some(client) => Some(client),
            None if cfg.remote.enabled => Some(Arc::new(OpenAiClient::from_config(&cfg.remote))),
            None => None,
        };

        let local = local_client.map(|c| LocalRoute::new(c, cfg.local.capability.clone(), ttl));
        let remote = remote_client.map(|c| {
            RemoteRoute::new(c, cfg.remote.capability, cfg.remote.allowed_roles.clone(), ttl)
        });
        if local.is_none() && remote.is_none() {
            tracing::warn!("no inference backend configured; every task will fail with NoBackendAvailable");
        }
        BackendRouter::new(local, remote, self.config.app.safe_mode)
    }

    pub fn build(mut self) -> Result<Arc<Orchestrator>, OrchestratorError> {
        let probe = self
            .probe
            .take()
            .unwrap_or_else(|| Box::new(SysinfoProbe::new()));
        let profiler = Arc::new(HardwareProfiler::new(
            probe,
            TierThresholds::from(&self.config.hardware),
        ));
        let router = Arc::new(self.build_router(&profiler));

        let store = match self.store.take() {
            Some(store) => store,
            None => create_store(&self.config.storage)?,
        };

        let registry = Arc::new(AgentRegistry::new());
        if self.builtin_agents {
            register_builtin(&registry, self.config.app.simulation_only);
        }
        for (role, agent) in self.agents.drain(..) {
            registry.register(role, agent);
        }

        let mut settings = CoordinatorSettings::from_config(&self.config);
        if let Some(timeout) = self.agent_timeout {
            settings.agent_timeout = timeout;
        }
        let coordinator = Arc::new(AgentCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&router),
            Arc::clone(&store),
            profiler.subscribe(),
            settings,
        ));
        let decomposer = TaskDecomposer::new(
            Arc::clone(&router),
            registry,
            store,
            PlannerSettings::from_config(&self.config),
        );
        let supervisor = match self.root.take() {
            Some(root) => SessionSupervisor::with_root(root),
            None => SessionSupervisor::new(),
        };

        tracing::info!(
            mode = %self.config.app.operational_mode,
            tier = %profiler.current().tier,
            store = coordinator.store().name(),
            local = router.has_local(),
            remote = router.has_remote(),
            agents = coordinator.registry().len(),
            "orchestrator ready"
        );

        Ok(Arc::new(Orchestrator::new(
            self.config,
            profiler,
            router,
            decomposer,
            coordinator,
            supervisor,
        )))
    }
}

/// 便捷函数：按默认查找路径加载配置并创建构建器；配置加载失败时退回默认值
pub fn create_orchestrator_builder(config_path: Option<PathBuf>) -> Result<OrchestratorBuilder, OrchestratorError> {
    let config = match config_path {
        Some(path) => load_config(Some(path)).map_err(|e| OrchestratorError::Config(e.to_string()))?,
        None => load_config(None).unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            AppConfig::default()
        }),
    };
    Ok(OrchestratorBuilder::new(config))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::agents::{AcpMessage, AcpResponse, AgentDescriptor};
    use crate::hardware::{HardwareTier, ResourceSample, StaticProbe};
    use crate::llm::MockLlmClient;
    use crate::memory::InMemoryStore;

    fn low_probe() -> Box<dyn ResourceProbe> {
        Box::new(StaticProbe::new(ResourceSample::with_memory_gb(2.0, 8.0)))
    }

    struct Osint;

    #[async_trait]
    impl Agent for Osint {
        fn describe(&self) -> AgentDescriptor {
            AgentDescriptor::new(AgentRole::Custom("osint".into()), "open-source intel")
        }

        async fn execute(&self, msg: AcpMessage, _backend: Arc<dyn LlmClient>) -> Result<AcpResponse, String> {
            Ok(AcpResponse::success(&msg, serde_json::json!({})))
        }
    }

    #[tokio::test]
    async fn test_build_with_injected_parts() {
        let orch = OrchestratorBuilder::new(AppConfig::default())
            .with_probe(low_probe())
            .with_local_backend(Arc::new(MockLlmClient::local()))
            .with_store(Arc::new(InMemoryStore::new()))
            .with_agent(AgentRole::Custom("osint".into()), Arc::new(Osint))
            .build()
            .unwrap();
        assert_eq!(orch.profiler().current().tier, HardwareTier::Low);
        assert_eq!(orch.coordinator().gate_stats().limit, 1);
        assert_eq!(orch.agents().len(), 8);
        assert_eq!(orch.store().name(), "memory");
    }

    #[tokio::test]
    async fn test_no_backends_configured() {
        let mut cfg = AppConfig::default();
        cfg.backends.local.enabled = false;
        let orch = OrchestratorBuilder::new(cfg)
            .with_probe(low_probe())
            .with_store(Arc::new(InMemoryStore::new()))
            .without_builtin_agents()
            .build()
            .unwrap();
        let status = orch.status();
        assert!(!status.local_backend && !status.remote_backend);
        assert_eq!(status.agents, 0);
    }

    #[tokio::test]
    async fn test_sqlite_store_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.storage.sqlite_path = dir.path().join("results.db");
        let orch = OrchestratorBuilder::new(cfg)
            .with_probe(low_probe())
            .with_local_backend(Arc::new(MockLlmClient::local()))
            .build()
            .unwrap();
        assert_eq!(orch.store().name(), "sqlite");
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let err = create_orchestrator_builder(Some(PathBuf::from("/nonexistent/p.toml")));
        assert!(matches!(err, Err(OrchestratorError::Config(_))));
    }
}
