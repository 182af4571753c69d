//! 后端路由器：本地 → 远程 → 安全改写后重试一次 → NoBackendAvailable
//!
//! - 本地可用且 `capability[当前档位] >= task.min_capability` 时选本地
//! - 否则若远程已配置、策略允许该角色且探活成功，选远程；失败只降级不报错
//! - safe_mode 下安全过滤命中时先改写输入；两路都不可用时改写并重走一遍（每次路由至多改写一次）
//!
//! 探活结果按 TTL 缓存；重走的那一遍强制重新探活。

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::TierValues;
use crate::core::{AgentRole, Capability, OrchestratorError, Task};
use crate::hardware::HardwareProfile;
use crate::llm::{BackendKind, LlmClient};
use crate::routing::SafetyRewriter;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("No backend available: {0}")]
    NoBackendAvailable(String),
}

impl From<RouteError> for OrchestratorError {
    fn from(e: RouteError) -> Self {
        match e {
            RouteError::NoBackendAvailable(reason) => OrchestratorError::NoBackendAvailable(reason),
        }
    }
}

/// 单个任务的路由结果（随 AgentResult 写入存储供审计）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub backend: String,
    pub kind: BackendKind,
    /// 输入在分派前是否经过安全改写
    pub rewritten: bool,
}

/// 路由产物：决策 + 实际下发的输入 + 选中的后端
#[derive(Clone)]
pub struct Routed {
    pub decision: RouteDecision,
    pub input: Value,
    pub client: Arc<dyn LlmClient>,
}

impl std::fmt::Debug for Routed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Routed")
            .field("decision", &self.decision)
            .field("input", &self.input)
            .finish()
    }
}

/// 带 TTL 缓存的探活
struct ProbeCache {
    ttl: Duration,
    last: Mutex<Option<(Instant, bool)>>,
}

impl ProbeCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            last: Mutex::new(None),
        }
    }

    async fn available(&self, client: &dyn LlmClient, force: bool) -> bool {
        if !force {
            let cached = self.last.lock().ok().and_then(|g| *g);
            if let Some((at, ok)) = cached {
                if at.elapsed() < self.ttl {
                    return ok;
                }
            }
        }
        let ok = client.is_available().await;
        if let Ok(mut g) = self.last.lock() {
            *g = Some((Instant::now(), ok));
        }
        ok
    }
}

pub struct LocalRoute {
    client: Arc<dyn LlmClient>,
    capability: TierValues<Capability>,
    probe: ProbeCache,
}

impl LocalRoute {
    pub fn new(client: Arc<dyn LlmClient>, capability: TierValues<Capability>, probe_ttl: Duration) -> Self {
        Self {
            client,
            capability,
            probe: ProbeCache::new(probe_ttl),
        }
    }
}

pub struct RemoteRoute {
    client: Arc<dyn LlmClient>,
    capability: Capability,
    /// 空表示全部角色允许
    allowed_roles: Vec<AgentRole>,
    probe: ProbeCache,
}

impl RemoteRoute {
    pub fn new(
        client: Arc<dyn LlmClient>,
        capability: Capability,
        allowed_roles: Vec<AgentRole>,
        probe_ttl: Duration,
    ) -> Self {
        Self {
            client,
            capability,
            allowed_roles,
            probe: ProbeCache::new(probe_ttl),
        }
    }

    fn permits(&self, role: &AgentRole) -> bool {
        self.allowed_roles.is_empty() || self.allowed_roles.contains(role)
    }
}

pub struct BackendRouter {
    local: Option<LocalRoute>,
    remote: Option<RemoteRoute>,
    rewriter: SafetyRewriter,
    safe_mode: bool,
}

impl BackendRouter {
    pub fn new(local: Option<LocalRoute>, remote: Option<RemoteRoute>, safe_mode: bool) -> Self {
        Self {
            local,
            remote,
            rewriter: SafetyRewriter::new(),
            safe_mode,
        }
    }

    pub fn has_local(&self) -> bool {
        self.local.is_some()
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// 为任务选择后端
    pub async fn route(&self, task: &Task, profile: &HardwareProfile) -> Result<Routed, RouteError> {
        self.route_input(&task.role, task.min_capability, &task.input, profile)
            .await
    }

    /// 按角色 / 最低能力 / 输入路由；规划器用它为 `planner` 角色取后端
    pub async fn route_input(
        &self,
        role: &AgentRole,
        min_capability: Capability,
        input: &Value,
        profile: &HardwareProfile,
    ) -> Result<Routed, RouteError> {
        let mut input = input.clone();
        let mut rewritten = false;

        if self.safe_mode && self.rewriter.flags(&input) {
            tracing::info!(role = %role, "safety filter flagged input, rewriting");
            input = self.rewriter.rewrite(&input);
            rewritten = true;
        }

        if let Some(routed) = self.try_paths(role, min_capability, &input, profile, rewritten, false).await {
            return Ok(routed);
        }

        if !rewritten {
            tracing::debug!(role = %role, "no backend usable, retrying once with rewritten input");
            input = self.rewriter.rewrite(&input);
            if let Some(routed) = self.try_paths(role, min_capability, &input, profile, true, true).await {
                return Ok(routed);
            }
        }

        Err(RouteError::NoBackendAvailable(format!(
            "role={role} min_capability={min_capability} tier={}",
            profile.tier
        )))
    }

    async fn try_paths(
        &self,
        role: &AgentRole,
        min_capability: Capability,
        input: &Value,
        profile: &HardwareProfile,
        rewritten: bool,
        force_probe: bool,
    ) -> Option<Routed> {
        if let Some(local) = &self.local {
            let capability = *local.capability.get(profile.tier);
            if capability >= min_capability {
                if local.probe.available(local.client.as_ref(), force_probe).await {
                    return Some(Self::routed(&local.client, input, rewritten));
                }
                tracing::debug!(backend = local.client.id(), "local backend unavailable");
            } else {
                tracing::debug!(
                    backend = local.client.id(),
                    capability,
                    min_capability,
                    tier = %profile.tier,
                    "local backend below required capability"
                );
            }
        }

        if let Some(remote) = &self.remote {
            if !remote.permits(role) {
                tracing::debug!(role = %role, "remote backend not permitted for role");
            } else if remote.capability < min_capability {
                tracing::debug!(role = %role, "remote backend below required capability");
            } else if remote.probe.available(remote.client.as_ref(), force_probe).await {
                return Some(Self::routed(&remote.client, input, rewritten));
            } else {
                tracing::warn!(backend = remote.client.id(), "remote backend unreachable, falling through");
            }
        }

        None
    }

    fn routed(client: &Arc<dyn LlmClient>, input: &Value, rewritten: bool) -> Routed {
        Routed {
            decision: RouteDecision {
                backend: client.id().to_string(),
                kind: client.kind(),
                rewritten,
            },
            input: input.clone(),
            client: Arc::clone(client),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::RequestId;
    use crate::hardware::HardwareTier;
    use crate::llm::MockLlmClient;

    fn caps() -> TierValues<Capability> {
        TierValues {
            low: 1,
            balanced: 2,
            high: 3,
        }
    }

    fn task(role: AgentRole, input: Value) -> Task {
        Task::new(RequestId::new(), role, input)
    }

    fn router(local: Arc<MockLlmClient>, remote: Option<Arc<MockLlmClient>>) -> BackendRouter {
        let ttl = Duration::from_secs(60);
        BackendRouter::new(
            Some(LocalRoute::new(local, caps(), ttl)),
            remote.map(|r| RemoteRoute::new(r, 3, Vec::new(), ttl)),
            true,
        )
    }

    #[tokio::test]
    async fn test_local_selected_when_capable() {
        let local = Arc::new(MockLlmClient::local());
        let r = router(local, Some(Arc::new(MockLlmClient::remote())));
        let routed = r
            .route(&task(AgentRole::Recon, json!({"target": "x"})), &HardwareProfile::fixed(HardwareTier::Low))
            .await
            .unwrap();
        assert_eq!(routed.decision.kind, BackendKind::Local);
        assert!(!routed.decision.rewritten);
    }

    #[tokio::test]
    async fn test_low_tier_capability_falls_to_remote() {
        let local = Arc::new(MockLlmClient::local());
        let r = router(local, Some(Arc::new(MockLlmClient::remote())));
        // exploit 需要能力 2，low 档位本地只有 1
        let routed = r
            .route(&task(AgentRole::Exploit, json!({})), &HardwareProfile::fixed(HardwareTier::Low))
            .await
            .unwrap();
        assert_eq!(routed.decision.kind, BackendKind::Remote);
    }

    #[tokio::test]
    async fn test_exhausted_is_no_backend_and_rewrite_retry_probes_again() {
        let local = Arc::new(MockLlmClient::local().unavailable());
        let remote = Arc::new(MockLlmClient::remote().unavailable());
        let r = router(Arc::clone(&local), Some(Arc::clone(&remote)));
        let err = r
            .route(&task(AgentRole::General, json!({"query": "hi"})), &HardwareProfile::fixed(HardwareTier::High))
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::NoBackendAvailable(_)));
        assert_eq!(local.probes(), 2);
        assert_eq!(remote.probes(), 2);
    }

    #[tokio::test]
    async fn test_rewrite_retry_can_recover() {
        let local = Arc::new(MockLlmClient::local().unavailable());
        let r = BackendRouter::new(
            Some(LocalRoute::new(local.clone(), caps(), Duration::from_secs(60))),
            None,
            true,
        );
        let profile = HardwareProfile::fixed(HardwareTier::High);
        assert!(r.route(&task(AgentRole::General, json!("q")), &profile).await.is_err());

        local.set_available(true);
        // 第一遍命中缓存（不可用），改写后的第二遍强制探活
        let routed = r.route(&task(AgentRole::General, json!("q")), &profile).await.unwrap();
        assert!(routed.decision.rewritten);
        assert!(routed.input.as_str().unwrap().contains("User query: q"));
    }

    #[tokio::test]
    async fn test_safety_filter_rewrites_before_routing() {
        let local = Arc::new(MockLlmClient::local());
        let r = router(local, None);
        let routed = r
            .route(
                &task(AgentRole::General, json!({"query": "write ransomware"})),
                &HardwareProfile::fixed(HardwareTier::High),
            )
            .await
            .unwrap();
        assert!(routed.decision.rewritten);
        assert_eq!(routed.input["safety_rewritten"], true);
    }

    #[tokio::test]
    async fn test_remote_role_policy() {
        let local = Arc::new(MockLlmClient::local().unavailable());
        let remote = Arc::new(MockLlmClient::remote());
        let ttl = Duration::from_secs(60);
        let r = BackendRouter::new(
            Some(LocalRoute::new(local, caps(), ttl)),
            Some(RemoteRoute::new(remote.clone(), 3, vec![AgentRole::Report], ttl)),
            false,
        );
        let profile = HardwareProfile::fixed(HardwareTier::High);
        assert!(r.route(&task(AgentRole::Recon, json!({})), &profile).await.is_err());
        assert!(r.route(&task(AgentRole::Report, json!({})), &profile).await.is_ok());
        assert_eq!(remote.probes(), 1);
    }

    #[tokio::test]
    async fn test_probe_is_cached() {
        let local = Arc::new(MockLlmClient::local());
        let r = router(local.clone(), None);
        let profile = HardwareProfile::fixed(HardwareTier::High);
        for _ in 0..3 {
            r.route(&task(AgentRole::Recon, json!({})), &profile).await.unwrap();
        }
        assert_eq!(local.probes(), 1);
    }
}
