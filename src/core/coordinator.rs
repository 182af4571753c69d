//! Agent 协调器：注册表 + 分派
//!
//! 单个任务的分派：查找 Agent → 路由 → 等待准入许可 → 带超时调用 → 失败按策略退避重试 → 写入存储。
//! 批量分派时依赖通过 watch 通道传递上游终态；依赖未全部 succeeded 的任务不会进入等待集，
//! 任一依赖失败则立即以 DependencyFailed 结束，不调用 Agent。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agents::{AcpMessage, AcpStatus, Agent, AgentRegistry};
use crate::config::{AppConfig, TierValues};
use crate::core::recovery::{RecoveryAction, RetryPolicy};
use crate::core::task_scheduler::{AdmissionGate, AdmissionKey, GateStats};
use crate::core::{AgentRole, ErrorKind, Task, TaskId, TaskStatus};
use crate::hardware::{HardwareProfile, HardwareTier};
use crate::memory::{build_context, AgentResult, MemoryError, MemoryStore};
use crate::routing::{BackendRouter, RouteDecision};

/// 协调器参数
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub policy: RetryPolicy,
    /// 单次 Agent 调用超时
    pub agent_timeout: Duration,
    pub concurrency: TierValues<usize>,
    pub context_window: usize,
}

impl CoordinatorSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            policy: RetryPolicy::from(&cfg.coordinator),
            agent_timeout: Duration::from_secs(cfg.app.tool_timeout.max(1)),
            concurrency: cfg.coordinator.concurrency.clone(),
            context_window: cfg.storage.context_window,
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// 一次失败的终态描述
struct Failure {
    kind: ErrorKind,
    message: String,
}

impl Failure {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// 分派过程中累积的审计信息
#[derive(Default)]
struct Attempts {
    route: Option<RouteDecision>,
    /// 最近一次路由后的输入
    input: Option<Value>,
    count: u32,
}

pub struct AgentCoordinator {
    registry: Arc<AgentRegistry>,
    router: Arc<BackendRouter>,
    store: Arc<dyn MemoryStore>,
    profile: watch::Receiver<HardwareProfile>,
    gate: AdmissionGate,
    settings: CoordinatorSettings,
}

impl AgentCoordinator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        router: Arc<BackendRouter>,
        store: Arc<dyn MemoryStore>,
        profile: watch::Receiver<HardwareProfile>,
        settings: CoordinatorSettings,
    ) -> Self {
        let tier = profile.borrow().tier;
        let gate = AdmissionGate::new(*settings.concurrency.get(tier));
        Self {
            registry,
            router,
            store,
            profile,
            gate,
            settings,
        }
    }

    pub fn register(&self, role: AgentRole, agent: Arc<dyn Agent>) {
        self.registry.register(role, agent);
    }

    pub fn lookup(&self, role: &AgentRole) -> Option<Arc<dyn Agent>> {
        self.registry.lookup(role)
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn concurrency(&self, tier: HardwareTier) -> usize {
        *self.settings.concurrency.get(tier)
    }

    pub fn current_profile(&self) -> HardwareProfile {
        self.profile.borrow().clone()
    }

    pub fn gate_stats(&self) -> GateStats {
        self.gate.stats()
    }

    /// 按档位重算并发上限；已运行的任务不受影响
    pub fn apply_profile(&self, profile: &HardwareProfile) {
        self.gate.set_limit(self.concurrency(profile.tier));
    }

    /// 跟随 HardwareProfiler 的档位变化调整上限
    pub fn spawn_profile_watcher(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut rx = self.profile.clone();
        tokio::spawn(async move {
            let initial = rx.borrow_and_update().clone();
            this.apply_profile(&initial);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let profile = rx.borrow_and_update().clone();
                        this.apply_profile(&profile);
                    }
                }
            }
        })
    }

    /// 分派同一请求的任务列表，结果按输入顺序返回
    ///
    /// 依赖只能指向列表中更早的任务或存储中已有终态的任务，否则视为 DependencyFailed。
    pub async fn dispatch_batch(self: &Arc<Self>, tasks: Vec<Task>, cancel: CancellationToken) -> Vec<AgentResult> {
        let mut outcome_rx: HashMap<TaskId, watch::Receiver<Option<TaskStatus>>> = HashMap::new();
        let mut handles = Vec::with_capacity(tasks.len());

        for task in tasks {
            let (tx, rx) = watch::channel(None);
            let deps = self.resolve_dependencies(&task, &outcome_rx);
            outcome_rx.insert(task.id.clone(), rx);

            let fallback = task.clone();
            let this = Arc::clone(self);
            let cancel = cancel.clone();
            let handle = tokio::spawn(async move {
                let result = this.dispatch_after(task, deps, &cancel).await;
                tx.send_replace(Some(result.status));
                result
            });
            handles.push((fallback, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (mut task, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!(task_id = %task.id, error = %e, "dispatch task aborted");
                    let failure = AgentResult::failure(&task, ErrorKind::AgentError, e.to_string());
                    results.push(self.finalize(&mut task, failure));
                }
            }
        }
        results
    }

    fn resolve_dependencies(
        &self,
        task: &Task,
        earlier: &HashMap<TaskId, watch::Receiver<Option<TaskStatus>>>,
    ) -> Vec<(TaskId, watch::Receiver<Option<TaskStatus>>)> {
        task.depends_on
            .iter()
            .map(|dep| {
                if let Some(rx) = earlier.get(dep) {
                    return (dep.clone(), rx.clone());
                }
                // 跨请求依赖：取存储中的终态，找不到视为失败
                let status = match self.store.get(dep) {
                    Ok(r) if r.is_terminal() => r.status,
                    _ => TaskStatus::Failed,
                };
                let (_tx, rx) = watch::channel(Some(status));
                (dep.clone(), rx)
            })
            .collect()
    }

    async fn dispatch_after(
        &self,
        mut task: Task,
        deps: Vec<(TaskId, watch::Receiver<Option<TaskStatus>>)>,
        cancel: &CancellationToken,
    ) -> AgentResult {
        for (dep, mut rx) in deps {
            let status = tokio::select! {
                _ = cancel.cancelled() => None,
                r = rx.wait_for(Option::is_some) => Some(r.map(|s| *s).ok().flatten()),
            };
            match status {
                None => {
                    let failure = AgentResult::failure(&task, ErrorKind::Cancelled, "request cancelled");
                    return self.finalize(&mut task, failure);
                }
                Some(Some(TaskStatus::Succeeded)) => {}
                Some(other) => {
                    tracing::info!(
                        task_id = %task.id,
                        dependency = %dep,
                        dependency_status = ?other,
                        "dependency did not succeed, skipping dispatch"
                    );
                    let failure = AgentResult::failure(
                        &task,
                        ErrorKind::DependencyFailed,
                        format!("dependency {dep} failed"),
                    );
                    return self.finalize(&mut task, failure);
                }
            }
        }
        self.dispatch(task, cancel).await
    }

    /// 分派单个（依赖已满足的）任务；终态结果在返回前写入存储
    pub async fn dispatch(&self, mut task: Task, cancel: &CancellationToken) -> AgentResult {
        let mut attempts = Attempts::default();
        let mut result = match self.run(&mut task, &mut attempts, cancel).await {
            Ok(data) => AgentResult::success(&task, data),
            Err(f) => AgentResult::failure(&task, f.kind, f.message),
        }
        .with_route(attempts.route)
        .with_attempts(attempts.count);
        if let Some(input) = attempts.input {
            result = result.with_input(input);
        }
        self.finalize(&mut task, result)
    }

    async fn run(
        &self,
        task: &mut Task,
        attempts: &mut Attempts,
        cancel: &CancellationToken,
    ) -> Result<Value, Failure> {
        let Some(agent) = self.registry.lookup(&task.role) else {
            return Err(Failure::new(
                ErrorKind::UnknownRole,
                format!("no agent registered for role {}", task.role),
            ));
        };

        loop {
            if cancel.is_cancelled() {
                return Err(Failure::new(ErrorKind::Cancelled, "request cancelled"));
            }

            let profile = self.current_profile();
            self.apply_profile(&profile);

            let routed = tokio::select! {
                _ = cancel.cancelled() => return Err(Failure::new(ErrorKind::Cancelled, "request cancelled")),
                r = self.router.route(task, &profile) => r,
            };
            let routed = routed.map_err(|e| Failure::new(ErrorKind::NoBackendAvailable, e.to_string()))?;
            attempts.route = Some(routed.decision.clone());
            attempts.input = Some(routed.input.clone());
            self.advance(task, TaskStatus::Routed)?;

            let permit = tokio::select! {
                _ = cancel.cancelled() => return Err(Failure::new(ErrorKind::Cancelled, "request cancelled")),
                p = self.gate.acquire(AdmissionKey::for_task(task)) => p,
            };
            self.advance(task, TaskStatus::Running)?;
            attempts.count += 1;
            self.record_progress(task, attempts);

            let context = build_context(self.store.as_ref(), self.settings.context_window)
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "failed to build context window");
                    Value::Array(Vec::new())
                });
            let message = AcpMessage::for_task(task, routed.input.clone(), context);
            let started = Instant::now();

            let invoked = tokio::select! {
                _ = cancel.cancelled() => return Err(Failure::new(ErrorKind::Cancelled, "request cancelled")),
                r = tokio::time::timeout(
                    self.settings.agent_timeout,
                    agent.execute(message.clone(), Arc::clone(&routed.client)),
                ) => r,
            };
            drop(permit);

            let failure = match invoked {
                Err(_) => Failure::new(
                    ErrorKind::Timeout,
                    format!("agent timed out after {:?}", self.settings.agent_timeout),
                ),
                Ok(Err(e)) => Failure::new(ErrorKind::AgentError, e),
                Ok(Ok(resp)) => match resp.validate_against(&message) {
                    Err(reason) => Failure::new(ErrorKind::SchemaInvalid, reason),
                    Ok(()) if resp.status == AcpStatus::Failure => Failure::new(
                        // Agent 声明输入无效时不重试
                        if resp.error_kind.as_deref() == Some(ErrorKind::SchemaInvalid.as_str()) {
                            ErrorKind::SchemaInvalid
                        } else {
                            ErrorKind::AgentError
                        },
                        resp.message.unwrap_or_else(|| "agent reported failure".to_string()),
                    ),
                    Ok(()) => {
                        self.audit(task, &routed.decision, attempts.count, "success", started);
                        return Ok(resp.data.unwrap_or(Value::Null));
                    }
                },
            };
            self.audit(task, &routed.decision, attempts.count, failure.kind.as_str(), started);

            match self.settings.policy.decide(failure.kind, task.retries) {
                RecoveryAction::Fail(_) => return Err(failure),
                RecoveryAction::Retry { delay } => {
                    if task.reset_for_retry(self.settings.policy.max_retries).is_err() {
                        return Err(failure);
                    }
                    tracing::debug!(
                        task_id = %task.id,
                        retry = task.retries,
                        delay_ms = delay.as_millis() as u64,
                        reason = %failure.message,
                        "retrying task"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Failure::new(ErrorKind::Cancelled, "request cancelled")),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn advance(&self, task: &mut Task, next: TaskStatus) -> Result<(), Failure> {
        task.transition(next)
            .map_err(|e| Failure::new(ErrorKind::AgentError, e.to_string()))
    }

    /// 非终态快照，之后由终态结果覆盖
    fn record_progress(&self, task: &Task, attempts: &Attempts) {
        let mut snapshot = AgentResult::in_progress(task)
            .with_route(attempts.route.clone())
            .with_attempts(attempts.count);
        if let Some(input) = &attempts.input {
            snapshot = snapshot.with_input(input.clone());
        }
        if let Err(e) = self.store.put(snapshot) {
            tracing::warn!(task_id = %task.id, error = %e, "failed to record task progress");
        }
    }

    fn audit(&self, task: &Task, route: &RouteDecision, attempt: u32, outcome: &str, started: Instant) {
        tracing::info!(
            event = "task_audit",
            task_id = %task.id,
            role = %task.role,
            backend = %route.backend,
            rewritten = route.rewritten,
            attempt,
            outcome,
            duration_ms = started.elapsed().as_millis() as u64,
            "task attempt"
        );
    }

    /// 推进到终态并写入存储；存储中已有终态时以存储为准
    fn finalize(&self, task: &mut Task, result: AgentResult) -> AgentResult {
        if !task.is_terminal() {
            if let Err(e) = task.transition(result.status) {
                tracing::warn!(task_id = %task.id, error = %e, "unexpected terminal transition");
            }
        }
        match self.store.put(result.clone()) {
            Ok(()) => result,
            Err(MemoryError::ImmutableResult(id)) => {
                tracing::warn!(task_id = %id, "result already terminal, keeping stored value");
                self.store.get(&task.id).unwrap_or(result)
            }
            Err(e) => {
                tracing::error!(task_id = %task.id, error = %e, "failed to persist result");
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::agents::{AcpResponse, AgentDescriptor};
    use crate::core::RequestId;
    use crate::llm::{LlmClient, MockLlmClient};
    use crate::memory::InMemoryStore;
    use crate::routing::LocalRoute;

    /// 可脚本化的测试 Agent
    struct ScriptedAgent {
        role: AgentRole,
        calls: AtomicUsize,
        fail_first: usize,
        delay: Duration,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl ScriptedAgent {
        fn new(role: AgentRole) -> Self {
            Self {
                role,
                calls: AtomicUsize::new(0),
                fail_first: 0,
                delay: Duration::ZERO,
                running: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        fn describe(&self) -> AgentDescriptor {
            AgentDescriptor::new(self.role.clone(), "scripted")
        }

        async fn execute(&self, message: AcpMessage, _backend: Arc<dyn LlmClient>) -> Result<AcpResponse, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(format!("scripted failure {n}"));
            }
            Ok(AcpResponse::success(&message, json!({"call": n})))
        }
    }

    fn settings() -> CoordinatorSettings {
        CoordinatorSettings {
            policy: RetryPolicy {
                max_retries: 2,
                backoff_base: Duration::from_millis(1),
                backoff_max: Duration::from_millis(5),
            },
            agent_timeout: Duration::from_millis(200),
            concurrency: TierValues {
                low: 1,
                balanced: 2,
                high: 4,
            },
            context_window: 5,
        }
    }

    fn coordinator(tier: HardwareTier) -> (Arc<AgentCoordinator>, watch::Sender<HardwareProfile>) {
        let local: Arc<dyn LlmClient> = Arc::new(MockLlmClient::local());
        let router = BackendRouter::new(
            Some(LocalRoute::new(
                local,
                TierValues {
                    low: 3,
                    balanced: 3,
                    high: 3,
                },
                Duration::from_secs(60),
            )),
            None,
            true,
        );
        let (tx, rx) = watch::channel(HardwareProfile::fixed(tier));
        let coord = AgentCoordinator::new(
            Arc::new(AgentRegistry::new()),
            Arc::new(router),
            Arc::new(InMemoryStore::new()),
            rx,
            settings(),
        );
        (Arc::new(coord), tx)
    }

    fn task(role: AgentRole) -> Task {
        Task::new(RequestId::new(), role, json!({"target": "x"}))
    }

    #[tokio::test]
    async fn test_unknown_role_not_retried() {
        let (coord, _tx) = coordinator(HardwareTier::High);
        let r = coord.dispatch(task(AgentRole::Exploit), &CancellationToken::new()).await;
        assert_eq!(r.error_kind(), Some(ErrorKind::UnknownRole));
        assert_eq!(r.attempts, 0);
        assert!(coord.store().get(&r.task_id).unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_agent_error_retried_then_succeeds() {
        let (coord, _tx) = coordinator(HardwareTier::High);
        let mut agent = ScriptedAgent::new(AgentRole::Recon);
        agent.fail_first = 2;
        coord.register(AgentRole::Recon, Arc::new(agent));
        let r = coord.dispatch(task(AgentRole::Recon), &CancellationToken::new()).await;
        assert!(r.succeeded());
        assert_eq!(r.attempts, 3);
        assert_eq!(r.route.as_ref().unwrap().backend, "mock-local");
    }

    #[tokio::test]
    async fn test_timeout_exhausts_retries() {
        let (coord, _tx) = coordinator(HardwareTier::Low);
        let mut agent = ScriptedAgent::new(AgentRole::Recon);
        agent.delay = Duration::from_secs(5);
        coord.register(AgentRole::Recon, Arc::new(agent));
        let r = coord.dispatch(task(AgentRole::Recon), &CancellationToken::new()).await;
        assert_eq!(r.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(r.attempts, 3);
    }

    #[tokio::test]
    async fn test_echo_mismatch_is_schema_invalid() {
        struct Liar;
        #[async_trait]
        impl Agent for Liar {
            fn describe(&self) -> AgentDescriptor {
                AgentDescriptor::new(AgentRole::General, "liar")
            }
            async fn execute(&self, message: AcpMessage, _b: Arc<dyn LlmClient>) -> Result<AcpResponse, String> {
                let mut resp = AcpResponse::success(&message, json!({}));
                resp.agent_role = AgentRole::Report;
                Ok(resp)
            }
        }
        let (coord, _tx) = coordinator(HardwareTier::High);
        coord.register(AgentRole::General, Arc::new(Liar));
        let r = coord.dispatch(task(AgentRole::General), &CancellationToken::new()).await;
        assert_eq!(r.error_kind(), Some(ErrorKind::SchemaInvalid));
        assert_eq!(r.attempts, 1);
    }

    #[tokio::test]
    async fn test_invalid_input_failure_not_retried() {
        let (coord, _tx) = coordinator(HardwareTier::High);
        coord.register(AgentRole::Recon, Arc::new(crate::agents::ReconAgent::new(true)));
        let untargeted = Task::new(RequestId::new(), AgentRole::Recon, json!({}));
        let r = coord.dispatch(untargeted, &CancellationToken::new()).await;
        assert_eq!(r.error_kind(), Some(ErrorKind::SchemaInvalid));
        assert_eq!(r.attempts, 1);
    }

    #[tokio::test]
    async fn test_batch_respects_concurrency_limit() {
        let (coord, _tx) = coordinator(HardwareTier::Balanced);
        let mut agent = ScriptedAgent::new(AgentRole::General);
        agent.delay = Duration::from_millis(30);
        let peak = Arc::clone(&agent.peak);
        coord.register(AgentRole::General, Arc::new(agent));
        let tasks: Vec<Task> = (0..6).map(|_| task(AgentRole::General)).collect();
        let results = coord.dispatch_batch(tasks, CancellationToken::new()).await;
        assert!(results.iter().all(AgentResult::succeeded));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(coord.gate_stats().peak <= 2);
    }

    #[tokio::test]
    async fn test_dependency_failure_skips_dispatch() {
        let (coord, _tx) = coordinator(HardwareTier::High);
        let report = Arc::new(ScriptedAgent::new(AgentRole::Report));
        coord.register(AgentRole::Report, report.clone());
        // recon 未注册 → UnknownRole
        let first = task(AgentRole::Recon);
        let second = task(AgentRole::Report).with_dependency(first.id.clone());
        let results = coord.dispatch_batch(vec![first, second], CancellationToken::new()).await;
        assert_eq!(results[0].error_kind(), Some(ErrorKind::UnknownRole));
        assert_eq!(results[1].error_kind(), Some(ErrorKind::DependencyFailed));
        assert_eq!(report.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_marks_pending_tasks_cancelled() {
        let (coord, _tx) = coordinator(HardwareTier::Low);
        let mut agent = ScriptedAgent::new(AgentRole::General);
        agent.delay = Duration::from_millis(100);
        coord.register(AgentRole::General, Arc::new(agent));
        let cancel = CancellationToken::new();
        let tasks: Vec<Task> = (0..3).map(|_| task(AgentRole::General)).collect();
        let c = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            c.cancel();
        });
        let results = coord.dispatch_batch(tasks, cancel).await;
        assert!(results.iter().all(|r| r.error_kind() == Some(ErrorKind::Cancelled)));
    }

    #[tokio::test]
    async fn test_profile_watcher_updates_limit() {
        let (coord, tx) = coordinator(HardwareTier::High);
        let cancel = CancellationToken::new();
        let handle = coord.spawn_profile_watcher(cancel.clone());
        assert_eq!(coord.gate_stats().limit, 4);
        tx.send_replace(HardwareProfile::fixed(HardwareTier::Low));
        for _ in 0..50 {
            if coord.gate_stats().limit == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(coord.gate_stats().limit, 1);
        cancel.cancel();
        handle.await.unwrap();
    }
}
