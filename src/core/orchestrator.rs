//! 编排器：主控循环
//!
//! 请求 → 分解 → 协调器批量分派 → 汇总。汇总在请求的全部任务进入终态后才返回，
//! 结果按分解顺序给出，不会把部分成功压成单一的成功 / 失败。
//!
//! Shell 运行时另起后台任务消费 UI 命令（Submit/Show/Cancel/Clear/Quit），并通过 watch 通道投影 ShellState。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agents::AgentDescriptor;
use crate::config::{render_config, AppConfig};
use crate::core::coordinator::AgentCoordinator;
use crate::core::session_supervisor::SessionSupervisor;
use crate::core::state::{OutputKind, ShellPhase, ShellState, ShellView};
use crate::core::task_scheduler::GateStats;
use crate::core::{ErrorKind, OperationalMode, OrchestratorError, Request, RequestId, TaskId};
use crate::hardware::{HardwareProfile, HardwareProfiler, HardwareTier};
use crate::memory::{AgentResult, MemoryError, MemoryStore};
use crate::observability::LogRing;
use crate::planning::{PlanSource, TaskDecomposer};
use crate::routing::BackendRouter;

/// 请求的整体结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    /// 部分任务成功、部分失败
    PartialSuccess,
    Failed,
    /// 没有任务成功，且全部以 Cancelled 结束
    Cancelled,
}

impl OutcomeStatus {
    pub fn from_results(results: &[AgentResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.succeeded()).count();
        if results.is_empty() {
            OutcomeStatus::Failed
        } else if succeeded == results.len() {
            OutcomeStatus::Succeeded
        } else if succeeded > 0 {
            OutcomeStatus::PartialSuccess
        } else if results
            .iter()
            .all(|r| r.error_kind() == Some(ErrorKind::Cancelled))
        {
            OutcomeStatus::Cancelled
        } else {
            OutcomeStatus::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Succeeded => "succeeded",
            OutcomeStatus::PartialSuccess => "partial_success",
            OutcomeStatus::Failed => "failed",
            OutcomeStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一个请求的完整汇总：逐任务的终态结果（按分解顺序）
#[derive(Debug, Clone, Serialize)]
pub struct RequestOutcome {
    pub request_id: RequestId,
    pub status: OutcomeStatus,
    pub plan_source: PlanSource,
    /// 分解时的档位
    pub tier: HardwareTier,
    pub results: Vec<AgentResult>,
    pub elapsed_ms: u64,
}

impl RequestOutcome {
    pub fn task_count(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded_count(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.succeeded_count()
    }
}

/// `status` 命令 / API 的状态报告
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub mode: OperationalMode,
    pub profile: HardwareProfile,
    pub gate: GateStats,
    pub active_requests: usize,
    pub stored_results: usize,
    pub store_backend: String,
    pub local_backend: bool,
    pub remote_backend: bool,
    pub agents: usize,
}

pub struct Orchestrator {
    config: AppConfig,
    profiler: Arc<HardwareProfiler>,
    router: Arc<BackendRouter>,
    decomposer: TaskDecomposer,
    coordinator: Arc<AgentCoordinator>,
    supervisor: SessionSupervisor,
}

impl Orchestrator {
    pub(crate) fn new(
        config: AppConfig,
        profiler: Arc<HardwareProfiler>,
        router: Arc<BackendRouter>,
        decomposer: TaskDecomposer,
        coordinator: Arc<AgentCoordinator>,
        supervisor: SessionSupervisor,
    ) -> Self {
        Self {
            config,
            profiler,
            router,
            decomposer,
            coordinator,
            supervisor,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn mode(&self) -> OperationalMode {
        self.config.app.operational_mode
    }

    pub fn profiler(&self) -> &Arc<HardwareProfiler> {
        &self.profiler
    }

    pub fn coordinator(&self) -> &Arc<AgentCoordinator> {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        self.coordinator.store()
    }

    pub fn root_token(&self) -> CancellationToken {
        self.supervisor.root_token()
    }

    /// 以当前配置的运行模式构造文本请求
    pub fn text_request(&self, text: impl Into<String>) -> Request {
        Request::text(text, self.mode())
    }

    /// 启动后台任务：硬件刷新 + 并发上限跟随；根 token 取消时退出
    pub fn start_background(&self) -> Vec<JoinHandle<()>> {
        let interval = Duration::from_secs(self.config.hardware.refresh_interval_secs.max(1));
        let root = self.root_token();
        vec![
            Arc::clone(&self.profiler).spawn_refresher(interval, root.clone()),
            self.coordinator.spawn_profile_watcher(root),
        ]
    }

    /// 处理一个请求直到全部任务进入终态（或被取消）
    pub async fn process(&self, request: Request) -> Result<RequestOutcome, OrchestratorError> {
        if request.input.is_blank() {
            return Err(OrchestratorError::EmptyRequest);
        }
        let cancel = self.supervisor.begin(&request.id)?;
        let outcome = self.run(&request, &cancel).await;
        self.supervisor.finish(&request.id);
        Ok(outcome)
    }

    async fn run(&self, request: &Request, cancel: &CancellationToken) -> RequestOutcome {
        let started = Instant::now();
        let profile = self.profiler.current();
        tracing::info!(
            request_id = %request.id,
            mode = %request.mode,
            tier = %profile.tier,
            input = %request.input.describe(),
            "processing request"
        );

        // 分解期间被取消时改走确定性分解，保证每个任务都有 Cancelled 终态
        let (tasks, plan_source) = tokio::select! {
            planned = self.decomposer.decompose_with_source(request, &profile) => planned,
            _ = cancel.cancelled() => {
                let text = request.input.describe();
                self.decomposer.keyword_decompose(request, &text, profile.tier)
            }
        };

        let results = self
            .coordinator
            .dispatch_batch(tasks, cancel.clone())
            .await;
        let status = OutcomeStatus::from_results(&results);
        let outcome = RequestOutcome {
            request_id: request.id.clone(),
            status,
            plan_source,
            tier: profile.tier,
            results,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            request_id = %request.id,
            status = %outcome.status,
            tasks = outcome.task_count(),
            succeeded = outcome.succeeded_count(),
            elapsed_ms = outcome.elapsed_ms,
            "request finished"
        );
        outcome
    }

    pub fn cancel(&self, request_id: &RequestId) -> bool {
        self.supervisor.cancel(request_id)
    }

    pub fn cancel_all(&self) -> usize {
        self.supervisor.cancel_all()
    }

    pub fn active_requests(&self) -> Vec<RequestId> {
        self.supervisor.active_requests()
    }

    pub fn agents(&self) -> Vec<AgentDescriptor> {
        self.coordinator.registry().descriptors()
    }

    pub fn result(&self, task_id: &TaskId) -> Result<AgentResult, MemoryError> {
        self.store().get(task_id)
    }

    pub fn recent(&self, n: usize) -> Result<Vec<AgentResult>, MemoryError> {
        self.store().recent(n)
    }

    pub fn status(&self) -> StatusReport {
        let store = self.store();
        StatusReport {
            mode: self.mode(),
            profile: self.profiler.current(),
            gate: self.coordinator.gate_stats(),
            active_requests: self.supervisor.active_count(),
            stored_results: store.len().unwrap_or(0),
            store_backend: store.name().to_string(),
            local_backend: self.router.has_local(),
            remote_backend: self.router.has_remote(),
            agents: self.coordinator.registry().len(),
        }
    }
}

/// 从 UI 发往 Shell 运行时的命令
#[derive(Debug, Clone)]
pub enum Command {
    /// 提交请求（后台处理，不阻塞后续命令）
    Submit(Request),
    /// 在输出区展示信息
    Show(InfoView),
    /// 取消全部进行中的请求（Ctrl+C）
    Cancel,
    /// 清空输出区
    Clear,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoView {
    Help,
    Status,
    Config,
    Agents,
    Logs,
}

pub const HELP_TEXT: &str = "\
Commands:
  help              show this help
  status            hardware tier, concurrency and active requests
  config            effective configuration
  agents            registered agents
  logs              recent log lines
  clear             clear the output
  recon <target>    reconnaissance task for a target
  report            report over recent results
  exit | quit | q   leave the shell
Anything else is submitted as a free-text request.
Ctrl+C cancels all in-flight requests.";

/// 汇总的文本形式（Shell 输出区）
pub fn format_outcome(outcome: &RequestOutcome) -> String {
    let mut out = format!(
        "[{}] {} ({} task(s), {} succeeded, {:.1}s, plan: {:?})",
        outcome.request_id,
        outcome.status,
        outcome.task_count(),
        outcome.succeeded_count(),
        outcome.elapsed_ms as f64 / 1000.0,
        outcome.plan_source,
    );
    for r in &outcome.results {
        let backend = r
            .route
            .as_ref()
            .map(|d| d.backend.as_str())
            .unwrap_or("-");
        out.push_str(&format!(
            "\n  {} {} {} via {} (attempts {})",
            r.role, r.task_id, r.status, backend, r.attempts
        ));
        match (r.error_kind(), r.data()) {
            (Some(kind), _) => {
                out.push_str(&format!("\n    {}: {}", kind, r.message().unwrap_or("")));
            }
            (None, Some(data)) => {
                let text = match data {
                    serde_json::Value::String(s) => s.clone(),
                    other => serde_json::to_string_pretty(other).unwrap_or_default(),
                };
                for line in text.lines() {
                    out.push_str("\n    ");
                    out.push_str(line);
                }
            }
            (None, None) => {}
        }
    }
    out
}

fn format_status(report: &StatusReport) -> String {
    let p = &report.profile;
    let temp = p
        .max_temperature_c
        .map(|t| format!("{t:.0}°C"))
        .unwrap_or_else(|| "n/a".to_string());
    format!(
        "mode: {}\ntier: {}{} (memory tier {}, {:.1}/{:.1} GB available, temp {})\n\
         concurrency: {} running / {} waiting / limit {} (peak {})\n\
         active requests: {}\nstore: {} ({} results)\nbackends: local={} remote={}\nagents: {}",
        report.mode,
        p.tier,
        if p.thermal_downgrade { " [thermal downgrade]" } else { "" },
        p.memory_tier,
        p.available_memory_gb,
        p.total_memory_gb,
        temp,
        report.gate.running,
        report.gate.waiting,
        report.gate.limit,
        report.gate.peak,
        report.active_requests,
        report.store_backend,
        report.stored_results,
        report.local_backend,
        report.remote_backend,
        report.agents,
    )
}

fn format_agents(agents: &[AgentDescriptor]) -> String {
    if agents.is_empty() {
        return "no agents registered".to_string();
    }
    agents
        .iter()
        .map(|a| {
            let caps = if a.capabilities.is_empty() {
                String::new()
            } else {
                format!(" [{}]", a.capabilities.join(", "))
            };
            format!("{:<10} {}{}", a.role.as_str(), a.description, caps)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 启动 Shell 运行时：返回命令发送端与状态接收端
pub fn spawn_shell(
    orchestrator: Arc<Orchestrator>,
    logs: LogRing,
) -> (mpsc::UnboundedSender<Command>, watch::Receiver<ShellState>) {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let initial = ShellState::new(orchestrator.mode(), &orchestrator.profiler().current());
    let (state_tx, state_rx) = watch::channel(initial);
    let state_tx = Arc::new(state_tx);
    let inflight = Arc::new(AtomicUsize::new(0));
    let stop = orchestrator.root_token().child_token();

    // 档位 / 闸门投影
    {
        let orchestrator = Arc::clone(&orchestrator);
        let state_tx = Arc::clone(&state_tx);
        let stop = stop.clone();
        let mut profile_rx = orchestrator.profiler().subscribe();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(500));
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    changed = profile_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let profile = profile_rx.borrow_and_update().clone();
                        state_tx.send_modify(|s| s.apply_profile(&profile));
                    }
                    _ = tick.tick() => {
                        let gate = orchestrator.coordinator().gate_stats();
                        state_tx.send_if_modified(|s| {
                            let changed = s.gate != gate;
                            s.gate = gate;
                            changed
                        });
                    }
                }
            }
        });
    }

    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(cmd) = cmd_rx.recv() => {
                    match cmd {
                        Command::Submit(request) => {
                            let active = inflight.fetch_add(1, Ordering::SeqCst) + 1;
                            let echo = request.input.describe();
                            state_tx.send_modify(|s| {
                                if s.phase == ShellPhase::Error {
                                    s.phase = ShellPhase::Idle;
                                    s.error_message = None;
                                }
                                s.push(OutputKind::Input, format!("> {echo}"));
                                s.set_active(active);
                            });

                            let orchestrator = Arc::clone(&orchestrator);
                            let state_tx = Arc::clone(&state_tx);
                            let inflight = Arc::clone(&inflight);
                            tokio::spawn(async move {
                                let result = orchestrator.process(request).await;
                                let active = inflight.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
                                let gate = orchestrator.coordinator().gate_stats();
                                state_tx.send_modify(|s| {
                                    match &result {
                                        Ok(outcome) => {
                                            let kind = match outcome.status {
                                                OutcomeStatus::Succeeded => OutputKind::Result,
                                                OutcomeStatus::PartialSuccess => OutputKind::Result,
                                                _ => OutputKind::Error,
                                            };
                                            s.push(kind, format_outcome(outcome));
                                        }
                                        Err(e) => {
                                            s.push(OutputKind::Error, e.to_string());
                                            s.phase = ShellPhase::Error;
                                            s.error_message = Some(e.to_string());
                                        }
                                    }
                                    s.gate = gate;
                                    s.set_active(active);
                                });
                            });
                        }
                        Command::Show(view) => {
                            let text = match view {
                                InfoView::Help => HELP_TEXT.to_string(),
                                InfoView::Status => format_status(&orchestrator.status()),
                                InfoView::Config => render_config(orchestrator.config()),
                                InfoView::Agents => format_agents(&orchestrator.agents()),
                                InfoView::Logs => String::new(),
                            };
                            let lines = logs.lines();
                            state_tx.send_modify(|s| {
                                if view == InfoView::Logs {
                                    s.logs = lines;
                                    s.view = ShellView::Logs;
                                } else {
                                    s.push(OutputKind::Info, text);
                                }
                            });
                        }
                        Command::Cancel => {
                            let n = orchestrator.cancel_all();
                            state_tx.send_modify(|s| {
                                s.push(OutputKind::Info, format!("cancelled {n} request(s)"));
                            });
                        }
                        Command::Clear => {
                            state_tx.send_modify(|s| s.clear());
                        }
                        Command::Quit => {
                            orchestrator.cancel_all();
                            break;
                        }
                    }
                }
                else => break,
            }
        }
        stop.cancel();
    });

    (cmd_tx, state_rx)
}
