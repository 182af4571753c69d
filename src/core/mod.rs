//! 核心编排层：任务模型、错误与恢复、准入调度、协调器、主控循环、会话监管与关闭

pub mod builder;
pub mod coordinator;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod shutdown;
pub mod state;
pub mod task;
pub mod task_scheduler;

pub use builder::{create_orchestrator_builder, OrchestratorBuilder};
pub use coordinator::{AgentCoordinator, CoordinatorSettings};
pub use error::{ErrorKind, OrchestratorError};
pub use orchestrator::{
    format_outcome, spawn_shell, Command, InfoView, Orchestrator, OutcomeStatus, RequestOutcome,
    StatusReport, HELP_TEXT,
};
pub use recovery::{RecoveryAction, RetryPolicy};
pub use session_supervisor::SessionSupervisor;
pub use shutdown::{run_with_graceful_shutdown, ShutdownCoordinator, ShutdownManager, ShutdownReason};
pub use state::{OutputKind, OutputLine, ShellPhase, ShellState, ShellView};
pub use task::{
    AgentRole, Capability, OperationalMode, Request, RequestId, RequestInput, Task, TaskId, TaskStatus,
};
pub use task_scheduler::{AdmissionGate, AdmissionKey, AdmissionPermit, GateStats};
