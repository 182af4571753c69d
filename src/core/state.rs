//! 状态定义：ShellState 投影
//!
//! TUI 只持有轻量的 ShellState（阶段、档位、闸门、输出、日志）；编排器在后台更新并经 watch 通道投影过来。

use serde::Serialize;

use crate::core::task_scheduler::GateStats;
use crate::core::OperationalMode;
use crate::hardware::{HardwareProfile, HardwareTier};

/// 输出区最多保留的行数
pub const OUTPUT_CAPACITY: usize = 1000;

/// Shell 阶段（UI 投影用）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum ShellPhase {
    #[default]
    Idle,
    /// 至少一个请求在处理中
    Working,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum OutputKind {
    /// 用户输入回显
    Input,
    Info,
    Result,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutputLine {
    pub kind: OutputKind,
    pub text: String,
}

/// 主区域显示内容
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum ShellView {
    #[default]
    Output,
    Logs,
}

/// UI 看到的「投影」状态
#[derive(Clone, Debug, Serialize)]
pub struct ShellState {
    pub phase: ShellPhase,
    pub mode: OperationalMode,
    pub tier: HardwareTier,
    pub thermal_downgrade: bool,
    pub gate: GateStats,
    pub active_requests: usize,
    pub output: Vec<OutputLine>,
    /// 日志视图的快照（`logs` 命令时刷新）
    pub logs: Vec<String>,
    pub view: ShellView,
    pub error_message: Option<String>,
}

impl Default for ShellState {
    fn default() -> Self {
        Self {
            phase: ShellPhase::Idle,
            mode: OperationalMode::default(),
            tier: HardwareTier::Balanced,
            thermal_downgrade: false,
            gate: GateStats::default(),
            active_requests: 0,
            output: Vec::new(),
            logs: Vec::new(),
            view: ShellView::Output,
            error_message: None,
        }
    }
}

impl ShellState {
    pub fn new(mode: OperationalMode, profile: &HardwareProfile) -> Self {
        let mut state = Self {
            mode,
            ..Self::default()
        };
        state.apply_profile(profile);
        state
    }

    pub fn apply_profile(&mut self, profile: &HardwareProfile) {
        self.tier = profile.tier;
        self.thermal_downgrade = profile.thermal_downgrade;
    }

    /// 追加一段（可多行）文本；超出容量时丢弃最旧的行
    pub fn push(&mut self, kind: OutputKind, text: impl AsRef<str>) {
        for line in text.as_ref().lines() {
            self.output.push(OutputLine {
                kind,
                text: line.to_string(),
            });
        }
        if self.output.len() > OUTPUT_CAPACITY {
            let excess = self.output.len() - OUTPUT_CAPACITY;
            self.output.drain(..excess);
        }
        self.view = ShellView::Output;
    }

    pub fn clear(&mut self) {
        self.output.clear();
        self.error_message = None;
        self.view = ShellView::Output;
        if self.phase == ShellPhase::Error {
            self.phase = ShellPhase::Idle;
        }
    }

    /// 按进行中请求数重算阶段；出错状态保持到下一次 clear 或新请求
    pub fn set_active(&mut self, active: usize) {
        self.active_requests = active;
        if active > 0 {
            self.phase = ShellPhase::Working;
        } else if self.phase == ShellPhase::Working {
            self.phase = ShellPhase::Idle;
        }
    }
}
