//! 可观测性：tracing 订阅器初始化与应用内日志环形缓冲
//!
//! 过滤：RUST_LOG 优先，否则取 logging.log_level。
//! 输出层：控制台（TUI 模式下关闭）、可选日志文件（追加，无 ANSI）、环形缓冲（shell `logs` 命令）。

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSection;

/// 环形缓冲保留的日志行数
pub const LOG_RING_CAPACITY: usize = 200;

/// 最近 N 行日志（可作为 fmt 层的 writer）
#[derive(Clone)]
pub struct LogRing {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    /// 从旧到新
    pub fn lines(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(LOG_RING_CAPACITY)
    }
}

impl std::io::Write for LogRing {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            self.push(line.trim_end());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// 安装全局订阅器；`console = false` 用于 TUI（避免破坏备用屏幕）
pub fn init(cfg: &LoggingSection, console: bool) -> anyhow::Result<LogRing> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let ring = LogRing::default();
    let ring_writer = ring.clone();
    let ring_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(move || ring_writer.clone());

    let console_layer = if console {
        Some(fmt::layer().with_writer(std::io::stderr))
    } else {
        None
    };

    let file_layer = match &cfg.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .with(ring_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(ring)
}
