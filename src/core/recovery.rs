//! 错误恢复策略
//!
//! 把一次失败的调用映射为 RecoveryAction：可重试类型（Timeout / AgentError）在上限内按指数退避重试，
//! 其余类型立即成为终态失败。

use std::time::Duration;

use crate::config::CoordinatorSection;
use crate::core::ErrorKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 等待 delay 后重新路由并调用
    Retry { delay: Duration },
    /// 终态失败
    Fail(ErrorKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&CoordinatorSection::default())
    }
}

impl From<&CoordinatorSection> for RetryPolicy {
    fn from(cfg: &CoordinatorSection) -> Self {
        Self {
            max_retries: cfg.max_retries,
            backoff_base: Duration::from_millis(cfg.backoff_base_ms),
            backoff_max: Duration::from_millis(cfg.backoff_max_ms),
        }
    }
}

impl RetryPolicy {
    /// 第 attempt 次重试前的等待：min(base * 2^(attempt-1), max)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }

    /// `retries_so_far` 为已发生的重试次数
    pub fn decide(&self, kind: ErrorKind, retries_so_far: u32) -> RecoveryAction {
        if kind.is_retryable() && retries_so_far < self.max_retries {
            RecoveryAction::Retry {
                delay: self.backoff(retries_so_far + 1),
            }
        } else {
            RecoveryAction::Fail(kind)
        }
    }
}
