//! 优雅关闭
//!
//! Ctrl+C / SIGTERM / quit 触发同一个关闭 token：
//! - 进行中的请求以 Cancelled 结束（请求 token 都是它的子 token）
//! - 硬件刷新与并发跟随任务退出
//! - 结果存储 flush

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::core::orchestrator::Orchestrator;
use crate::memory::MemoryStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C 或 quit 命令
    UserInitiated,
    /// SIGTERM
    Signal,
    FatalError(String),
}

/// 关闭信号
#[derive(Clone)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self {
            token: CancellationToken::new(),
            reason_tx,
        }
    }

    /// 关闭 token；交给 OrchestratorBuilder::with_root_token 作为请求根
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.token.is_cancelled() {
            return;
        }
        tracing::info!(reason = ?reason, "shutdown requested");
        let _ = self.reason_tx.send(reason);
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// Ctrl+C 与 SIGTERM 都触发 shutdown
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!(signal = "ctrl_c", "signal received");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!(signal = "sigterm", "signal received");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭时执行的清理任务
#[async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    fn name(&self) -> &'static str;
}

/// 按注册顺序执行清理，每项有超时
pub struct ShutdownCoordinator {
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            cleanup_tasks: Vec::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    /// 编排器的标准清理：先取消请求，再 flush 存储
    pub fn for_orchestrator(orchestrator: &Arc<Orchestrator>) -> Self {
        let mut coordinator = Self::new();
        coordinator.register(CancelRequests::new(Arc::clone(orchestrator)));
        coordinator.register(StoreFlush::new(Arc::clone(orchestrator.store())));
        coordinator
    }

    pub async fn run_cleanup(&self) {
        tracing::info!(tasks = self.cleanup_tasks.len(), "running shutdown cleanup");
        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(self.timeout, task.cleanup()).await {
                Ok(Ok(())) => tracing::debug!(cleanup = name, "cleanup done"),
                Ok(Err(e)) => tracing::warn!(cleanup = name, error = %e, "cleanup failed"),
                Err(_) => tracing::warn!(cleanup = name, timeout = ?self.timeout, "cleanup timed out"),
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// 取消全部进行中的请求，并停止后台刷新
pub struct CancelRequests {
    orchestrator: Arc<Orchestrator>,
}

impl CancelRequests {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl ShutdownCleanup for CancelRequests {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let n = self.orchestrator.cancel_all();
        self.orchestrator.root_token().cancel();
        tracing::debug!(cancelled = n, "in-flight requests cancelled");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "CancelRequests"
    }
}

/// 结果存储 flush
pub struct StoreFlush {
    store: Arc<dyn MemoryStore>,
}

impl StoreFlush {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ShutdownCleanup for StoreFlush {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.store.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "StoreFlush"
    }
}

/// 运行主应用直到其结束或收到关闭信号，然后执行清理
pub async fn run_with_graceful_shutdown<F>(
    manager: Arc<ShutdownManager>,
    app: F,
    cleanup: ShutdownCoordinator,
) where
    F: Future<Output = ()>,
{
    manager.install_signal_handlers();

    tokio::select! {
        _ = app => {
            tracing::info!("application exited");
        }
        _ = manager.wait_for_shutdown() => {
            tracing::info!("shutting down");
        }
    }

    cleanup.run_cleanup().await;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::memory::InMemoryStore;

    #[test]
    fn test_shutdown_cancels_token_once() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        let mut rx = manager.subscribe();
        manager.shutdown(ShutdownReason::UserInitiated);
        manager.shutdown(ShutdownReason::Signal);
        assert!(token.is_cancelled());
        assert_eq!(rx.try_recv().unwrap(), ShutdownReason::UserInitiated);
        assert!(rx.try_recv().is_err());
    }

    struct Flag(Arc<AtomicBool>);

    #[async_trait]
    impl ShutdownCleanup for Flag {
        async fn cleanup(&self) -> anyhow::Result<()> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Flag"
        }
    }

    struct Hang;

    #[async_trait]
    impl ShutdownCleanup for Hang {
        async fn cleanup(&self) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Hang"
        }
    }

    #[tokio::test]
    async fn test_cleanup_continues_after_timeout() {
        let called = Arc::new(AtomicBool::new(false));
        let mut coordinator = ShutdownCoordinator::new().with_timeout(Duration::from_millis(20));
        coordinator.register(Hang);
        coordinator.register(StoreFlush::new(Arc::new(InMemoryStore::new())));
        coordinator.register(Flag(called.clone()));
        coordinator.run_cleanup().await;
        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_until_app_finishes() {
        let manager = Arc::new(ShutdownManager::new());
        let called = Arc::new(AtomicBool::new(false));
        let mut cleanup = ShutdownCoordinator::new();
        cleanup.register(Flag(called.clone()));
        run_with_graceful_shutdown(manager, async {}, cleanup).await;
        assert!(called.load(Ordering::SeqCst));
    }
}
