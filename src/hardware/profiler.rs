//! HardwareProfiler：采样 → 分档 → 通过 watch 通道广播
//!
//! 进程内唯一的后台刷新任务按固定间隔调用 `sample()`；路由器与协调器从 `current()` /
//! `subscribe()` 取值，而不是读全局可变状态。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::hardware::{HardwareProfile, ResourceProbe, TierThresholds};

pub struct HardwareProfiler {
    probe: Mutex<Box<dyn ResourceProbe>>,
    thresholds: TierThresholds,
    tx: watch::Sender<HardwareProfile>,
}

impl HardwareProfiler {
    /// 创建时立即采样一次，保证 `current()` 总有值
    pub fn new(mut probe: Box<dyn ResourceProbe>, thresholds: TierThresholds) -> Self {
        let initial = thresholds.classify(&probe.sample());
        tracing::info!(
            tier = %initial.tier,
            available_gb = initial.available_memory_gb,
            "hardware profile initialised"
        );
        let (tx, _rx) = watch::channel(initial);
        Self {
            probe: Mutex::new(probe),
            thresholds,
            tx,
        }
    }

    pub fn thresholds(&self) -> &TierThresholds {
        &self.thresholds
    }

    /// 按需采样并广播；档位变化时记日志
    pub fn sample(&self) -> HardwareProfile {
        let raw = match self.probe.lock() {
            Ok(mut probe) => probe.sample(),
            Err(_) => {
                tracing::warn!("hardware probe lock poisoned, keeping previous profile");
                return self.current();
            }
        };
        let profile = self.thresholds.classify(&raw);
        let previous = self.tx.send_replace(profile.clone());
        if previous.tier != profile.tier {
            tracing::info!(
                from = %previous.tier,
                to = %profile.tier,
                thermal = profile.thermal_downgrade,
                "hardware tier changed"
            );
        }
        profile
    }

    pub fn current(&self) -> HardwareProfile {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<HardwareProfile> {
        self.tx.subscribe()
    }

    /// 后台刷新任务；cancel 时退出
    pub fn spawn_refresher(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // 第一次 tick 立即完成，new() 已采过样
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("hardware refresher stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.sample();
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{HardwareTier, ResourceSample, StaticProbe};

    #[test]
    fn test_sample_broadcasts_tier_change() {
        let probe = StaticProbe::new(ResourceSample::with_memory_gb(32.0, 64.0));
        let profiler = HardwareProfiler::new(Box::new(probe.clone()), TierThresholds::default());
        let mut rx = profiler.subscribe();
        assert_eq!(profiler.current().tier, HardwareTier::High);

        probe.set(ResourceSample::with_memory_gb(32.0, 64.0).with_temperature(95.0));
        profiler.sample();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().tier, HardwareTier::Balanced);
    }

    #[tokio::test]
    async fn test_refresher_picks_up_changes_and_stops() {
        let probe = StaticProbe::new(ResourceSample::with_memory_gb(2.0, 8.0));
        let profiler = Arc::new(HardwareProfiler::new(
            Box::new(probe.clone()),
            TierThresholds::default(),
        ));
        let mut rx = profiler.subscribe();
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&profiler).spawn_refresher(Duration::from_millis(10), cancel.clone());

        probe.set(ResourceSample::with_memory_gb(20.0, 32.0));
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|p| p.tier == HardwareTier::High))
            .await
            .unwrap()
            .unwrap();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }
}
