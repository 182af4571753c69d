//! 档位与阈值
//!
//! 档位只看**可用**内存：低于 floor 为 low，[floor, ceiling) 为 balanced，≥ ceiling 为 high。
//! 过热或降频信号强制降一档（low 不再降）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::HardwareSection;

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareTier {
    Low,
    Balanced,
    High,
}

impl HardwareTier {
    pub fn downgrade(self) -> Self {
        match self {
            HardwareTier::High => HardwareTier::Balanced,
            HardwareTier::Balanced | HardwareTier::Low => HardwareTier::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HardwareTier::Low => "low",
            HardwareTier::Balanced => "balanced",
            HardwareTier::High => "high",
        }
    }
}

impl std::fmt::Display for HardwareTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次原始采样
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResourceSample {
    pub available_memory_bytes: u64,
    pub total_memory_bytes: u64,
    /// 所有传感器中的最高温度；平台不提供时为 None
    pub max_temperature_c: Option<f32>,
    /// 平台报告的降频 / 节能信号
    pub throttled: bool,
}

impl ResourceSample {
    pub fn with_memory_gb(available: f64, total: f64) -> Self {
        Self {
            available_memory_bytes: (available * GB) as u64,
            total_memory_bytes: (total * GB) as u64,
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, celsius: f32) -> Self {
        self.max_temperature_c = Some(celsius);
        self
    }

    pub fn with_throttle(mut self, throttled: bool) -> Self {
        self.throttled = throttled;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TierThresholds {
    pub memory_floor_gb: f64,
    pub memory_ceiling_gb: f64,
    pub thermal_limit_c: f32,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self::from(&HardwareSection::default())
    }
}

impl From<&HardwareSection> for TierThresholds {
    fn from(cfg: &HardwareSection) -> Self {
        Self {
            memory_floor_gb: cfg.memory_floor_gb,
            memory_ceiling_gb: cfg.memory_ceiling_gb,
            thermal_limit_c: cfg.thermal_limit_c,
        }
    }
}

impl TierThresholds {
    pub fn memory_tier(&self, available_gb: f64) -> HardwareTier {
        if available_gb < self.memory_floor_gb {
            HardwareTier::Low
        } else if available_gb < self.memory_ceiling_gb {
            HardwareTier::Balanced
        } else {
            HardwareTier::High
        }
    }

    pub fn is_thermal_event(&self, sample: &ResourceSample) -> bool {
        sample.throttled
            || sample
                .max_temperature_c
                .is_some_and(|t| t >= self.thermal_limit_c)
    }

    pub fn classify(&self, sample: &ResourceSample) -> HardwareProfile {
        let available_gb = sample.available_memory_bytes as f64 / GB;
        let memory_tier = self.memory_tier(available_gb);
        let thermal = self.is_thermal_event(sample);
        let tier = if thermal {
            memory_tier.downgrade()
        } else {
            memory_tier
        };
        HardwareProfile {
            tier,
            memory_tier,
            available_memory_gb: available_gb,
            total_memory_gb: sample.total_memory_bytes as f64 / GB,
            max_temperature_c: sample.max_temperature_c,
            thermal_downgrade: thermal,
            sampled_at: Utc::now(),
        }
    }
}

/// 进程级硬件状态快照，不持久化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareProfile {
    /// 生效档位（已考虑热降级）
    pub tier: HardwareTier,
    /// 仅按内存得出的档位
    pub memory_tier: HardwareTier,
    pub available_memory_gb: f64,
    pub total_memory_gb: f64,
    pub max_temperature_c: Option<f32>,
    pub thermal_downgrade: bool,
    pub sampled_at: DateTime<Utc>,
}

impl HardwareProfile {
    /// 固定档位的快照（测试与 StaticProbe 以外的注入场景）
    pub fn fixed(tier: HardwareTier) -> Self {
        Self {
            tier,
            memory_tier: tier,
            available_memory_gb: 0.0,
            total_memory_gb: 0.0,
            max_temperature_c: None,
            thermal_downgrade: false,
            sampled_at: Utc::now(),
        }
    }
}
