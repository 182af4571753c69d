//! 资源探针：真实采样（sysinfo）与可注入的静态探针

use std::sync::{Arc, Mutex};

use sysinfo::{Components, System};

use crate::hardware::ResourceSample;

/// 采样源；HardwareProfiler 只依赖该 trait
pub trait ResourceProbe: Send {
    fn sample(&mut self) -> ResourceSample;
}

/// 基于 sysinfo 的内存与温度采样
pub struct SysinfoProbe {
    system: System,
    components: Components,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            components: Components::new_with_refreshed_list(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn sample(&mut self) -> ResourceSample {
        self.system.refresh_memory();
        self.components.refresh();

        let mut max_temperature: Option<f32> = None;
        let mut throttled = false;
        for component in self.components.iter() {
            let t = component.temperature();
            if !t.is_finite() {
                continue;
            }
            max_temperature = Some(max_temperature.map_or(t, |m| m.max(t)));
            // 达到传感器自报的临界温度视为平台降频信号
            if component.critical().is_some_and(|c| c > 0.0 && t >= c) {
                throttled = true;
            }
        }

        ResourceSample {
            available_memory_bytes: self.system.available_memory(),
            total_memory_bytes: self.system.total_memory(),
            max_temperature_c: max_temperature,
            throttled,
        }
    }
}

/// 返回可在运行时替换的固定采样；克隆共享同一份状态
#[derive(Clone, Default)]
pub struct StaticProbe {
    sample: Arc<Mutex<ResourceSample>>,
}

impl StaticProbe {
    pub fn new(sample: ResourceSample) -> Self {
        Self {
            sample: Arc::new(Mutex::new(sample)),
        }
    }

    pub fn set(&self, sample: ResourceSample) {
        if let Ok(mut guard) = self.sample.lock() {
            *guard = sample;
        }
    }
}

impl ResourceProbe for StaticProbe {
    fn sample(&mut self) -> ResourceSample {
        self.sample
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}
