//! 硬件画像：可用内存 / 温度采样 → 能力档位（low / balanced / high）

pub mod probe;
pub mod profile;
pub mod profiler;

pub use probe::{ResourceProbe, StaticProbe, SysinfoProbe};
pub use profile::{HardwareProfile, HardwareTier, ResourceSample, TierThresholds};
pub use profiler::HardwareProfiler;
