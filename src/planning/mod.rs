//! 任务规划：请求分解（模型辅助 + 关键词回退）与静态依赖推断

pub mod decomposer;
pub mod dependencies;
pub mod keywords;

pub use decomposer::{parse_plan, PlanOutput, PlanSource, PlannedTask, PlannerSettings, TaskDecomposer};
pub use dependencies::{infer_dependencies, upstream_roles};
pub use keywords::KeywordTable;
