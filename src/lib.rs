//! Pratighat - 多智能体任务编排核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 任务模型、协调器、主控循环、会话监管、关闭
//! - **agents**: Agent 接口、ACP 消息、注册表与内置 Agent
//! - **llm**: 推理后端抽象与实现（Ollama / OpenAI 兼容 / Mock）
//! - **routing**: 后端路由级联与安全改写
//! - **planning**: 请求分解与依赖推断
//! - **memory**: 结果存储（内存 / SQLite）与有界上下文
//! - **hardware**: 硬件画像与后台刷新
//! - **ui**: Shell 命令解析与 Ratatui TUI
//! - **api**: HTTP 接口（feature `web`）

pub mod agents;
#[cfg(feature = "web")]
pub mod api;
pub mod config;
pub mod core;
pub mod hardware;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod planning;
pub mod routing;
pub mod ui;
