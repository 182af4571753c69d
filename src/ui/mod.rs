//! 交互式 Shell：命令解析（command）+ Ratatui TUI（app、event、render）

pub mod app;
pub mod command;
pub mod event;
pub mod render;

pub use app::run_app;
pub use command::{parse, ShellCommand};
pub use event::EventHandler;
pub use render::draw;
