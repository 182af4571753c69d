//! Shell 命令解析
//!
//! 单词命令或 `word arg`，首词不区分大小写；其余输入作为自由文本请求。

use serde_json::json;

use crate::core::{AgentRole, Command, InfoView, OperationalMode, Request};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Help,
    Status,
    Config,
    Agents,
    Logs,
    Clear,
    Exit,
    Recon(String),
    Report,
    /// 自由文本请求
    Query(String),
    /// 缺参数等用法错误；展示帮助
    Usage(&'static str),
    Empty,
}

pub fn parse(line: &str) -> ShellCommand {
    let line = line.trim();
    if line.is_empty() {
        return ShellCommand::Empty;
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };
    match (word.to_lowercase().as_str(), rest.is_empty()) {
        ("help", true) => ShellCommand::Help,
        ("status", true) => ShellCommand::Status,
        ("config", true) => ShellCommand::Config,
        ("agents", true) => ShellCommand::Agents,
        ("logs", true) => ShellCommand::Logs,
        ("clear", true) => ShellCommand::Clear,
        ("exit" | "quit" | "q", true) => ShellCommand::Exit,
        ("report", true) => ShellCommand::Report,
        ("recon", true) => ShellCommand::Usage("recon <target>"),
        ("recon", false) => ShellCommand::Recon(rest.to_string()),
        _ => ShellCommand::Query(line.to_string()),
    }
}

impl ShellCommand {
    /// 转为运行时命令；Empty 不产生命令
    pub fn into_command(self, mode: OperationalMode) -> Option<Command> {
        let cmd = match self {
            ShellCommand::Help | ShellCommand::Usage(_) => Command::Show(InfoView::Help),
            ShellCommand::Status => Command::Show(InfoView::Status),
            ShellCommand::Config => Command::Show(InfoView::Config),
            ShellCommand::Agents => Command::Show(InfoView::Agents),
            ShellCommand::Logs => Command::Show(InfoView::Logs),
            ShellCommand::Clear => Command::Clear,
            ShellCommand::Exit => Command::Quit,
            ShellCommand::Recon(target) => {
                Command::Submit(Request::command(AgentRole::Recon, json!({ "target": target }), mode))
            }
            ShellCommand::Report => Command::Submit(Request::command(AgentRole::Report, json!({}), mode)),
            ShellCommand::Query(text) => Command::Submit(Request::text(text, mode)),
            ShellCommand::Empty => return None,
        };
        Some(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RequestInput;

    #[test]
    fn test_single_word_commands() {
        assert_eq!(parse("help"), ShellCommand::Help);
        assert_eq!(parse("  STATUS "), ShellCommand::Status);
        assert_eq!(parse("q"), ShellCommand::Exit);
        assert_eq!(parse("quit"), ShellCommand::Exit);
        assert_eq!(parse("report"), ShellCommand::Report);
        assert_eq!(parse(""), ShellCommand::Empty);
    }

    #[test]
    fn test_recon_target() {
        assert_eq!(parse("recon 10.0.0.0/24"), ShellCommand::Recon("10.0.0.0/24".into()));
        assert_eq!(parse("recon"), ShellCommand::Usage("recon <target>"));
    }

    #[test]
    fn test_free_text_is_query() {
        assert_eq!(parse("help me scan x"), ShellCommand::Query("help me scan x".into()));
        assert_eq!(parse("status of host"), ShellCommand::Query("status of host".into()));
    }

    #[test]
    fn test_into_command() {
        let cmd = parse("recon example.com").into_command(OperationalMode::Manual).unwrap();
        match cmd {
            Command::Submit(req) => {
                assert_eq!(req.mode, OperationalMode::Manual);
                match req.input {
                    RequestInput::Command { role, args } => {
                        assert_eq!(role, AgentRole::Recon);
                        assert_eq!(args["target"], "example.com");
                    }
                    other => panic!("unexpected input: {other:?}"),
                }
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(matches!(
            parse("logs").into_command(OperationalMode::Assisted),
            Some(Command::Show(InfoView::Logs))
        ));
        assert!(parse("   ").into_command(OperationalMode::Assisted).is_none());
    }
}
