//! 事件处理
//!
//! 轮询 crossterm 键盘事件，将 Ctrl+C/Ctrl+L/Ctrl+Q 转为 Command（Cancel/Clear/Quit），
//! 其余按键交给 run_app 拼 input_buffer，Enter 时 submit_line。

use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tokio::sync::mpsc;

use crate::core::{Command, OperationalMode};
use crate::ui::command::{parse, ShellCommand};

/// 应用事件：来自快捷键的 Command 或原始 KeyEvent
#[derive(Debug, Clone)]
pub enum AppEvent {
    Command(Command),
    Key(KeyEvent),
}

pub struct EventHandler {
    cmd_tx: mpsc::UnboundedSender<Command>,
    mode: OperationalMode,
}

impl EventHandler {
    pub fn new(cmd_tx: mpsc::UnboundedSender<Command>, mode: OperationalMode) -> Self {
        Self { cmd_tx, mode }
    }

    pub fn poll(&self, timeout: Duration) -> anyhow::Result<Option<AppEvent>> {
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    return Ok(Some(self.handle_key(key)));
                }
            }
        }
        Ok(None)
    }

    fn handle_key(&self, key: KeyEvent) -> AppEvent {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') if ctrl => {
                let _ = self.cmd_tx.send(Command::Cancel);
                AppEvent::Command(Command::Cancel)
            }
            KeyCode::Char('l') if ctrl => {
                let _ = self.cmd_tx.send(Command::Clear);
                AppEvent::Command(Command::Clear)
            }
            KeyCode::Char('q') if ctrl => {
                let _ = self.cmd_tx.send(Command::Quit);
                AppEvent::Command(Command::Quit)
            }
            _ => AppEvent::Key(key),
        }
    }

    /// 解析一行输入并发送；返回 false 表示用户要求退出
    pub fn submit_line(&self, line: &str) -> bool {
        let parsed = parse(line);
        let exit = parsed == ShellCommand::Exit;
        if let Some(cmd) = parsed.into_command(self.mode) {
            let _ = self.cmd_tx.send(cmd);
        }
        !exit
    }
}
