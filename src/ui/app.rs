//! TUI 应用主循环
//!
//! 进入全屏/原始模式，轮询 state_rx 与键盘事件，将输入行解析为 Command 发送给 Shell 运行时，
//! 每帧用 draw 渲染 ShellState 与输入缓冲。

use std::io::{self, Stdout};
use std::time::Duration;

use crossterm::event::KeyCode;
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::{mpsc, watch};

use crate::core::{Command, OperationalMode, ShellState};
use crate::ui::event::{AppEvent, EventHandler};
use crate::ui::render::draw;

/// 运行 TUI：启用原始模式与全屏，循环 poll 事件 + 渲染，退出时恢复终端
pub async fn run_app(
    state_rx: watch::Receiver<ShellState>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    mode: OperationalMode,
) -> anyhow::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(&mut terminal, state_rx, EventHandler::new(cmd_tx, mode)).await;

    restore_terminal(&mut terminal)?;
    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    state_rx: watch::Receiver<ShellState>,
    events: EventHandler,
) -> anyhow::Result<()> {
    let mut input_buffer = String::new();
    let mut scroll = 0usize;
    let mut last_len = 0usize;

    loop {
        let state = state_rx.borrow().clone();

        // 新输出时自动滚到底部
        if state.output.len() != last_len {
            last_len = state.output.len();
            scroll = usize::MAX;
        }

        match events.poll(Duration::from_millis(100))? {
            Some(AppEvent::Command(Command::Quit)) => break,
            Some(AppEvent::Command(_)) | None => {}
            Some(AppEvent::Key(key)) => match key.code {
                KeyCode::Enter => {
                    let line = std::mem::take(&mut input_buffer);
                    if !events.submit_line(&line) {
                        break;
                    }
                }
                KeyCode::Backspace => {
                    input_buffer.pop();
                }
                KeyCode::Char(c) => input_buffer.push(c),
                KeyCode::Up => scroll = scroll.saturating_sub(1),
                KeyCode::Down => scroll = scroll.saturating_add(1),
                KeyCode::PageUp => scroll = scroll.saturating_sub(10),
                KeyCode::PageDown => scroll = scroll.saturating_add(10),
                KeyCode::Home => scroll = 0,
                KeyCode::End => scroll = usize::MAX,
                _ => {}
            },
        }

        let mut scroll_info = (0usize, 0usize);
        terminal.draw(|f| draw(f, &state, &input_buffer, scroll, &mut scroll_info))?;
        let (total_lines, viewport_height) = scroll_info;
        scroll = scroll.min(total_lines.saturating_sub(viewport_height));

        tokio::task::yield_now().await;
    }
    Ok(())
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> anyhow::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
