//! 界面渲染
//!
//! 标题栏显示阶段、档位、模式与并发；主体为输出区（按类型着色、按宽度换行）或日志视图；底部为输入框与快捷键提示。

use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap},
    Frame,
};

use crate::core::{OutputKind, ShellPhase, ShellState, ShellView};
use crate::hardware::HardwareTier;

/// 将内容按宽度换行，按字符数计（避免在 UTF-8 中间截断）
pub fn wrap_text(s: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![s.to_string()];
    }
    let mut lines = Vec::new();
    let mut line = String::new();
    let mut count = 0usize;
    for ch in s.chars() {
        if count >= width {
            lines.push(std::mem::take(&mut line));
            count = 0;
        }
        line.push(ch);
        count += 1;
    }
    lines.push(line);
    lines
}

fn kind_style(kind: OutputKind) -> Style {
    match kind {
        OutputKind::Input => Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        OutputKind::Info => Style::default().fg(Color::Gray),
        OutputKind::Result => Style::default().fg(Color::Green),
        OutputKind::Error => Style::default().fg(Color::Red),
    }
}

fn tier_color(tier: HardwareTier) -> Color {
    match tier {
        HardwareTier::Low => Color::Red,
        HardwareTier::Balanced => Color::Yellow,
        HardwareTier::High => Color::Green,
    }
}

/// 标题栏文字
pub fn title_line(state: &ShellState) -> String {
    let phase = match state.phase {
        ShellPhase::Idle => "idle".to_string(),
        ShellPhase::Working => format!("working ({})", state.active_requests),
        ShellPhase::Error => "error".to_string(),
    };
    let thermal = if state.thermal_downgrade { " (thermal)" } else { "" };
    format!(
        " Pratighat │ {} │ tier {}{} │ {} │ running {}/{} ",
        phase, state.tier, thermal, state.mode, state.gate.running, state.gate.limit
    )
}

/// 绘制一帧；将 (总行数, 可视高度) 写入 out 供外部 clamp 滚动
pub fn draw(f: &mut Frame, state: &ShellState, input_buffer: &str, scroll: usize, out: &mut (usize, usize)) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(3)])
        .split(f.area());

    let main_area = chunks[0];
    let content_width = main_area.width.saturating_sub(3) as usize; // 边框 + 滚动条

    let view_name = match state.view {
        ShellView::Output => "",
        ShellView::Logs => " │ logs ",
    };
    let block = Block::default()
        .title(format!("{}{}", title_line(state), view_name))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(tier_color(state.tier)));

    let mut text_lines: Vec<Line> = Vec::new();
    match state.view {
        ShellView::Output => {
            for entry in &state.output {
                for piece in wrap_text(&entry.text, content_width) {
                    text_lines.push(Line::from(Span::styled(piece, kind_style(entry.kind))));
                }
            }
        }
        ShellView::Logs => {
            if state.logs.is_empty() {
                text_lines.push(Line::from(Span::styled("(no log lines yet)", Style::default().fg(Color::DarkGray))));
            }
            for entry in &state.logs {
                for piece in wrap_text(entry, content_width) {
                    text_lines.push(Line::from(Span::raw(piece)));
                }
            }
        }
    }

    let content_height = main_area.height.saturating_sub(2) as usize;
    let total_lines = text_lines.len();
    let max_scroll = total_lines.saturating_sub(content_height);
    let scroll_offset = scroll.min(max_scroll);

    let inner = block.inner(main_area);
    f.render_widget(block, main_area);
    let paragraph = Paragraph::new(Text::from(text_lines))
        .wrap(Wrap { trim: false })
        .scroll((scroll_offset as u16, 0));
    f.render_widget(paragraph, inner);

    if total_lines > content_height {
        let mut scrollbar_state = ScrollbarState::new(total_lines)
            .position(scroll_offset)
            .viewport_content_length(content_height);
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .thumb_symbol("█")
            .track_symbol(Some("░"));
        f.render_stateful_widget(scrollbar, inner, &mut scrollbar_state);
    }

    let prompt = match &state.error_message {
        Some(err) => format!(" error: {} ", err.chars().take(48).collect::<String>()),
        None => " pratighat> ".to_string(),
    };
    let border_color = if state.error_message.is_some() {
        Color::Red
    } else {
        Color::Blue
    };
    let hint = " Enter submit │ ↑↓ PgUp/PgDn scroll │ Ctrl+C cancel │ Ctrl+L clear │ Ctrl+Q quit ";
    let input_block = Block::default()
        .title(prompt)
        .title_bottom(Line::from(Span::styled(hint, Style::default().fg(Color::DarkGray))))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color));
    let input = Paragraph::new(input_buffer).block(input_block);
    f.render_widget(input, chunks[1]);

    out.0 = total_lines;
    out.1 = content_height;
}

#[cfg(test)]
mod tests {
    use ratatui::{backend::TestBackend, Terminal};

    use super::*;

    #[test]
    fn test_wrap_text_by_chars() {
        assert_eq!(wrap_text("abcdef", 4), vec!["abcd", "ef"]);
        assert_eq!(wrap_text("", 4), vec![""]);
        assert_eq!(wrap_text("侦察目标", 2), vec!["侦察", "目标"]);
    }

    #[test]
    fn test_title_line() {
        let mut s = ShellState::default();
        s.tier = HardwareTier::Low;
        s.thermal_downgrade = true;
        s.set_active(1);
        let title = title_line(&s);
        assert!(title.contains("tier low (thermal)"));
        assert!(title.contains("working (1)"));
    }

    #[test]
    fn test_draw_output_view() {
        let mut state = ShellState::default();
        state.push(OutputKind::Result, "recon task_1 succeeded");
        let mut terminal = Terminal::new(TestBackend::new(80, 20)).unwrap();
        let mut out = (0, 0);
        terminal
            .draw(|f| draw(f, &state, "recon 10.0.0", 0, &mut out))
            .unwrap();
        assert_eq!(out.0, 1);
        let buffer = terminal.backend().buffer().clone();
        let rendered: String = buffer.content().iter().map(|c| c.symbol()).collect();
        assert!(rendered.contains("recon task_1 succeeded"));
        assert!(rendered.contains("pratighat>"));
    }
}
