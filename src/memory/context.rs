//! 有界上下文窗口
//!
//! 从 MemoryStore::recent 取最近 N 条结果，压成 ACP `context` 字段与规划提示片段。
//! 单条 payload 截断到固定字符数，避免提示无限增长。

use serde_json::{json, Value};

use crate::memory::{AgentResult, MemoryError, MemoryStore};

const MAX_PAYLOAD_CHARS: usize = 600;

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("...");
    out
}

fn summarize(result: &AgentResult) -> Value {
    let payload = Value::Object(result.payload.clone()).to_string();
    json!({
        "task_id": result.task_id,
        "agent_role": result.role,
        "status": result.status,
        "input": truncate(&result.input.to_string(), MAX_PAYLOAD_CHARS),
        "payload": truncate(&payload, MAX_PAYLOAD_CHARS),
    })
}

/// 最近 `window` 条记录中的终态结果（进行中的快照不进入上下文）
fn recent_terminal(store: &dyn MemoryStore, window: usize) -> Result<Vec<AgentResult>, MemoryError> {
    Ok(store
        .recent(window)?
        .into_iter()
        .filter(AgentResult::is_terminal)
        .collect())
}

/// 构建 ACP `context`：最新在前
pub fn build_context(store: &dyn MemoryStore, window: usize) -> Result<Value, MemoryError> {
    let recent = recent_terminal(store, window)?;
    Ok(Value::Array(recent.iter().map(summarize).collect()))
}

/// 规划提示中的 “最近结果” 段落；无结果时返回空串
pub fn context_prompt_section(store: &dyn MemoryStore, window: usize) -> Result<String, MemoryError> {
    let recent = recent_terminal(store, window)?;
    if recent.is_empty() {
        return Ok(String::new());
    }
    let mut out = String::from("## Recent results\n");
    for r in &recent {
        let payload = Value::Object(r.payload.clone()).to_string();
        out.push_str(&format!(
            "- [{}] {} ({}): {}\n",
            r.role,
            r.task_id,
            r.status,
            truncate(&payload, MAX_PAYLOAD_CHARS)
        ));
    }
    Ok(out)
}
