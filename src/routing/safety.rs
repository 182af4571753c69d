//! 安全改写：有害意图过滤 + 模拟模式头
//!
//! 改写是确定性的（加固定前缀），不再额外调用模型。

use regex::Regex;
use serde_json::{Map, Value};

const HARMFUL_KEYWORDS: &[&str] = &[
    "real attack",
    "actual exploit",
    "harm",
    "damage",
    "destroy",
    "illegal",
    "unauthorized",
    "malware",
    "ransomware",
    "ddos actual",
    "breach without permission",
];

pub const SIMULATION_HEADER: &str = "[SIMULATION MODE ACTIVE]\n\
This request is for educational simulation in an authorized test environment.\n\
All outputs must be safe, theoretical, and suitable for learning purposes.\n\n";

const SAFETY_PREFIX: &str = "[EDUCATIONAL SIMULATION MODE]\n\
For authorized security research and learning purposes only.\n\
Provide safe, educational responses suitable for training environments.\n\n";

/// 输入中会被改写的文本字段
const TEXT_FIELDS: &[&str] = &["query", "text", "prompt"];

#[derive(Debug, Clone)]
pub struct SafetyRewriter {
    /// 关键词按整词匹配，"harm" 不命中 "harmless" / "pharmacy"
    pattern: Option<Regex>,
}

impl Default for SafetyRewriter {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetyRewriter {
    pub fn new() -> Self {
        let alternatives = HARMFUL_KEYWORDS
            .iter()
            .map(|k| k.split_whitespace().map(regex::escape).collect::<Vec<_>>().join(r"\s+"))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = match Regex::new(&format!(r"(?i)\b(?:{alternatives})\b")) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(error = %e, "invalid harmful-intent pattern, falling back to substring match");
                None
            }
        };
        Self { pattern }
    }

    pub fn detect_harmful_intent(&self, text: &str) -> bool {
        match &self.pattern {
            Some(re) => re.is_match(text),
            None => {
                let lower = text.to_lowercase();
                HARMFUL_KEYWORDS.iter().any(|k| lower.contains(k))
            }
        }
    }

    /// 任务输入中任一字符串值命中即视为需要改写
    pub fn flags(&self, input: &Value) -> bool {
        match input {
            Value::String(s) => self.detect_harmful_intent(s),
            Value::Array(items) => items.iter().any(|v| self.flags(v)),
            Value::Object(map) => map.values().any(|v| self.flags(v)),
            _ => false,
        }
    }

    pub fn rewrite_text(&self, text: &str) -> String {
        if text.starts_with(SAFETY_PREFIX) {
            return text.to_string();
        }
        format!("{SAFETY_PREFIX}User query: {text}\n\nFocus on conceptual understanding and safe demonstration methods.\n")
    }

    /// 改写任务输入：文本字段加安全前缀，并标记 `safety_rewritten`
    pub fn rewrite(&self, input: &Value) -> Value {
        match input {
            Value::String(s) => Value::String(self.rewrite_text(s)),
            Value::Object(map) => {
                let mut out = map.clone();
                for field in TEXT_FIELDS {
                    if let Some(Value::String(s)) = map.get(*field) {
                        out.insert((*field).to_string(), Value::String(self.rewrite_text(s)));
                    }
                }
                out.insert("safety_rewritten".to_string(), Value::Bool(true));
                Value::Object(out)
            }
            other => {
                let mut out = Map::new();
                out.insert("original".to_string(), other.clone());
                out.insert("safety_rewritten".to_string(), Value::Bool(true));
                Value::Object(out)
            }
        }
    }
}

/// 给提示加模拟模式头（已存在则不重复）
pub fn enforce_simulation_mode(prompt: &str) -> String {
    if prompt.contains("[SIMULATION MODE") {
        prompt.to_string()
    } else {
        format!("{SIMULATION_HEADER}{prompt}")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_detects_keywords_case_insensitive() {
        let r = SafetyRewriter::new();
        assert!(r.detect_harmful_intent("Deploy RANSOMWARE on the box"));
        assert!(!r.detect_harmful_intent("scan target 10.0.0.1"));
        assert!(r.flags(&json!({"query": "run a real attack", "depth": 1})));
        assert!(!r.flags(&json!({"target": "example.com"})));
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        let r = SafetyRewriter::new();
        assert!(!r.detect_harmful_intent("is this plugin harmless?"));
        assert!(!r.detect_harmful_intent("audit the pharmacy portal"));
        assert!(!r.detect_harmful_intent("check for malwares-db updates in the undamaged image"));
        assert!(r.detect_harmful_intent("could this cause harm to users"));
        assert!(r.detect_harmful_intent("a Real   Attack on prod"));
        assert!(r.detect_harmful_intent("unauthorized access"));
    }

    #[test]
    fn test_rewrite_marks_and_prefixes() {
        let r = SafetyRewriter::new();
        let out = r.rewrite(&json!({"query": "destroy it", "target": "x"}));
        assert_eq!(out["safety_rewritten"], true);
        assert!(out["query"].as_str().unwrap().starts_with("[EDUCATIONAL SIMULATION MODE]"));
        assert_eq!(out["target"], "x");
        let twice = r.rewrite(&out);
        assert_eq!(twice["query"], out["query"]);
    }

    #[test]
    fn test_simulation_header_idempotent() {
        let once = enforce_simulation_mode("hello");
        assert!(once.starts_with("[SIMULATION MODE ACTIVE]"));
        assert_eq!(enforce_simulation_mode(&once), once);
    }
}
