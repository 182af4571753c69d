//! 确定性分解：关键词 → 角色
//!
//! 表的顺序即产出任务的顺序（侦察在前、报告在后），依赖推断依赖这一顺序。

use regex::Regex;

use crate::core::AgentRole;

const ROLE_KEYWORDS: &[(&str, &str)] = &[
    (
        "recon",
        r"(?i)\b(scan|scans|scanning|recon|reconnaissance|enumerate|enumeration|discover|discovery|ports?|subdomains?|hosts?|nmap|osint)\b",
    ),
    (
        "pattern",
        r"(?i)\b(pattern|patterns|fingerprint|fingerprinting|signatures?|anomal(y|ies))\b",
    ),
    (
        "exploit",
        r"(?i)\b(exploit|exploits|exploitation|poc|proof of concept|vulnerabilit(y|ies)|cve-\d{4}-\d+)\b",
    ),
    (
        "bypass",
        r"(?i)\b(bypass|fuzz|fuzzing|waf|evasion|filter evasion)\b",
    ),
    (
        "chain",
        r"(?i)\b(chain|chaining|lateral|pivot|pivoting|attack path|attack paths)\b",
    ),
    (
        "report",
        r"(?i)\b(report|reports|summary|summarize|summarise|document|documentation|write-?up)\b",
    ),
];

pub struct KeywordTable {
    rules: Vec<(AgentRole, Regex)>,
    ipv4: Option<Regex>,
    domain: Option<Regex>,
    after_keyword: Option<Regex>,
}

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "invalid planner pattern");
            None
        }
    }
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordTable {
    pub fn new() -> Self {
        let rules = ROLE_KEYWORDS
            .iter()
            .filter_map(|(role, pattern)| compile(pattern).map(|re| (AgentRole::from(*role), re)))
            .collect();
        Self {
            rules,
            ipv4: compile(r"\b(?:\d{1,3}\.){3}\d{1,3}(?:/\d{1,2})?\b"),
            domain: compile(r"(?i)\b(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}\b"),
            after_keyword: compile(r"(?i)\b(?:target|on|against|host)\s+([^\s,;]+)"),
        }
    }

    /// 按表序返回命中的角色，每个角色至多一次
    pub fn match_roles(&self, text: &str) -> Vec<AgentRole> {
        self.rules
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(role, _)| role.clone())
            .collect()
    }

    /// 目标提取：IP / 网段 → 域名 → `target|on|against|host` 之后的词
    pub fn extract_target(&self, text: &str) -> Option<String> {
        for re in [&self.ipv4, &self.domain].into_iter().flatten() {
            if let Some(m) = re.find(text) {
                return Some(m.as_str().to_string());
            }
        }
        self.after_keyword
            .as_ref()
            .and_then(|re| re.captures(text))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim_matches(|c: char| c == '"' || c == '\'').to_string())
            .filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_maps_to_recon_only() {
        let table = KeywordTable::new();
        assert_eq!(table.match_roles("scan target X"), vec![AgentRole::Recon]);
    }

    #[test]
    fn test_multiple_roles_in_table_order() {
        let table = KeywordTable::new();
        let roles = table.match_roles("write a report after you enumerate ports and find an exploit");
        assert_eq!(roles, vec![AgentRole::Recon, AgentRole::Exploit, AgentRole::Report]);
    }

    #[test]
    fn test_no_match() {
        assert!(KeywordTable::new().match_roles("what is the weather").is_empty());
    }

    #[test]
    fn test_target_extraction() {
        let t = KeywordTable::new();
        assert_eq!(t.extract_target("scan 192.168.1.0/24 please").as_deref(), Some("192.168.1.0/24"));
        assert_eq!(t.extract_target("recon on example.com").as_deref(), Some("example.com"));
        assert_eq!(t.extract_target("scan target X").as_deref(), Some("X"));
        assert_eq!(t.extract_target("hello there"), None);
    }
}
