//! 内置 Agent：recon / pattern / exploit / chain / bypass / report / general
//!
//! 都是薄的提示模板 Agent：拼提示 → 调用路由选中的后端 → 包成 ACP 响应。
//! pattern / exploit / chain / bypass 共用 `AnalysisAgent`，只有模板不同。
//! simulation_only 开启时提示统一加模拟模式头。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agents::{AcpMessage, AcpResponse, Agent, AgentDescriptor};
use crate::core::AgentRole;
use crate::llm::{ChatMessage, LlmClient};
use crate::routing::enforce_simulation_mode;

const RECON_SYSTEM: &str =
    "You are an educational cybersecurity assistant explaining reconnaissance concepts.";

const REPORT_SYSTEM: &str = "You write concise security assessment reports from prior task results. \
Summarise findings, risk, and recommendations.";

const GENERAL_SYSTEM: &str = "You are the strategic reasoning engine of an educational cybersecurity platform. \
Analyse scenarios from a red-team perspective (simulation only), break problems into steps, \
and emphasise authorized testing.";

async fn ask(
    backend: &dyn LlmClient,
    system: &str,
    prompt: String,
    simulation_only: bool,
) -> Result<String, String> {
    let prompt = if simulation_only {
        enforce_simulation_mode(&prompt)
    } else {
        prompt
    };
    backend
        .complete(&[ChatMessage::system(system), ChatMessage::user(prompt)])
        .await
        .map_err(|e| e.to_string())
}

/// 侦察：为目标生成给定深度的侦察计划
pub struct ReconAgent {
    simulation_only: bool,
}

impl ReconAgent {
    pub fn new(simulation_only: bool) -> Self {
        Self { simulation_only }
    }
}

#[async_trait]
impl Agent for ReconAgent {
    fn describe(&self) -> AgentDescriptor {
        AgentDescriptor::new(AgentRole::Recon, "Reconnaissance planning for a target")
            .with_capabilities(&["discover_hosts", "scan_ports", "enumerate_services", "plan_recon"])
    }

    async fn execute(&self, message: AcpMessage, backend: Arc<dyn LlmClient>) -> Result<AcpResponse, String> {
        let Some(target) = message.input_str("target").map(str::to_string) else {
            return Ok(AcpResponse::invalid_input(&message, "recon task has no target"));
        };
        let depth = message.input.get("depth").and_then(Value::as_u64).unwrap_or(1);
        let prompt = format!(
            "Target: {target}\nDepth: {depth}\n\n\
             Task: Outline an authorized reconnaissance plan for this target.\n\
             Provide host discovery, port and service enumeration, and analysis steps, \
             limited to {depth} level(s) of follow-up."
        );
        let approach = ask(backend.as_ref(), RECON_SYSTEM, prompt, self.simulation_only).await?;
        Ok(AcpResponse::success(
            &message,
            json!({
                "target": target,
                "depth": depth,
                "approach": approach,
                "simulation": self.simulation_only,
            }),
        ))
    }
}

/// 分析类角色的提示模板
struct AnalysisTemplate {
    role: AgentRole,
    description: &'static str,
    capabilities: &'static [&'static str],
    system: &'static str,
    instruction: &'static str,
}

/// 针对目标或查询的理论分析（漏洞模式、PoC 模拟、攻击链、绕过策略）
pub struct AnalysisAgent {
    template: AnalysisTemplate,
    simulation_only: bool,
}

impl AnalysisAgent {
    pub fn pattern(simulation_only: bool) -> Self {
        Self::with_template(
            AnalysisTemplate {
                role: AgentRole::Pattern,
                description: "Detects vulnerability patterns and performs fingerprinting",
                capabilities: &[
                    "detect_patterns",
                    "fingerprint_service",
                    "analyze_configuration",
                    "identify_cve_patterns",
                    "match_vulnerability_signature",
                ],
                system: "You are an educational assistant that explains vulnerability patterns                          and service fingerprinting techniques.",
                instruction: "Identify likely vulnerability patterns and fingerprinting signals,                               map them to CVE classes, and list remediation guidance.",
            },
            simulation_only,
        )
    }

    pub fn exploit(simulation_only: bool) -> Self {
        Self::with_template(
            AnalysisTemplate {
                role: AgentRole::Exploit,
                description: "Safe PoC generation and vulnerability simulation",
                capabilities: &["simulate_vulnerability", "outline_safe_poc", "assess_exploitability"],
                system: "You are an educational assistant that explains how vulnerabilities are                          exploited in lab environments. Never produce weaponised code.",
                instruction: "Assess exploitability conceptually, outline a safe proof-of-concept                               for a lab environment, and describe detection and mitigation.",
            },
            simulation_only,
        )
    }

    pub fn chain(simulation_only: bool) -> Self {
        Self::with_template(
            AnalysisTemplate {
                role: AgentRole::Chain,
                description: "Predicts attack paths and analyzes lateral movement chains",
                capabilities: &[
                    "predict_attack_path",
                    "analyze_lateral_movement",
                    "build_attack_graph",
                    "assess_kill_chain",
                    "identify_pivot_points",
                ],
                system: "You are an educational assistant that reasons about attack chains                          and lateral movement in theory.",
                instruction: "Predict a theoretical attack path by kill-chain stage with MITRE                               ATT&CK tactics, identify pivot points, and suggest defensive controls.",
            },
            simulation_only,
        )
    }

    pub fn bypass(simulation_only: bool) -> Self {
        Self::with_template(
            AnalysisTemplate {
                role: AgentRole::Bypass,
                description: "Simulates fuzzing and analyzes bypass strategies (educational)",
                capabilities: &[
                    "generate_fuzzing_strategy",
                    "analyze_input_validation",
                    "simulate_encoding_bypass",
                    "test_waf_bypass_concepts",
                    "create_payload_variants",
                ],
                system: "You are an educational assistant that explains input validation,                          fuzzing and WAF bypass concepts for defenders.",
                instruction: "Describe a fuzzing strategy and the classes of validation or WAF                               bypass to test conceptually, with hardening recommendations.",
            },
            simulation_only,
        )
    }

    fn with_template(template: AnalysisTemplate, simulation_only: bool) -> Self {
        Self {
            template,
            simulation_only,
        }
    }
}

#[async_trait]
impl Agent for AnalysisAgent {
    fn describe(&self) -> AgentDescriptor {
        AgentDescriptor::new(self.template.role.clone(), self.template.description)
            .with_capabilities(self.template.capabilities)
    }

    async fn execute(&self, message: AcpMessage, backend: Arc<dyn LlmClient>) -> Result<AcpResponse, String> {
        let target = message.input_str("target").unwrap_or("unspecified").to_string();
        let query = message.input_str("query").unwrap_or_default().to_string();
        let prompt = format!(
            "Target: {target}
Request: {query}
Prior results: {}

Task: {}",
            message.context, self.template.instruction
        );
        let analysis = ask(backend.as_ref(), self.template.system, prompt, self.simulation_only).await?;
        Ok(AcpResponse::success(
            &message,
            json!({
                "target": target,
                "analysis": analysis,
                "simulation": self.simulation_only,
            }),
        ))
    }
}

/// 报告：基于上下文窗口中的历史结果写摘要
pub struct ReportAgent {
    simulation_only: bool,
}

impl ReportAgent {
    pub fn new(simulation_only: bool) -> Self {
        Self { simulation_only }
    }
}

#[async_trait]
impl Agent for ReportAgent {
    fn describe(&self) -> AgentDescriptor {
        AgentDescriptor::new(AgentRole::Report, "Summary report over recent results")
            .with_capabilities(&["generate_executive_summary", "generate_full_report"])
    }

    async fn execute(&self, message: AcpMessage, backend: Arc<dyn LlmClient>) -> Result<AcpResponse, String> {
        let sources = message.context.as_array().map_or(0, Vec::len);
        let scope = message.input_str("scope").unwrap_or("current session");
        let prompt = format!(
            "Scope: {scope}\nNumber of prior results: {sources}\n\nResults:\n{}\n\n\
             Task: Generate an executive summary with findings, risk assessment and recommendations.",
            message.context
        );
        let summary = ask(backend.as_ref(), REPORT_SYSTEM, prompt, self.simulation_only).await?;
        Ok(AcpResponse::success(
            &message,
            json!({ "summary": summary, "sources": sources, "scope": scope }),
        ))
    }
}

/// 通用：自由文本查询的策略分析（无法确定角色时的归宿）
pub struct GeneralAgent {
    simulation_only: bool,
}

impl GeneralAgent {
    pub fn new(simulation_only: bool) -> Self {
        Self { simulation_only }
    }
}

#[async_trait]
impl Agent for GeneralAgent {
    fn describe(&self) -> AgentDescriptor {
        AgentDescriptor::new(AgentRole::General, "Strategic analysis of free-text queries")
    }

    async fn execute(&self, message: AcpMessage, backend: Arc<dyn LlmClient>) -> Result<AcpResponse, String> {
        let query = message
            .input_str("query")
            .map(str::to_string)
            .or_else(|| message.input.as_str().map(str::to_string))
            .unwrap_or_else(|| message.input.to_string());
        let prompt = format!(
            "Recent context: {}\n\nQuery: {query}\n\n\
             Provide a strategic analysis with problem understanding, key considerations, \
             a simulation-safe approach, and risks with mitigations.",
            message.context
        );
        let analysis = ask(backend.as_ref(), GENERAL_SYSTEM, prompt, self.simulation_only).await?;
        Ok(AcpResponse::success(&message, json!({ "query": query, "analysis": analysis })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AcpStatus;
    use crate::core::{RequestId, Task};
    use crate::llm::MockLlmClient;

    fn message(role: AgentRole, input: Value) -> AcpMessage {
        let task = Task::new(RequestId::new(), role, input.clone());
        AcpMessage::for_task(&task, input, json!([{"task_id": "t0"}]))
    }

    #[tokio::test]
    async fn test_recon_uses_backend_and_depth() {
        let backend = Arc::new(MockLlmClient::local().with_reply("plan"));
        let msg = message(AgentRole::Recon, json!({"target": "10.0.0.1", "depth": 1}));
        let resp = ReconAgent::new(true).execute(msg.clone(), backend.clone()).await.unwrap();
        assert!(resp.validate_against(&msg).is_ok());
        let data = resp.data.unwrap();
        assert_eq!(data["approach"], "plan");
        assert_eq!(data["depth"], 1);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_recon_without_target_fails() {
        let backend = Arc::new(MockLlmClient::local());
        let resp = ReconAgent::new(true)
            .execute(message(AgentRole::Recon, json!({})), backend)
            .await
            .unwrap();
        assert_eq!(resp.status, AcpStatus::Failure);
        assert_eq!(resp.error_kind.as_deref(), Some("SchemaInvalid"));
    }

    #[tokio::test]
    async fn test_general_applies_simulation_header() {
        let backend = Arc::new(MockLlmClient::local());
        let resp = GeneralAgent::new(true)
            .execute(message(AgentRole::General, json!({"query": "explain xss"})), backend)
            .await
            .unwrap();
        let analysis = resp.data.unwrap()["analysis"].as_str().unwrap().to_string();
        // 回显的是 user 消息，包含模拟模式头
        assert!(analysis.contains("[SIMULATION MODE ACTIVE]"));
    }

    #[test]
    fn test_analysis_agents_describe_their_role() {
        let agents = [
            AnalysisAgent::pattern(true),
            AnalysisAgent::exploit(true),
            AnalysisAgent::chain(true),
            AnalysisAgent::bypass(true),
        ];
        let roles: Vec<AgentRole> = agents.iter().map(|a| a.describe().role).collect();
        assert_eq!(
            roles,
            vec![AgentRole::Pattern, AgentRole::Exploit, AgentRole::Chain, AgentRole::Bypass]
        );
        assert!(agents[2].describe().capabilities.contains(&"identify_pivot_points".to_string()));
    }

    #[tokio::test]
    async fn test_analysis_without_target_still_answers() {
        let backend = Arc::new(MockLlmClient::local());
        let msg = message(AgentRole::Bypass, json!({"query": "what is a waf"}));
        let resp = AnalysisAgent::bypass(true).execute(msg.clone(), backend).await.unwrap();
        assert!(resp.validate_against(&msg).is_ok());
        let data = resp.data.unwrap();
        assert_eq!(data["target"], "unspecified");
        let analysis = data["analysis"].as_str().unwrap();
        assert!(analysis.contains("[SIMULATION MODE ACTIVE]"));
        assert!(analysis.contains("what is a waf"));
    }

    #[tokio::test]
    async fn test_report_counts_context() {
        let backend = Arc::new(MockLlmClient::local().with_reply("summary"));
        let resp = ReportAgent::new(false)
            .execute(message(AgentRole::Report, json!({})), backend)
            .await
            .unwrap();
        assert_eq!(resp.data.unwrap()["sources"], 1);
    }

    #[tokio::test]
    async fn test_backend_error_is_err() {
        let backend = Arc::new(MockLlmClient::local().with_error(crate::llm::BackendError::Timeout));
        let err = GeneralAgent::new(true)
            .execute(message(AgentRole::General, json!("q")), backend)
            .await
            .unwrap_err();
        assert!(err.contains("timed out"));
    }
}
