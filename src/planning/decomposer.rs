//! 任务分解器：请求 → 有序任务列表
//!
//! 两级策略：
//! 1. 模型辅助（assisted / autopilot 且 planner.model_assisted）：经路由器以 `planner` 角色取后端，
//!    要求输出符合 JSON Schema 的任务列表；调用失败、超时或校验不通过都回退到 2
//! 2. 关键词映射：按固定表匹配角色，无命中时产出单个 general 任务
//!
//! 非空请求永远不会得到空列表。依赖边只按静态表推断。

use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agents::AgentRegistry;
use crate::config::AppConfig;
use crate::core::{AgentRole, OperationalMode, Request, RequestInput, Task};
use crate::hardware::{HardwareProfile, HardwareTier};
use crate::llm::ChatMessage;
use crate::memory::{context_prompt_section, MemoryStore};
use crate::planning::{infer_dependencies, KeywordTable};
use crate::routing::BackendRouter;

/// 模型辅助分解的输出格式
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanOutput {
    pub tasks: Vec<PlannedTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlannedTask {
    /// 目标 Agent 角色名（如 recon / report）
    pub role: String,
    /// 传给 Agent 的输入
    #[serde(default)]
    pub input: Value,
    /// 越大越先调度；缺省取角色默认值
    #[serde(default)]
    pub priority: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct PlannerSettings {
    pub model_assisted: bool,
    pub timeout: Duration,
    pub max_tasks: usize,
    pub context_window: usize,
    pub max_recursion_depth: u32,
}

impl PlannerSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            model_assisted: cfg.planner.model_assisted,
            timeout: Duration::from_secs(cfg.planner.timeout_secs.max(1)),
            max_tasks: cfg.planner.max_tasks.max(1),
            context_window: cfg.storage.context_window,
            max_recursion_depth: cfg.app.max_recursion_depth.max(1),
        }
    }

    /// 侦察深度：low = 1，balanced = 上限的一半，high = 上限
    pub fn depth_for(&self, tier: HardwareTier) -> u32 {
        match tier {
            HardwareTier::Low => 1,
            HardwareTier::Balanced => (self.max_recursion_depth / 2).max(1),
            HardwareTier::High => self.max_recursion_depth,
        }
    }

    pub fn task_cap(&self, mode: OperationalMode) -> usize {
        match mode {
            OperationalMode::Autopilot => self.max_tasks * 2,
            _ => self.max_tasks,
        }
    }
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// 分解走的路径（日志 / 状态展示）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Command,
    Model,
    Keyword,
    Default,
}

pub struct TaskDecomposer {
    router: Arc<BackendRouter>,
    registry: Arc<AgentRegistry>,
    store: Arc<dyn MemoryStore>,
    keywords: KeywordTable,
    settings: PlannerSettings,
}

impl TaskDecomposer {
    pub fn new(
        router: Arc<BackendRouter>,
        registry: Arc<AgentRegistry>,
        store: Arc<dyn MemoryStore>,
        settings: PlannerSettings,
    ) -> Self {
        Self {
            router,
            registry,
            store,
            keywords: KeywordTable::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    pub async fn decompose(&self, request: &Request, profile: &HardwareProfile) -> Vec<Task> {
        self.decompose_with_source(request, profile).await.0
    }

    pub async fn decompose_with_source(
        &self,
        request: &Request,
        profile: &HardwareProfile,
    ) -> (Vec<Task>, PlanSource) {
        if request.input.is_blank() {
            return (Vec::new(), PlanSource::Default);
        }

        let (mut tasks, source) = match &request.input {
            RequestInput::Command { role, args } => {
                (vec![self.command_task(request, role, args, profile.tier)], PlanSource::Command)
            }
            RequestInput::Text { text } => self.decompose_text(request, text, profile).await,
        };

        let cap = self.settings.task_cap(request.mode);
        if tasks.len() > cap {
            tracing::debug!(request_id = %request.id, planned = tasks.len(), cap, "truncating plan");
            tasks.truncate(cap);
        }
        infer_dependencies(&mut tasks);

        tracing::info!(
            request_id = %request.id,
            source = ?source,
            tasks = tasks.len(),
            roles = %tasks.iter().map(|t| t.role.as_str()).collect::<Vec<_>>().join(","),
            "request decomposed"
        );
        (tasks, source)
    }

    async fn decompose_text(
        &self,
        request: &Request,
        text: &str,
        profile: &HardwareProfile,
    ) -> (Vec<Task>, PlanSource) {
        if request.mode != OperationalMode::Manual && self.settings.model_assisted {
            match self.model_assisted(request, text, profile).await {
                Ok(tasks) => return (tasks, PlanSource::Model),
                Err(reason) => {
                    tracing::info!(request_id = %request.id, reason = %reason, "model-assisted planning fell back to keywords");
                }
            }
        }
        self.keyword_decompose(request, text, profile.tier)
    }

    /// 确定性路径；保证至少一个任务
    pub fn keyword_decompose(&self, request: &Request, text: &str, tier: HardwareTier) -> (Vec<Task>, PlanSource) {
        // 没有注册 Agent 的角色不下发
        let roles: Vec<AgentRole> = self
            .keywords
            .match_roles(text)
            .into_iter()
            .filter(|role| self.registry.contains(role))
            .collect();
        if roles.is_empty() {
            let task = Task::new(request.id.clone(), AgentRole::General, json!({ "query": text }));
            return (vec![task], PlanSource::Default);
        }
        let target = self.keywords.extract_target(text);
        let tasks = roles
            .into_iter()
            .map(|role| {
                let mut input = json!({ "query": text });
                if let Some(t) = &target {
                    input["target"] = Value::from(t.as_str());
                }
                let input = self.with_depth(&role, input, tier);
                Task::new(request.id.clone(), role, input)
            })
            .collect();
        (tasks, PlanSource::Keyword)
    }

    fn command_task(&self, request: &Request, role: &AgentRole, args: &Value, tier: HardwareTier) -> Task {
        let input = match args {
            Value::Object(_) => args.clone(),
            Value::Null => json!({}),
            Value::String(s) if role == &AgentRole::Recon => json!({ "target": s }),
            other => json!({ "query": other }),
        };
        let input = self.with_depth(role, input, tier);
        Task::new(request.id.clone(), role.clone(), input)
    }

    /// recon 任务的 depth 限制在档位允许的范围内
    fn with_depth(&self, role: &AgentRole, mut input: Value, tier: HardwareTier) -> Value {
        if role != &AgentRole::Recon {
            return input;
        }
        let allowed = self.settings.depth_for(tier);
        let depth = input
            .get("depth")
            .and_then(Value::as_u64)
            .map_or(allowed, |d| u32::try_from(d).unwrap_or(u32::MAX).clamp(1, allowed));
        if let Value::Object(map) = &mut input {
            map.insert("depth".to_string(), Value::from(depth));
        }
        input
    }

    fn planner_prompt(&self, text: &str) -> String {
        let schema = serde_json::to_string_pretty(&schemars::schema_for!(PlanOutput))
            .unwrap_or_else(|_| "{}".to_string());
        let roles: Vec<String> = self
            .registry
            .descriptors()
            .into_iter()
            .map(|d| format!("- {}: {}", d.role, d.description))
            .collect();
        let context = context_prompt_section(self.store.as_ref(), self.settings.context_window)
            .unwrap_or_default();
        format!(
            "Objective: {text}\n\n\
             Break this down into tasks for the following agents:\n{}\n\n\
             {context}\
             Respond with a single JSON object matching this schema and nothing else:\n{schema}\n",
            roles.join("\n")
        )
    }

    async fn model_assisted(
        &self,
        request: &Request,
        text: &str,
        profile: &HardwareProfile,
    ) -> Result<Vec<Task>, String> {
        let planner = AgentRole::Planner;
        let routed = self
            .router
            .route_input(&planner, planner.min_capability(), &json!({ "query": text }), profile)
            .await
            .map_err(|e| e.to_string())?;

        // 安全改写后的 query 才是发给规划后端的目标
        let objective = routed.input.get("query").and_then(Value::as_str).unwrap_or(text);
        let messages = [
            ChatMessage::system("You are the task planner of a multi-agent security research system. Output JSON only."),
            ChatMessage::user(self.planner_prompt(objective)),
        ];
        let raw = tokio::time::timeout(self.settings.timeout, routed.client.complete(&messages))
            .await
            .map_err(|_| format!("planner timed out after {:?}", self.settings.timeout))?
            .map_err(|e| e.to_string())?;

        let plan = parse_plan(&raw)?;
        self.validate_plan(request, plan, profile.tier)
    }

    /// 校验：非空、角色已注册且不是 planner 自身
    fn validate_plan(&self, request: &Request, plan: PlanOutput, tier: HardwareTier) -> Result<Vec<Task>, String> {
        if plan.tasks.is_empty() {
            return Err("plan contains no tasks".to_string());
        }
        plan.tasks
            .into_iter()
            .map(|p| {
                let role = AgentRole::from(p.role.as_str());
                if p.role.trim().is_empty() || role == AgentRole::Planner {
                    return Err(format!("invalid role in plan: {:?}", p.role));
                }
                if !self.registry.contains(&role) {
                    return Err(format!("plan names unregistered role: {role}"));
                }
                let input = match p.input {
                    Value::Null => json!({}),
                    v => v,
                };
                let input = self.with_depth(&role, input, tier);
                let mut task = Task::new(request.id.clone(), role, input);
                if let Some(priority) = p.priority {
                    task = task.with_priority(priority);
                }
                Ok(task)
            })
            .collect()
    }
}

/// 从模型输出中取 JSON 对象（容忍 ```json 代码块与前后说明文字）
pub fn parse_plan(raw: &str) -> Result<PlanOutput, String> {
    let start = raw.find('{').ok_or("planner output has no JSON object")?;
    let end = raw.rfind('}').ok_or("planner output has no JSON object")?;
    if end < start {
        return Err("planner output has no JSON object".to_string());
    }
    serde_json::from_str(&raw[start..=end]).map_err(|e| format!("planner output failed schema validation: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::register_builtin;
    use crate::config::TierValues;
    use crate::llm::{BackendError, LlmClient, MockLlmClient};
    use crate::memory::InMemoryStore;
    use crate::routing::LocalRoute;

    fn decomposer(backend: Arc<MockLlmClient>) -> TaskDecomposer {
        let backend: Arc<dyn LlmClient> = backend;
        let router = BackendRouter::new(
            Some(LocalRoute::new(
                backend,
                TierValues {
                    low: 1,
                    balanced: 2,
                    high: 3,
                },
                Duration::from_secs(60),
            )),
            None,
            true,
        );
        let registry = Arc::new(AgentRegistry::new());
        register_builtin(&registry, true);
        TaskDecomposer::new(
            Arc::new(router),
            registry,
            Arc::new(InMemoryStore::new()),
            PlannerSettings {
                timeout: Duration::from_millis(200),
                ..PlannerSettings::default()
            },
        )
    }

    fn profile(tier: HardwareTier) -> HardwareProfile {
        HardwareProfile::fixed(tier)
    }

    #[tokio::test]
    async fn test_manual_scan_low_tier() {
        let backend = Arc::new(MockLlmClient::local());
        let d = decomposer(backend.clone());
        let req = Request::text("scan target X", OperationalMode::Manual);
        let tasks = d.decompose(&req, &profile(HardwareTier::Low)).await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].role, AgentRole::Recon);
        assert_eq!(tasks[0].input["target"], "X");
        assert_eq!(tasks[0].input["depth"], 1);
        assert_eq!(backend.calls(), 0, "manual mode never calls the planner");
    }

    #[tokio::test]
    async fn test_model_plan_used_when_valid() {
        let backend = Arc::new(MockLlmClient::local().with_reply(
            "```json\n{\"tasks\": [{\"role\": \"recon\", \"input\": {\"target\": \"a.com\", \"depth\": 9}}, {\"role\": \"report\"}]}\n```",
        ));
        let d = decomposer(backend);
        let req = Request::text("look into a.com", OperationalMode::Assisted);
        let (tasks, source) = d.decompose_with_source(&req, &profile(HardwareTier::Balanced)).await;
        assert_eq!(source, PlanSource::Model);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].input["depth"], 2);
        assert_eq!(tasks[1].depends_on, vec![tasks[0].id.clone()]);
    }

    #[tokio::test]
    async fn test_invalid_model_output_falls_back() {
        let backend = Arc::new(MockLlmClient::local().with_reply("I cannot help with that."));
        let d = decomposer(backend);
        let req = Request::text("scan 10.0.0.1 and write a report", OperationalMode::Assisted);
        let (tasks, source) = d.decompose_with_source(&req, &profile(HardwareTier::High)).await;
        assert_eq!(source, PlanSource::Keyword);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].input["target"], "10.0.0.1");
        assert_eq!(tasks[0].input["depth"], 5);
    }

    #[tokio::test]
    async fn test_unregistered_role_and_backend_error_fall_back() {
        let backend = Arc::new(
            MockLlmClient::local()
                .with_reply("{\"tasks\": [{\"role\": \"osint\"}]}")
                .with_error(BackendError::Timeout),
        );
        let d = decomposer(backend);
        for _ in 0..2 {
            let req = Request::text("tell me about tls", OperationalMode::Autopilot);
            let (tasks, source) = d.decompose_with_source(&req, &profile(HardwareTier::High)).await;
            assert_eq!(source, PlanSource::Default);
            assert_eq!(tasks.len(), 1);
            assert_eq!(tasks[0].role, AgentRole::General);
        }
    }

    #[tokio::test]
    async fn test_planner_sees_rewritten_objective() {
        let backend = Arc::new(MockLlmClient::local().with_reply("{\"tasks\": [{\"role\": \"general\"}]}"));
        let d = decomposer(backend.clone());
        let req = Request::text("deploy ransomware on the lab box", OperationalMode::Assisted);
        let (_, source) = d.decompose_with_source(&req, &profile(HardwareTier::High)).await;
        assert_eq!(source, PlanSource::Model);
        let prompts = backend.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].starts_with("Objective: [EDUCATIONAL SIMULATION MODE]"));
        assert!(prompts[0].contains("deploy ransomware on the lab box"));
    }

    #[test]
    fn test_unregistered_keyword_roles_are_dropped() {
        let registry = Arc::new(AgentRegistry::new());
        register_builtin(&registry, true);
        registry.unregister(&AgentRole::Exploit);
        let d = TaskDecomposer::new(
            Arc::new(BackendRouter::new(None, None, true)),
            registry,
            Arc::new(InMemoryStore::new()),
            PlannerSettings::default(),
        );
        let req = Request::text("check vulnerability of 10.0.0.1", OperationalMode::Manual);
        let (tasks, source) = d.keyword_decompose(&req, "check vulnerability of 10.0.0.1", HardwareTier::High);
        assert_eq!(source, PlanSource::Default);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].role, AgentRole::General);

        let (tasks, source) = d.keyword_decompose(&req, "scan 10.0.0.1, check vulnerability", HardwareTier::High);
        assert_eq!(source, PlanSource::Keyword);
        assert_eq!(tasks.iter().map(|t| t.role.clone()).collect::<Vec<_>>(), vec![AgentRole::Recon]);
    }

    #[tokio::test]
    async fn test_oversized_depth_is_clamped() {
        let d = decomposer(Arc::new(MockLlmClient::local()));
        let huge = u64::from(u32::MAX) + 1;
        let req = Request::command(
            AgentRole::Recon,
            json!({ "target": "a.com", "depth": huge }),
            OperationalMode::Manual,
        );
        let tasks = d.decompose(&req, &profile(HardwareTier::Balanced)).await;
        assert_eq!(tasks[0].input["depth"], 2);
    }

    #[tokio::test]
    async fn test_planner_timeout_falls_back() {
        let backend = Arc::new(MockLlmClient::local().with_delay(Duration::from_secs(2)));
        let d = decomposer(backend);
        let req = Request::text("enumerate subdomains of example.org", OperationalMode::Assisted);
        let (tasks, source) = d.decompose_with_source(&req, &profile(HardwareTier::High)).await;
        assert_eq!(source, PlanSource::Keyword);
        assert_eq!(tasks[0].role, AgentRole::Recon);
    }

    #[tokio::test]
    async fn test_command_and_blank() {
        let d = decomposer(Arc::new(MockLlmClient::local()));
        let req = Request::command(AgentRole::Recon, json!("10.1.1.1"), OperationalMode::Assisted);
        let tasks = d.decompose(&req, &profile(HardwareTier::High)).await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].input["target"], "10.1.1.1");

        let blank = Request::text("   ", OperationalMode::Assisted);
        assert!(d.decompose(&blank, &profile(HardwareTier::High)).await.is_empty());
    }

    #[test]
    fn test_depth_and_cap() {
        let s = PlannerSettings::default();
        assert_eq!(s.depth_for(HardwareTier::Low), 1);
        assert_eq!(s.depth_for(HardwareTier::Balanced), 2);
        assert_eq!(s.depth_for(HardwareTier::High), 5);
        assert_eq!(s.task_cap(OperationalMode::Autopilot), 16);
        assert_eq!(s.task_cap(OperationalMode::Manual), 8);
    }

    #[test]
    fn test_parse_plan_rejects_garbage() {
        assert!(parse_plan("no json here").is_err());
        assert!(parse_plan("{\"tasks\": \"nope\"}").is_err());
        assert!(parse_plan("{\"tasks\": []}").unwrap().tasks.is_empty());
    }
}
