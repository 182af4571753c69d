//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PRATIGHAT__*` 覆盖
//! （双下划线表示嵌套，如 `PRATIGHAT__COORDINATOR__MAX_RETRIES=3`）。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::{AgentRole, Capability, OperationalMode};
use crate::hardware::HardwareTier;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub logging: LoggingSection,
    pub storage: StorageSection,
    pub hardware: HardwareSection,
    pub coordinator: CoordinatorSection,
    pub planner: PlannerSection,
    pub backends: BackendsSection,
    pub api: ApiSection,
}

/// 按档位取值的三元组（low / balanced / high）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierValues<T> {
    pub low: T,
    pub balanced: T,
    pub high: T,
}

impl<T> TierValues<T> {
    pub fn get(&self, tier: HardwareTier) -> &T {
        match tier {
            HardwareTier::Low => &self.low,
            HardwareTier::Balanced => &self.balanced,
            HardwareTier::High => &self.high,
        }
    }
}

/// [app] 段：运行模式与安全开关
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub operational_mode: OperationalMode,
    /// 开启时路由器对有害意图做安全改写
    pub safe_mode: bool,
    /// 开启时内置 Agent 的提示均带模拟模式头
    pub simulation_only: bool,
    /// 单次 Agent 调用超时（秒）
    pub tool_timeout: u64,
    /// 侦察深度上限（high 档位直接取该值）
    pub max_recursion_depth: u32,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            operational_mode: OperationalMode::Assisted,
            safe_mode: true,
            simulation_only: true,
            tool_timeout: 300,
            max_recursion_depth: 5,
        }
    }
}

/// [logging] 段
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

/// [storage] 段：结果存储后端与路径
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// sqlite / memory
    pub backend: String,
    pub sqlite_path: PathBuf,
    /// 预留：向量索引目录（当前不构建向量索引）
    pub vector_path: PathBuf,
    /// 传给 Agent 与规划器的最近结果条数
    pub context_window: usize,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            sqlite_path: PathBuf::from("pratighat.db"),
            vector_path: PathBuf::from("chroma_db"),
            context_window: 10,
        }
    }
}

/// [hardware] 段：档位阈值（可用内存，GB）与刷新间隔
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareSection {
    pub memory_floor_gb: f64,
    pub memory_ceiling_gb: f64,
    /// 任一温度传感器达到该值即视为过热
    pub thermal_limit_c: f32,
    pub refresh_interval_secs: u64,
}

impl Default for HardwareSection {
    fn default() -> Self {
        Self {
            memory_floor_gb: 4.0,
            memory_ceiling_gb: 16.0,
            thermal_limit_c: 85.0,
            refresh_interval_secs: 30,
        }
    }
}

/// [coordinator] 段：重试、退避与各档位并发上限
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSection {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub concurrency: TierValues<usize>,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            concurrency: TierValues {
                low: 1,
                balanced: 2,
                high: 4,
            },
        }
    }
}

/// [planner] 段：模型辅助分解
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerSection {
    pub model_assisted: bool,
    pub timeout_secs: u64,
    /// 单个请求最多分解出的任务数（autopilot 模式翻倍）
    pub max_tasks: usize,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            model_assisted: true,
            timeout_secs: 60,
            max_tasks: 8,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsSection {
    pub local: LocalBackendSection,
    pub remote: RemoteBackendSection,
}

/// [backends.local] 段：本地推理（Ollama HTTP）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalBackendSection {
    pub enabled: bool,
    pub base_url: String,
    pub models: TierValues<String>,
    pub capability: TierValues<Capability>,
    /// 可用性探测结果缓存时长（秒）
    pub probe_ttl_secs: u64,
}

impl Default for LocalBackendSection {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://127.0.0.1:11434".to_string(),
            models: TierValues {
                low: "llama3.2:3b".to_string(),
                balanced: "llama3.1:8b".to_string(),
                high: "llama3.1:70b".to_string(),
            },
            capability: TierValues {
                low: 1,
                balanced: 2,
                high: 3,
            },
            probe_ttl_secs: 30,
        }
    }
}

/// [backends.remote] 段：OpenAI 兼容远程后端，默认关闭
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteBackendSection {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub model: String,
    /// 存放 API Key 的环境变量名
    pub api_key_env: String,
    pub capability: Capability,
    /// 允许走远程的角色；空表示全部允许
    pub allowed_roles: Vec<AgentRole>,
}

impl Default for RemoteBackendSection {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            capability: 3,
            allowed_roles: Vec::new(),
        }
    }
}

impl RemoteBackendSection {
    pub fn permits(&self, role: &AgentRole) -> bool {
        self.allowed_roles.is_empty() || self.allowed_roles.contains(role)
    }
}

/// [api] 段：--api 模式监听地址
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub host: String,
    pub port: u16,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// 从 config 目录加载配置，环境变量 PRATIGHAT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（可覆盖前面的键）；显式指定的文件必须存在
/// 3. 最后叠加环境变量 PRATIGHAT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PRATIGHAT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 有效配置的 TOML 形式（shell `config` 命令）
pub fn render_config(cfg: &AppConfig) -> String {
    toml::to_string_pretty(cfg).unwrap_or_else(|e| format!("# failed to render config: {e}"))
}
