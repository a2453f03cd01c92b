//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `APIDESK__*` 覆盖（双下划线表示嵌套，如 `APIDESK__AGENT__MAX_TURNS=20`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::react::{DEFAULT_MAX_TURNS, FALLBACK_MIN_CONTENT_CHARS};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
    pub store: StoreSection,
}

/// [app] 段：应用名、数据目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 数据目录，未设置时用 ./data
    pub data_dir: Option<PathBuf>,
}

impl AppSection {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("data"))
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    120
}

/// [agent] 段：循环轮数、历史条数、回退阈值、工具筛选、单运行约束
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// 拼入 transcript 的历史消息条数
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// 回复短于此字符数且未调用工具时触发全量回退
    #[serde(default = "default_fallback_min_content_chars")]
    pub fallback_min_content_chars: usize,
    #[serde(default = "default_true")]
    pub tool_selection: bool,
    /// 工具数不超过此值时不做筛选
    #[serde(default = "default_tool_selection_min_tools")]
    pub tool_selection_min_tools: usize,
    /// 整个进程只跟踪一个运行
    #[serde(default = "default_true")]
    pub single_flight: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            history_limit: default_history_limit(),
            fallback_min_content_chars: default_fallback_min_content_chars(),
            tool_selection: true,
            tool_selection_min_tools: default_tool_selection_min_tools(),
            single_flight: true,
        }
    }
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}

fn default_history_limit() -> usize {
    10
}

fn default_fallback_min_content_chars() -> usize {
    FALLBACK_MIN_CONTENT_CHARS
}

fn default_tool_selection_min_tools() -> usize {
    4
}

fn default_true() -> bool {
    true
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒），未设置时不限时
    pub tool_timeout_secs: Option<u64>,
}

/// 消息存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

/// [store] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoreSection {
    #[serde(default)]
    pub backend: StoreBackend,
    /// SQLite 文件路径，未设置时用 <data_dir>/messages.db
    pub path: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量 APIDESK__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 APIDESK__*（双下划线表示嵌套键）
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

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("APIDESK")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
