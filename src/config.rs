//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE__*` 覆盖（双下划线表示嵌套，如 `BEE__AGENT__MODEL=gpt-4o`）。
//! 所有字段都有默认值，缺少配置文件时也能运行。

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::llm::{DEFAULT_BUFFER_EXHAUSTION_THRESHOLD, DEFAULT_COMPACTION_THRESHOLD};
use crate::tools::SandboxRoot;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub timeouts: TimeoutsSection,
    pub sandbox: SandboxSection,
    pub insights: InsightsSection,
    pub output: OutputSection,
}

/// [agent] 段：模型与 OpenAI 兼容端点
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub model: String,
    pub base_url: String,
    /// 未设置时回退到 OPENAI_API_KEY
    pub api_key: Option<String>,
    pub context_window_tokens: u64,
    pub compaction_threshold: f32,
    pub buffer_exhaustion_threshold: f32,
    /// 单轮内最多的工具往返次数
    pub max_tool_rounds: usize,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            context_window_tokens: 128_000,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
            buffer_exhaustion_threshold: DEFAULT_BUFFER_EXHAUSTION_THRESHOLD,
            max_tool_rounds: 200,
            tool_timeout_secs: 60,
        }
    }
}

impl AgentSection {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }
}

/// [timeouts] 段（秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutsSection {
    pub generation: u64,
    pub review: u64,
    pub insight: u64,
    pub classify: u64,
    pub stall: u64,
    pub poll: u64,
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            generation: 3600,
            review: 600,
            insight: 180,
            classify: 30,
            stall: 300,
            poll: 30,
        }
    }
}

/// [sandbox] 段：沙箱根目录与限制
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub roots: Vec<SandboxRoot>,
    pub blocked_filenames: Vec<String>,
    pub restricted_dirs: Vec<String>,
    pub max_file_size: usize,
    pub max_list_entries: usize,
    pub max_search_results: usize,
    pub max_diff_size: usize,
    /// 工作笔记目录，每次运行开始时清空
    pub working_dir: PathBuf,
}

const WRITABLE_EXTENSIONS: [&str; 5] = [".java", ".yml", ".yaml", ".rs", ".json"];

/// 默认三个根：项目（main）、共享框架（foundation）、只读技能库（ai-support）
pub fn default_roots() -> Vec<SandboxRoot> {
    vec![
        SandboxRoot::new("main", "main").writable(&["src/main/"], &WRITABLE_EXTENSIONS),
        SandboxRoot::new("foundation", "foundation").writable(
            &[
                "foundation-bukkit/src/main/",
                "foundation-core/src/main/",
                "foundation-bungee/src/main/",
                "foundation-velocity/src/main/",
            ],
            &WRITABLE_EXTENSIONS,
        ),
        SandboxRoot::new("ai-support", "ai-support"),
    ]
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            blocked_filenames: vec!["pom.xml".to_string(), "build.xml".to_string()],
            restricted_dirs: vec!["target".to_string()],
            max_file_size: crate::tools::MAX_FILE_SIZE,
            max_list_entries: crate::tools::MAX_LIST_ENTRIES,
            max_search_results: crate::tools::MAX_SEARCH_RESULTS,
            max_diff_size: crate::tools::MAX_DIFF_SIZE,
            working_dir: PathBuf::from("working"),
        }
    }
}

impl SandboxSection {
    /// 可修改根目录的路径（用于合并 diff）
    pub fn mutable_root_paths(&self) -> Vec<PathBuf> {
        self.roots.iter().filter(|r| r.is_mutable()).map(|r| r.path.clone()).collect()
    }
}

/// [insights] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InsightsSection {
    pub dir: PathBuf,
    pub max_insights: usize,
    pub expiry_days: i64,
}

impl Default for InsightsSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("ai-support/insights"),
            max_insights: crate::memory::insights::MAX_INSIGHTS,
            expiry_days: crate::memory::insights::INSIGHT_EXPIRY_DAYS,
        }
    }
}

/// [output] 段：产物目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub dir: PathBuf,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self { dir: PathBuf::from(".") }
    }
}

/// 从 config 目录加载配置，环境变量 BEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignoring");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
