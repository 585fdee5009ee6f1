//! 错误类型
//!
//! - SandboxError：沙箱工具层错误，序列化为 `Error: ...` 文本返回给 Agent，不上抛到编排器
//! - AgentError：会话 / 阶段级错误，由 PhaseOrchestrator 决定重试（阶段 1）或记录后忽略（阶段 2、3）

use thiserror::Error;

/// 沙箱内读 / 列 / 写 / 补丁操作的失败原因
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Path must start with one of {roots} and stay within it. Got: {path}")]
    PathOutOfBounds { path: String, roots: String },

    #[error("Cannot access {path}: '{segment}/' is a build output directory")]
    RestrictedDirectory { path: String, segment: String },

    #[error("Cannot write {ext} files. Allowed: {allowed}")]
    WrongExtension { ext: String, allowed: String },

    #[error("Can only modify files under {prefixes} in '{root}'. Got: {relative}")]
    NotWritable {
        root: String,
        relative: String,
        prefixes: String,
    },

    #[error("Cannot modify build file: {0}")]
    BlockedFile(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("File already exists: {0}. Use patch_codebase_file to edit existing files.")]
    AlreadyExists(String),

    #[error("old_text matches {count} locations in {path}. Include more surrounding context lines to make the match unique.")]
    AmbiguousMatch { path: String, count: usize },

    #[error("old_text not found in {0}. It must match exactly, including whitespace and indentation. Read the file first to get the exact text.")]
    PatchNotFound(String),

    #[error("old_text must not be empty")]
    EmptyPattern,

    #[error("Content too large ({size} chars). Max: {max}")]
    SizeExceeded { size: usize, max: usize },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl SandboxError {
    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// 会话监管与阶段编排过程中的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Session timed out after {timeout_secs}s (events: {events})")]
    SessionTimeout { timeout_secs: u64, events: usize },

    #[error("Session stalled: no events for {idle_secs}s (events received: {events})")]
    SessionStall { idle_secs: u64, events: usize },

    #[error("Empty output (messages: {messages})")]
    EmptyOutput { messages: usize },

    #[error("Session already destroyed: {0}")]
    SessionDestroyed(String),

    #[error("Agent backend error: {0}")]
    Backend(String),

    /// 分类调用失败：调用方总会回退到保守默认值
    #[error("Classification failed: {0}")]
    ClassificationFailure(String),

    #[error("Phase '{phase}' failed: {source}")]
    PhaseFailure {
        phase: &'static str,
        #[source]
        source: Box<AgentError>,
    },

    #[error("Config error: {0}")]
    ConfigError(String),

}
