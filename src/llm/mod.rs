//! LLM 层：Agent 后端抽象与实现（OpenAI 兼容 / 脚本化 Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::{ScriptStep, ScriptedBackend, SessionRecord};
pub use openai::{ChatBackend, TokenUsage};
pub use traits::{
    ActivityEvent, AgentBackend, AgentSession, ExtendedSessionConfig, PermissionPolicy, SessionConfig,
    SessionMessage, DEFAULT_BUFFER_EXHAUSTION_THRESHOLD, DEFAULT_COMPACTION_THRESHOLD,
};
