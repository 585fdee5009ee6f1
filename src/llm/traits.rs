//! Agent 后端抽象
//!
//! 后端（OpenAI 兼容 / Mock）实现 AgentBackend 创建会话；会话实现 AgentSession：
//! 订阅活动事件、提交一轮并等待完成、取回消息历史、销毁。超时与停滞检测由 SessionSupervisor 负责。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::core::AgentError;
use crate::tools::ToolRegistry;

/// 压缩阈值默认值（上下文占用比例）
pub const DEFAULT_COMPACTION_THRESHOLD: f32 = 0.80;
/// 缓冲耗尽阈值默认值
pub const DEFAULT_BUFFER_EXHAUSTION_THRESHOLD: f32 = 0.95;

/// 会话活动事件：任何一个都表示 Agent 仍在工作
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEvent {
    TurnStarted,
    ToolInvoked { name: String },
    ToolCompleted { name: String, ok: bool },
    PartialOutput { chars: usize },
    Compacted { before_tokens: u64, after_messages: usize },
    BufferExhausted { used_tokens: u64, capacity: u64 },
    TurnCompleted,
}

/// 会话历史中的一条消息
#[derive(Debug, Clone, PartialEq)]
pub enum SessionMessage {
    /// 结构化的助手消息事件，正文嵌在 content 中
    AssistantMessage { content: Value },
    /// 带 role 标签的普通消息
    RoleTagged { role: String, content: Value },
    Unknown { kind: String },
}

impl SessionMessage {
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::AssistantMessage {
            content: serde_json::json!({ "content": text.into() }),
        }
    }

    pub fn role(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self::RoleTagged {
            role: role.into(),
            content: Value::String(text.into()),
        }
    }
}

/// 工具调用的权限策略；无人值守运行，工具调用一律放行，能力边界由工具集本身决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionPolicy {
    ApproveAll,
}

/// 长会话模式：占用达到 compaction_threshold 时压缩旧历史，达到 buffer_exhaustion_threshold 时报错
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtendedSessionConfig {
    pub compaction_threshold: f32,
    pub buffer_exhaustion_threshold: f32,
}

impl Default for ExtendedSessionConfig {
    fn default() -> Self {
        Self {
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
            buffer_exhaustion_threshold: DEFAULT_BUFFER_EXHAUSTION_THRESHOLD,
        }
    }
}

/// 创建会话所需的全部参数
#[derive(Clone)]
pub struct SessionConfig {
    pub model: String,
    pub instructions: String,
    pub tools: ToolRegistry,
    pub permission: PermissionPolicy,
    pub extended: Option<ExtendedSessionConfig>,
}

#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn create_session(&self, config: SessionConfig) -> Result<Arc<dyn AgentSession>, AgentError>;
}

#[async_trait]
pub trait AgentSession: Send + Sync {
    fn id(&self) -> &str;

    /// 订阅活动事件；接收端被丢弃即退订
    fn subscribe(&self) -> broadcast::Receiver<ActivityEvent>;

    /// 提交一轮并等待 Agent 完成（含其间的全部工具调用）；future 被丢弃即取消该轮
    async fn send_and_wait(&self, prompt: &str) -> Result<(), AgentError>;

    /// 完整消息历史（按时间顺序）
    async fn messages(&self) -> Result<Vec<SessionMessage>, AgentError>;

    async fn destroy(&self) -> Result<(), AgentError>;
}
