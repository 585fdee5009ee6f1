//! 会话监管：创建、带双重超时的单轮提交、回复提取、保证销毁
//!
//! 每轮提交时三路并发、先完成者胜出（其余被取消）：
//! - 轮次本身（send_and_wait）
//! - 硬超时：绝对墙钟上限 → SessionTimeout
//! - 停滞看门狗：每 poll 间隔检查一次最近活动时间戳，空闲达到 stall 阈值 → SessionStall
//!
//! 活动监听器订阅会话事件，单调推进共享的最近活动时间戳；接收端随 send 返回一同丢弃（即退订）。

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;

use crate::core::AgentError;
use crate::llm::{
    ActivityEvent, AgentBackend, AgentSession, ExtendedSessionConfig, PermissionPolicy, SessionConfig,
    SessionMessage,
};
use crate::tools::ToolRegistry;

/// 无活动多久判定为停滞
pub const DEFAULT_STALL_TIMEOUT_SECS: u64 = 300;
/// 看门狗轮询间隔
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
/// 默认最短回复长度（字符）
pub const DEFAULT_MIN_RESPONSE_LEN: usize = 10;

/// 单轮参数
#[derive(Debug, Clone, Copy)]
pub struct TurnOptions {
    pub hard_timeout: Duration,
    pub min_response_len: usize,
}

impl TurnOptions {
    pub fn new(hard_timeout_secs: u64) -> Self {
        Self {
            hard_timeout: Duration::from_secs(hard_timeout_secs),
            min_response_len: DEFAULT_MIN_RESPONSE_LEN,
        }
    }

    pub fn min_len(mut self, min_response_len: usize) -> Self {
        self.min_response_len = min_response_len;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Active,
    Destroyed,
}

/// 创建会话时的差异部分；模型与长会话阈值由监管者统一提供
#[derive(Clone)]
pub struct SessionSpec {
    pub instructions: String,
    pub tools: ToolRegistry,
    /// 是否启用长会话模式（后台压缩 + 缓冲耗尽阈值）
    pub extended: bool,
}

impl SessionSpec {
    /// 无工具的短会话（分类用）
    pub fn classifier(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            tools: ToolRegistry::new(),
            extended: false,
        }
    }
}

/// 被监管的会话：由创建者独占，显式 destroy；若未销毁就被丢弃，Drop 中补做销毁
pub struct ManagedSession {
    inner: Arc<dyn AgentSession>,
    state: SessionState,
}

impl ManagedSession {
    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    async fn destroy_inner(&mut self) {
        if self.state == SessionState::Destroyed {
            return;
        }
        self.state = SessionState::Destroyed;
        match self.inner.destroy().await {
            Ok(()) => tracing::info!(session = %self.inner.id(), "session destroyed"),
            Err(e) => tracing::warn!(session = %self.inner.id(), error = %e, "session destroy failed"),
        }
    }
}

impl Drop for ManagedSession {
    fn drop(&mut self) {
        if self.state == SessionState::Destroyed {
            return;
        }
        self.state = SessionState::Destroyed;
        let inner = Arc::clone(&self.inner);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(session = %inner.id(), "session dropped without destroy, cleaning up");
                handle.spawn(async move {
                    if let Err(e) = inner.destroy().await {
                        tracing::warn!(session = %inner.id(), error = %e, "session destroy failed");
                    }
                });
            }
            Err(_) => tracing::error!(session = %inner.id(), "session leaked: no runtime to destroy it"),
        }
    }
}

/// 共享的活动状态：最近活动时间（相对 start 的毫秒数，只增不减）与事件计数
struct ActivityMonitor {
    start: Instant,
    last_activity_ms: AtomicU64,
    events: AtomicUsize,
}

impl ActivityMonitor {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            events: AtomicUsize::new(0),
        }
    }

    fn touch(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
        let now = self.start.elapsed().as_millis() as u64;
        self.last_activity_ms.fetch_max(now, Ordering::Relaxed);
    }

    fn idle(&self) -> Duration {
        let now = self.start.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_activity_ms.load(Ordering::Relaxed)))
    }

    fn events(&self) -> usize {
        self.events.load(Ordering::Relaxed)
    }

    /// 活动监听器：只推进时间戳，永不完成
    async fn listen(&self, mut rx: broadcast::Receiver<ActivityEvent>) -> Infallible {
        loop {
            match rx.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => self.touch(),
                Err(RecvError::Closed) => return std::future::pending().await,
            }
        }
    }

    /// 看门狗：返回停滞时长
    async fn watch(&self, stall: Duration, poll: Duration) -> Duration {
        let mut ticker = tokio::time::interval_at(self.start + poll, poll);
        loop {
            ticker.tick().await;
            let idle = self.idle();
            if idle >= stall {
                return idle;
            }
        }
    }
}

enum TurnEnd {
    Finished(Result<(), AgentError>),
    HardTimeout,
    Stalled(Duration),
}

/// 会话监管者
pub struct SessionSupervisor {
    backend: Arc<dyn AgentBackend>,
    model: String,
    extended: ExtendedSessionConfig,
    stall_timeout: Duration,
    poll_interval: Duration,
}

impl SessionSupervisor {
    pub fn new(backend: Arc<dyn AgentBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            extended: ExtendedSessionConfig::default(),
            stall_timeout: Duration::from_secs(DEFAULT_STALL_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }

    pub fn with_stall_policy(mut self, stall_timeout: Duration, poll_interval: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_extended(mut self, extended: ExtendedSessionConfig) -> Self {
        self.extended = extended;
        self
    }

    pub async fn create(&self, spec: SessionSpec) -> Result<ManagedSession, AgentError> {
        let config = SessionConfig {
            model: self.model.clone(),
            instructions: spec.instructions,
            tools: spec.tools,
            permission: PermissionPolicy::ApproveAll,
            extended: spec.extended.then_some(self.extended),
        };
        let inner = self.backend.create_session(config).await?;
        tracing::info!(session = %inner.id(), model = %self.model, extended = spec.extended, "session created");
        Ok(ManagedSession {
            inner,
            state: SessionState::Created,
        })
    }

    /// 提交一轮并提取最终回复
    pub async fn send(&self, session: &mut ManagedSession, prompt: &str, opts: TurnOptions) -> Result<String, AgentError> {
        if session.state == SessionState::Destroyed {
            return Err(AgentError::SessionDestroyed(session.id().to_string()));
        }
        session.state = SessionState::Active;

        let monitor = ActivityMonitor::new();
        let end = {
            let listener = monitor.listen(session.inner.subscribe());
            let watchdog = monitor.watch(self.stall_timeout, self.poll_interval);
            let turn = session.inner.send_and_wait(prompt);
            tokio::select! {
                result = turn => TurnEnd::Finished(result),
                _ = tokio::time::sleep(opts.hard_timeout) => TurnEnd::HardTimeout,
                idle = watchdog => TurnEnd::Stalled(idle),
                never = listener => match never {},
            }
        };
        let events = monitor.events();

        match end {
            TurnEnd::Finished(Ok(())) => {}
            TurnEnd::Finished(Err(e)) => {
                tracing::warn!(session = %session.id(), events, error = %e, "turn failed");
                return Err(e);
            }
            TurnEnd::HardTimeout => {
                tracing::warn!(session = %session.id(), events, "turn hit hard timeout");
                return Err(AgentError::SessionTimeout {
                    timeout_secs: opts.hard_timeout.as_secs(),
                    events,
                });
            }
            TurnEnd::Stalled(idle) => {
                tracing::warn!(session = %session.id(), events, idle_secs = idle.as_secs(), "turn stalled");
                return Err(AgentError::SessionStall {
                    idle_secs: idle.as_secs(),
                    events,
                });
            }
        }

        let messages = session.inner.messages().await?;
        tracing::debug!(session = %session.id(), messages = messages.len(), events, "turn finished");
        extract_reply(&messages, opts.min_response_len).ok_or(AgentError::EmptyOutput {
            messages: messages.len(),
        })
    }

    /// 销毁会话（幂等）
    pub async fn destroy(&self, mut session: ManagedSession) {
        session.destroy_inner().await;
    }

    /// 一次性短会话：创建 → 单轮 → 无论成败都销毁
    pub async fn run_once(&self, spec: SessionSpec, prompt: &str, opts: TurnOptions) -> Result<String, AgentError> {
        let mut session = self.create(spec).await?;
        let result = self.send(&mut session, prompt, opts).await;
        self.destroy(session).await;
        result
    }
}

/// 按顺序回退提取最终回复：先从新到旧找结构化助手消息，再找 role 为 assistant 的消息；
/// 第一个长度达到 `min_len` 的候选胜出
pub fn extract_reply(messages: &[SessionMessage], min_len: usize) -> Option<String> {
    let structured = messages.iter().rev().filter_map(|m| match m {
        SessionMessage::AssistantMessage { content } => Some(extract_text(content)),
        _ => None,
    });
    let role_tagged = messages.iter().rev().filter_map(|m| match m {
        SessionMessage::RoleTagged { role, content } if role.trim().eq_ignore_ascii_case("assistant") => {
            Some(extract_text(content))
        }
        _ => None,
    });
    structured
        .chain(role_tagged)
        .find(|text| !text.is_empty() && text.chars().count() >= min_len)
}

const TEXT_KEYS: [&str; 8] = [
    "content",
    "text",
    "value",
    "delta_content",
    "message",
    "output_text",
    "parts",
    "items",
];

/// 从任意 JSON 形状中取出文本
pub fn extract_text(value: &Value) -> String {
    raw_text(value).trim().to_string()
}

/// 分片原样拼接，片段之间的空白保留，只在最外层 trim
fn raw_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(items) => items.iter().map(raw_text).collect(),
        Value::Object(map) => TEXT_KEYS
            .iter()
            .filter_map(|key| map.get(*key))
            .map(raw_text)
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}
