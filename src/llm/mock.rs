//! 脚本化 Agent 后端（用于测试，无需 API）
//!
//! 所有会话共享一个按顺序消费的「轮次」队列：每次 send_and_wait 取出队首的一组步骤依次执行，
//! 可以回复、调用真实工具、发出活动事件、睡眠或永久挂起。后端记录创建 / 销毁次数与每个会话的工具集，
//! 便于断言能力门控与资源释放。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::core::AgentError;
use crate::llm::traits::{ActivityEvent, AgentBackend, AgentSession, SessionConfig, SessionMessage};
use crate::tools::ToolExecutor;

/// 一轮中的单个步骤
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// 追加一条助手回复
    Reply(String),
    /// 通过会话工具集调用工具，结果作为 tool 消息追加
    CallTool { name: String, args: Value },
    /// 只发出一个活动事件
    Activity,
    Sleep(Duration),
    /// 永不返回（模拟挂起的 Agent）
    Hang,
    Fail(String),
    /// 原样追加一条消息
    Message(SessionMessage),
}

impl ScriptStep {
    pub fn reply(text: impl Into<String>) -> Self {
        Self::Reply(text.into())
    }

    pub fn call(name: impl Into<String>, args: Value) -> Self {
        Self::CallTool {
            name: name.into(),
            args,
        }
    }
}

/// 每个被创建会话的快照
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub instructions: String,
    pub tools: Vec<String>,
}

#[derive(Default)]
struct ScriptState {
    turns: Mutex<VecDeque<Vec<ScriptStep>>>,
    sessions: Mutex<Vec<SessionRecord>>,
    prompts: Mutex<Vec<String>>,
    tool_results: Mutex<Vec<(String, String)>>,
    failing_creates: AtomicUsize,
    created: AtomicUsize,
    destroyed: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// 脚本化后端，克隆后共享同一份状态
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<ScriptState>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一轮
    pub fn push_turn(&self, steps: Vec<ScriptStep>) -> &Self {
        lock(&self.state.turns).push_back(steps);
        self
    }

    /// 追加只含一条回复的一轮
    pub fn push_reply(&self, text: impl Into<String>) -> &Self {
        self.push_turn(vec![ScriptStep::reply(text)])
    }

    /// 接下来 n 次 create_session 失败
    pub fn fail_next_creates(&self, n: usize) {
        self.state.failing_creates.store(n, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.state.destroyed.load(Ordering::SeqCst)
    }

    pub fn remaining_turns(&self) -> usize {
        lock(&self.state.turns).len()
    }

    pub fn sessions(&self) -> Vec<SessionRecord> {
        lock(&self.state.sessions).clone()
    }

    /// 所有已提交的 prompt（按顺序）
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.state.prompts).clone()
    }

    /// (工具名, 返回文本)
    pub fn tool_results(&self) -> Vec<(String, String)> {
        lock(&self.state.tool_results).clone()
    }
}

#[async_trait]
impl AgentBackend for ScriptedBackend {
    async fn create_session(&self, config: SessionConfig) -> Result<Arc<dyn AgentSession>, AgentError> {
        let failing = self.state.failing_creates.load(Ordering::SeqCst);
        if failing > 0 {
            self.state.failing_creates.store(failing - 1, Ordering::SeqCst);
            return Err(AgentError::Backend("scripted create failure".to_string()));
        }

        let n = self.state.created.fetch_add(1, Ordering::SeqCst);
        let id = format!("scripted-{}", n);
        lock(&self.state.sessions).push(SessionRecord {
            id: id.clone(),
            instructions: config.instructions.clone(),
            tools: config.tools.tool_names(),
        });
        let (events, _) = broadcast::channel(64);
        Ok(Arc::new(ScriptedSession {
            id,
            state: Arc::clone(&self.state),
            executor: ToolExecutor::new(config.tools, 30),
            messages: Mutex::new(Vec::new()),
            events,
        }))
    }
}

struct ScriptedSession {
    id: String,
    state: Arc<ScriptState>,
    executor: ToolExecutor,
    messages: Mutex<Vec<SessionMessage>>,
    events: broadcast::Sender<ActivityEvent>,
}

impl ScriptedSession {
    fn emit(&self, event: ActivityEvent) {
        let _ = self.events.send(event);
    }

    fn push(&self, message: SessionMessage) {
        lock(&self.messages).push(message);
    }
}

#[async_trait]
impl AgentSession for ScriptedSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn subscribe(&self) -> broadcast::Receiver<ActivityEvent> {
        self.events.subscribe()
    }

    async fn send_and_wait(&self, prompt: &str) -> Result<(), AgentError> {
        lock(&self.state.prompts).push(prompt.to_string());
        self.push(SessionMessage::role("user", prompt));
        let steps = lock(&self.state.turns)
            .pop_front()
            .ok_or_else(|| AgentError::Backend("script exhausted".to_string()))?;
        self.emit(ActivityEvent::TurnStarted);

        for step in steps {
            match step {
                ScriptStep::Reply(text) => {
                    self.emit(ActivityEvent::PartialOutput {
                        chars: text.chars().count(),
                    });
                    self.push(SessionMessage::assistant(text));
                }
                ScriptStep::CallTool { name, args } => {
                    self.emit(ActivityEvent::ToolInvoked { name: name.clone() });
                    let result = self.executor.invoke(&name, args).await;
                    lock(&self.state.tool_results).push((name.clone(), result.clone()));
                    self.push(SessionMessage::role("tool", result));
                    self.emit(ActivityEvent::ToolCompleted { name, ok: true });
                }
                ScriptStep::Activity => self.emit(ActivityEvent::PartialOutput { chars: 0 }),
                ScriptStep::Sleep(d) => tokio::time::sleep(d).await,
                ScriptStep::Hang => std::future::pending::<()>().await,
                ScriptStep::Fail(reason) => return Err(AgentError::Backend(reason)),
                ScriptStep::Message(message) => self.push(message),
            }
        }
        self.emit(ActivityEvent::TurnCompleted);
        Ok(())
    }

    async fn messages(&self) -> Result<Vec<SessionMessage>, AgentError> {
        Ok(lock(&self.messages).clone())
    }

    async fn destroy(&self) -> Result<(), AgentError> {
        self.state.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
