//! OpenAI 兼容 Chat Completions 后端
//!
//! 通过 reqwest 直接调用 `{base_url}/chat/completions`（function calling）。一次 send_and_wait 内循环：
//! 请求 → 执行模型返回的工具调用 → 把结果追加为 tool 消息 → 再请求，直到模型不再调用工具。
//! 长会话模式下按 prompt_tokens / context_window 判断占用：超过压缩阈值时把较早的历史总结成一条消息，
//! 超过缓冲耗尽阈值时直接报错。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};

use crate::core::AgentError;
use crate::llm::traits::{
    ActivityEvent, AgentBackend, AgentSession, ExtendedSessionConfig, SessionConfig, SessionMessage,
};
use crate::tools::{ToolExecutor, ERROR_PREFIX};

/// 压缩后保留的最近消息条数（下限）
const KEEP_RECENT_MESSAGES: usize = 8;
/// 总结请求中每条旧消息保留的字符数
const SUMMARY_SNIPPET_CHARS: usize = 2_000;
const EVENT_CHANNEL_CAPACITY: usize = 256;
/// 上一轮被取消时，补给未答复工具调用的结果
const CANCELLED_TOOL_RESULT: &str = "Error: turn cancelled";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
    }

    /// (prompt, completion, total)
    pub fn get(&self) -> (u64, u64, u64) {
        let prompt = self.prompt_tokens.load(Ordering::Relaxed);
        let completion = self.completion_tokens.load(Ordering::Relaxed);
        (prompt, completion, prompt + completion)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn tool_result(call_id: &str, content: String) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: Some(call_id.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunction,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [Value],
}

fn no_tools(tools: &&[Value]) -> bool {
    tools.is_empty()
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// HTTP 连接参数，由后端与所有会话共享
struct Endpoint {
    client: Client,
    base_url: String,
    api_key: String,
    usage: TokenUsage,
}

impl Endpoint {
    async fn complete(&self, model: &str, messages: &[ChatMessage], tools: &[Value]) -> Result<(ChatMessage, u64), AgentError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let request = ChatRequest { model, messages, tools };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::Backend(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(AgentError::Backend(format!("HTTP {}: {}", status, body)));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| AgentError::Backend(format!("invalid response: {}", e)))?;
        let prompt_tokens = parsed.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0);
        if let Some(usage) = &parsed.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }
        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| AgentError::Backend("no choices in response".to_string()))?;
        Ok((message, prompt_tokens))
    }
}

/// OpenAI 兼容后端
pub struct ChatBackend {
    endpoint: Arc<Endpoint>,
    context_window_tokens: u64,
    max_tool_rounds: usize,
    tool_timeout_secs: u64,
}

impl ChatBackend {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            endpoint: Arc::new(Endpoint {
                client,
                base_url: base_url.to_string(),
                api_key,
                usage: TokenUsage::default(),
            }),
            context_window_tokens: 200_000,
            max_tool_rounds: 200,
            tool_timeout_secs: 60,
        }
    }

    pub fn with_context_window(mut self, tokens: u64) -> Self {
        self.context_window_tokens = tokens.max(1);
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn with_tool_timeout(mut self, secs: u64) -> Self {
        self.tool_timeout_secs = secs;
        self
    }

    /// (prompt, completion, total)，跨所有会话累计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.endpoint.usage.get()
    }
}

#[async_trait]
impl AgentBackend for ChatBackend {
    async fn create_session(&self, config: SessionConfig) -> Result<Arc<dyn AgentSession>, AgentError> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let session = ChatSession {
            id: uuid::Uuid::new_v4().to_string(),
            endpoint: Arc::clone(&self.endpoint),
            model: config.model,
            tool_specs: config.tools.to_function_specs(),
            executor: ToolExecutor::new(config.tools, self.tool_timeout_secs),
            extended: config.extended,
            context_window_tokens: self.context_window_tokens,
            max_tool_rounds: self.max_tool_rounds,
            history: Mutex::new(vec![ChatMessage::text("system", config.instructions)]),
            events,
        };
        tracing::info!(
            session = %session.id,
            tools = session.tool_specs.len(),
            permission = ?config.permission,
            "chat session created"
        );
        Ok(Arc::new(session))
    }
}

struct ChatSession {
    id: String,
    endpoint: Arc<Endpoint>,
    model: String,
    tool_specs: Vec<Value>,
    executor: ToolExecutor,
    extended: Option<ExtendedSessionConfig>,
    context_window_tokens: u64,
    max_tool_rounds: usize,
    history: Mutex<Vec<ChatMessage>>,
    events: broadcast::Sender<ActivityEvent>,
}

impl ChatSession {
    fn emit(&self, event: ActivityEvent) {
        let _ = self.events.send(event);
    }

    async fn run_tool(&self, call: &WireToolCall) -> String {
        let args: Value = if call.function.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(&call.function.arguments) {
                Ok(v) => v,
                Err(e) => return format!("{}Invalid JSON arguments: {}", ERROR_PREFIX, e),
            }
        };
        self.emit(ActivityEvent::ToolInvoked {
            name: call.function.name.clone(),
        });
        let result = self.executor.invoke(&call.function.name, args).await;
        self.emit(ActivityEvent::ToolCompleted {
            name: call.function.name.clone(),
            ok: !result.starts_with(ERROR_PREFIX),
        });
        result
    }

    /// 占用检查：超过耗尽阈值报错，超过压缩阈值则压缩
    async fn manage_context(&self, history: &mut Vec<ChatMessage>, prompt_tokens: u64) -> Result<(), AgentError> {
        let Some(extended) = self.extended else {
            return Ok(());
        };
        let ratio = prompt_tokens as f32 / self.context_window_tokens as f32;
        if ratio >= extended.buffer_exhaustion_threshold {
            self.emit(ActivityEvent::BufferExhausted {
                used_tokens: prompt_tokens,
                capacity: self.context_window_tokens,
            });
            return Err(AgentError::Backend(format!(
                "context buffer exhausted ({} of {} tokens)",
                prompt_tokens, self.context_window_tokens
            )));
        }
        if ratio < extended.compaction_threshold {
            return Ok(());
        }
        let Some(split) = compaction_split(history, KEEP_RECENT_MESSAGES) else {
            return Ok(());
        };

        let transcript = render_transcript(&history[1..split]);
        let request = [
            ChatMessage::text(
                "system",
                "Summarize the conversation below for your own later use. Keep file paths, findings, decisions, and pending work. Be concise.",
            ),
            ChatMessage::text("user", transcript),
        ];
        let (summary, _) = self.endpoint.complete(&self.model, &request, &[]).await?;
        let summary = summary.content.unwrap_or_default();

        history.drain(1..split);
        history.insert(
            1,
            ChatMessage::text("user", format!("Summary of earlier conversation (compacted):\n{}", summary)),
        );
        tracing::info!(session = %self.id, prompt_tokens, messages = history.len(), "context compacted");
        self.emit(ActivityEvent::Compacted {
            before_tokens: prompt_tokens,
            after_messages: history.len(),
        });
        Ok(())
    }
}

#[async_trait]
impl AgentSession for ChatSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn subscribe(&self) -> broadcast::Receiver<ActivityEvent> {
        self.events.subscribe()
    }

    async fn send_and_wait(&self, prompt: &str) -> Result<(), AgentError> {
        let mut history = self.history.lock().await;
        let closed = close_dangling_tool_calls(&mut history);
        if closed > 0 {
            tracing::warn!(session = %self.id, closed, "previous turn was cancelled mid tool call");
        }
        history.push(ChatMessage::text("user", prompt));
        self.emit(ActivityEvent::TurnStarted);

        for round in 0..self.max_tool_rounds {
            let (message, prompt_tokens) = self
                .endpoint
                .complete(&self.model, &history, &self.tool_specs)
                .await?;

            if let Some(content) = message.content.as_deref().filter(|c| !c.is_empty()) {
                self.emit(ActivityEvent::PartialOutput {
                    chars: content.chars().count(),
                });
            }
            let calls = message.tool_calls.clone().unwrap_or_default();
            history.push(message);

            if calls.is_empty() {
                self.emit(ActivityEvent::TurnCompleted);
                return Ok(());
            }
            tracing::debug!(session = %self.id, round, calls = calls.len(), "tool round");
            for call in &calls {
                let result = self.run_tool(call).await;
                history.push(ChatMessage::tool_result(&call.id, result));
            }
            self.manage_context(&mut history, prompt_tokens).await?;
        }
        Err(AgentError::Backend(format!(
            "turn exceeded {} tool rounds",
            self.max_tool_rounds
        )))
    }

    async fn messages(&self) -> Result<Vec<SessionMessage>, AgentError> {
        let history = self.history.lock().await;
        Ok(history
            .iter()
            .map(|m| match (m.role.as_str(), &m.content) {
                ("assistant", Some(text)) => SessionMessage::assistant(text.clone()),
                (role, Some(text)) => SessionMessage::role(role, text.clone()),
                (role, None) => SessionMessage::Unknown {
                    kind: format!("{}:tool_calls", role),
                },
            })
            .collect())
    }

    async fn destroy(&self) -> Result<(), AgentError> {
        let (prompt, completion, _) = self.endpoint.usage.get();
        tracing::info!(session = %self.id, prompt, completion, "chat session destroyed");
        self.history.lock().await.clear();
        Ok(())
    }
}

/// 为最后一条带 tool_calls 的助手消息补齐缺失的 tool 结果，返回补齐的条数。
/// 轮次在工具执行期间被取消时，历史会停在未答复的调用上，端点会拒绝之后的请求
fn close_dangling_tool_calls(history: &mut Vec<ChatMessage>) -> usize {
    let Some(index) = history.iter().rposition(|m| m.role == "assistant") else {
        return 0;
    };
    let Some(calls) = history[index].tool_calls.clone() else {
        return 0;
    };
    let answered: Vec<String> = history[index + 1..]
        .iter()
        .filter_map(|m| m.tool_call_id.clone())
        .collect();
    let missing: Vec<ChatMessage> = calls
        .iter()
        .filter(|c| !answered.contains(&c.id))
        .map(|c| ChatMessage::tool_result(&c.id, CANCELLED_TOOL_RESULT.to_string()))
        .collect();
    let closed = missing.len();
    history.extend(missing);
    closed
}

/// 压缩切分点：`history[1..split]` 被总结，`history[split..]` 保留。
/// 保留段不能以 tool 消息开头（它必须紧跟带 tool_calls 的助手消息）
fn compaction_split(history: &[ChatMessage], keep_recent: usize) -> Option<usize> {
    let latest = history.len().checked_sub(keep_recent)?;
    (2..=latest).rev().find(|&i| history[i].role != "tool")
}

fn render_transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let mut text: String = m.content.as_deref().unwrap_or("").chars().take(SUMMARY_SNIPPET_CHARS).collect();
            if let Some(calls) = &m.tool_calls {
                let names: Vec<&str> = calls.iter().map(|c| c.function.name.as_str()).collect();
                text.push_str(&format!(" [called: {}]", names.join(", ")));
            }
            format!("{}: {}", m.role, text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
