//! 单次运行上下文
//!
//! 每次调用构建一个 RunContext，显式传给所有组件：累计的修改记录、本轮缓冲的洞察都挂在这里，
//! 运行结束即丢弃，不存在跨运行泄漏，测试可以并行执行。RunEvent 描述触发本次运行的 issue / 评论。

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::memory::{load_conversation, Comment, InsightStore};

/// issue 正文上限（字符）
pub const MAX_ISSUE_BODY: usize = 100_000;

/// 一次成功的写入 / 补丁
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationRecord {
    /// Agent 视角的路径，如 `main/src/main/App.java`
    pub path: String,
    /// 所属沙箱根目录
    pub root: String,
    pub reason: String,
    pub is_new: bool,
}

/// 请求级运行上下文
pub struct RunContext {
    pub project_id: String,
    pub issue_number: u64,
    pub insights: InsightStore,
    mutations: Mutex<Vec<MutationRecord>>,
}

impl RunContext {
    pub fn new(project_id: impl Into<String>, issue_number: u64, insights: InsightStore) -> Self {
        Self {
            project_id: project_id.into(),
            issue_number,
            insights,
            mutations: Mutex::new(Vec::new()),
        }
    }

    pub fn record_mutation(&self, record: MutationRecord) {
        tracing::info!(path = %record.path, is_new = record.is_new, "mutation recorded");
        self.lock_mutations().push(record);
    }

    /// 当前累计的修改记录（按发生顺序）
    pub fn mutations(&self) -> Vec<MutationRecord> {
        self.lock_mutations().clone()
    }

    pub fn has_mutations(&self) -> bool {
        !self.lock_mutations().is_empty()
    }

    fn lock_mutations(&self) -> MutexGuard<'_, Vec<MutationRecord>> {
        self.mutations.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 追评：作者与内容
#[derive(Debug, Clone)]
pub struct IncomingComment {
    pub author: String,
    pub body: String,
}

/// 触发本次运行的事件：新 issue 或 issue 下的追评
#[derive(Debug, Clone, Default)]
pub struct RunEvent {
    pub title: String,
    pub body: String,
    pub labels: String,
    pub issue_number: u64,
    pub comment: Option<IncomingComment>,
    /// 既往对话（不含 issue 正文）
    pub conversation: Vec<Comment>,
    /// 外部预计算的线索（相关文件、URL 等），原样拼入提示词
    pub hints: Option<String>,
}

impl RunEvent {
    pub fn new_issue(title: impl Into<String>, body: impl Into<String>, issue_number: u64) -> Self {
        Self {
            title: title.into(),
            body: normalize_body(body.into()),
            issue_number,
            ..Self::default()
        }
    }

    pub fn with_comment(mut self, author: impl Into<String>, body: impl Into<String>) -> Self {
        let body = body.into();
        if !body.is_empty() {
            self.comment = Some(IncomingComment {
                author: author.into(),
                body,
            });
        }
        self
    }

    pub fn with_conversation(mut self, conversation: Vec<Comment>) -> Self {
        self.conversation = conversation;
        self
    }

    pub fn with_hints(mut self, hints: impl Into<String>) -> Self {
        let hints = hints.into();
        self.hints = (!hints.trim().is_empty()).then_some(hints);
        self
    }

    pub fn is_reply(&self) -> bool {
        self.comment.is_some()
    }

    /// 从环境变量构建事件：ISSUE_TITLE（必需）、ISSUE_BODY、ISSUE_LABELS、ISSUE_NUMBER、
    /// COMMENT_BODY、COMMENT_AUTHOR、CONVERSATION_FILE、TRIAGE_HINTS（提示文件路径）
    pub fn from_env() -> Result<Self, crate::core::AgentError> {
        let var = |key: &str| std::env::var(key).unwrap_or_default();
        let title = std::env::var("ISSUE_TITLE").map_err(|_| {
            crate::core::AgentError::ConfigError(
                "Missing required environment variable: ISSUE_TITLE".to_string(),
            )
        })?;
        let issue_number = var("ISSUE_NUMBER").trim().parse().unwrap_or(0);

        let mut event = Self::new_issue(title, var("ISSUE_BODY"), issue_number)
            .with_comment(var("COMMENT_AUTHOR"), var("COMMENT_BODY"));
        event.labels = var("ISSUE_LABELS");

        if event.is_reply() {
            let conversation_file = std::env::var("CONVERSATION_FILE")
                .unwrap_or_else(|_| "conversation.json".to_string());
            event.conversation = load_conversation(Path::new(&conversation_file));
        }

        if let Ok(hints_file) = std::env::var("TRIAGE_HINTS") {
            match std::fs::read_to_string(&hints_file) {
                Ok(hints) => event = event.with_hints(hints),
                Err(e) => tracing::warn!(file = %hints_file, error = %e, "failed to read hints"),
            }
        }
        Ok(event)
    }
}

fn normalize_body(body: String) -> String {
    if body.trim().is_empty() {
        return "(No description provided)".to_string();
    }
    match body.char_indices().nth(MAX_ISSUE_BODY) {
        Some((idx, _)) => format!("{}\n... (truncated)", &body[..idx]),
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> (tempfile::TempDir, RunContext) {
        let dir = tempfile::tempdir().unwrap();
        let store = InsightStore::new(dir.path(), "demo");
        (dir, RunContext::new("demo", 7, store))
    }

    #[test]
    fn test_mutations_accumulate_in_order() {
        let (_dir, ctx) = ctx();
        assert!(!ctx.has_mutations());
        for (path, is_new) in [("main/a.java", true), ("main/b.java", false)] {
            ctx.record_mutation(MutationRecord {
                path: path.to_string(),
                root: "main".to_string(),
                reason: "fix".to_string(),
                is_new,
            });
        }
        let records = ctx.mutations();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].path, "main/a.java");
        assert!(!records[1].is_new);
    }

    #[test]
    fn test_event_body_normalization() {
        let empty = RunEvent::new_issue("t", "   ", 1);
        assert_eq!(empty.body, "(No description provided)");

        let long = RunEvent::new_issue("t", "x".repeat(MAX_ISSUE_BODY + 10), 1);
        assert!(long.body.ends_with("... (truncated)"));
        assert!(!long.is_reply());
    }

    #[test]
    fn test_empty_comment_is_not_a_reply() {
        let event = RunEvent::new_issue("t", "b", 1).with_comment("alice", "");
        assert!(!event.is_reply());
        let reply = RunEvent::new_issue("t", "b", 1).with_comment("alice", "still broken?");
        assert!(reply.is_reply());
    }
}
