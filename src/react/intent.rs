//! 意图分类：追评是否值得回复、讨论串当前是否要求实现
//!
//! 两个分类都是独立的无工具短会话，失败时回退到保守默认值（回复 / 仅回答），从不阻断主流程。
//! 明显无实质内容的追评（感谢、确认等）由正则预过滤，直接跳过分类。

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::session_supervisor::{SessionSpec, SessionSupervisor, TurnOptions};
use crate::core::{AgentError, RunEvent};
use crate::memory::{conversation_snippet, tagged_conversation, Comment};
use crate::react::prompts;

/// 预过滤的长度上限（字符）
const TRIVIAL_REPLY_MAX_LEN: usize = 80;

fn trivial_reply_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)^(thanks?|thx|ty|thank\s?you|perfect|awesome|great|nice|neat|works?\s*(now|fine|perfectly|great)?|solved|fixed|got\s*it|cheers|appreciate\s*it|np|cool|ok|okay|noted|understood|amazing|brilliant|this\s*(works?|helped|fixed\s*it)|you'?re\s*(the\s*best|awesome|amazing)|love\s*it|10/10|yep|yup|done|all\s*good|no\s*(more\s*)?issues?)[.!]*$",
        )
        .expect("trivial reply pattern is valid")
    })
}

/// 简短的致谢 / 确认：不含问号、长度受限且匹配常见短语
pub fn is_trivial_reply(text: &str) -> bool {
    let short = text.trim();
    short.chars().count() < TRIVIAL_REPLY_MAX_LEN && !short.contains('?') && trivial_reply_pattern().is_match(short)
}

/// 讨论串当前的实现意图
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplementationIntent {
    Implement,
    Declined,
    AnswerOnly,
}

impl ImplementationIntent {
    /// 解析分类器输出（只看开头的关键词），无法识别时为 AnswerOnly
    pub fn parse(answer: &str) -> Self {
        let answer = answer.trim().to_ascii_uppercase();
        if answer.starts_with("IMPLEMENT") {
            Self::Implement
        } else if answer.starts_with("DECLINED") {
            Self::Declined
        } else {
            Self::AnswerOnly
        }
    }
}

fn parse_yes_no(answer: &str) -> bool {
    answer.trim().to_ascii_uppercase().starts_with("YES")
}

/// 意图分类器
pub struct IntentClassifier {
    supervisor: Arc<SessionSupervisor>,
    timeout_secs: u64,
}

impl IntentClassifier {
    pub fn new(supervisor: Arc<SessionSupervisor>, timeout_secs: u64) -> Self {
        Self {
            supervisor,
            timeout_secs,
        }
    }

    async fn classify(&self, instructions: &str, prompt: &str) -> Result<String, AgentError> {
        self.supervisor
            .run_once(
                SessionSpec::classifier(instructions),
                prompt,
                TurnOptions::new(self.timeout_secs).min_len(1),
            )
            .await
            .map_err(|e| AgentError::ClassificationFailure(e.to_string()))
    }

    /// 追评是否需要回复；失败时默认回复
    pub async fn should_respond(&self, event: &RunEvent) -> bool {
        let Some(comment) = &event.comment else {
            return true;
        };
        let prompt = prompts::reply_worthiness_prompt(
            &event.title,
            &comment.author,
            &conversation_snippet(&event.conversation),
            &comment.body,
        );
        match self.classify(prompts::CLASSIFY_REPLY_INSTRUCTIONS, &prompt).await {
            Ok(answer) => {
                let respond = parse_yes_no(&answer);
                tracing::info!(answer = %answer.trim(), respond, "reply-worthiness classified");
                respond
            }
            Err(e) => {
                tracing::warn!(error = %e, "reply-worthiness classification failed, defaulting to respond");
                true
            }
        }
    }

    /// 实现意图；没有对话或失败时为 AnswerOnly
    pub async fn classify_implementation(&self, title: &str, issue_body: &str, conversation: &[Comment]) -> ImplementationIntent {
        if conversation.is_empty() {
            return ImplementationIntent::AnswerOnly;
        }
        let prompt = prompts::implementation_intent_prompt(title, issue_body, &tagged_conversation(conversation));
        match self.classify(prompts::CLASSIFY_INTENT_INSTRUCTIONS, &prompt).await {
            Ok(answer) => {
                let intent = ImplementationIntent::parse(&answer);
                tracing::info!(answer = %answer.trim(), ?intent, "implementation intent classified");
                intent
            }
            Err(e) => {
                tracing::warn!(error = %e, "intent classification failed, defaulting to answer_only");
                ImplementationIntent::AnswerOnly
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptStep, ScriptedBackend};
    use crate::memory::Association;

    fn classifier(backend: &ScriptedBackend) -> IntentClassifier {
        let sup = SessionSupervisor::new(Arc::new(backend.clone()), "m");
        IntentClassifier::new(Arc::new(sup), 30)
    }

    #[test]
    fn test_trivial_reply_prefilter() {
        for text in ["Thanks!", "  thank you.  ", "works now", "OK", "You're awesome!!", "no more issues"] {
            assert!(is_trivial_reply(text), "{text} should be trivial");
        }
        for text in ["thanks?", "thanks, but it still crashes", "why does this happen", &format!("ok{}", "!".repeat(90))] {
            assert!(!is_trivial_reply(text), "{text} should not be trivial");
        }
    }

    #[test]
    fn test_intent_parsing() {
        assert_eq!(ImplementationIntent::parse(" implement\n"), ImplementationIntent::Implement);
        assert_eq!(ImplementationIntent::parse("DECLINED."), ImplementationIntent::Declined);
        assert_eq!(ImplementationIntent::parse("ANSWER_ONLY"), ImplementationIntent::AnswerOnly);
        assert_eq!(ImplementationIntent::parse("maybe"), ImplementationIntent::AnswerOnly);
        assert!(parse_yes_no("yes, respond"));
        assert!(!parse_yes_no("NO"));
    }

    #[tokio::test]
    async fn test_no_conversation_skips_classifier() {
        let backend = ScriptedBackend::new();
        let intent = classifier(&backend).classify_implementation("t", "b", &[]).await;
        assert_eq!(intent, ImplementationIntent::AnswerOnly);
        assert_eq!(backend.created(), 0);
    }

    #[tokio::test]
    async fn test_classifier_uses_tool_free_session() {
        let backend = ScriptedBackend::new();
        backend.push_reply("DECLINED");
        let conversation = vec![Comment::user("owner", "we won't add this", Association::Owner)];
        let intent = classifier(&backend).classify_implementation("t", "b", &conversation).await;
        assert_eq!(intent, ImplementationIntent::Declined);
        assert!(backend.sessions()[0].tools.is_empty());
        assert!(backend.prompts()[0].contains("[OWNER] @owner: we won't add this"));
        assert_eq!(backend.destroyed(), 1);
    }

    #[tokio::test]
    async fn test_failures_fall_back_to_defaults() {
        let backend = ScriptedBackend::new();
        backend.push_turn(vec![ScriptStep::Fail("boom".into())]);
        backend.push_turn(vec![ScriptStep::Fail("boom".into())]);
        let classifier = classifier(&backend);

        let event = RunEvent::new_issue("t", "b", 1).with_comment("alice", "it still fails");
        assert!(classifier.should_respond(&event).await);

        let conversation = vec![Comment::user("alice", "hi", Association::Other)];
        let intent = classifier.classify_implementation("t", "b", &conversation).await;
        assert_eq!(intent, ImplementationIntent::AnswerOnly);
        assert_eq!(backend.destroyed(), 2);
    }

    #[tokio::test]
    async fn test_should_respond_parses_answer() {
        let backend = ScriptedBackend::new();
        backend.push_reply("NO");
        let event = RunEvent::new_issue("t", "b", 1).with_comment("maint", "@bob can you take this");
        assert!(!classifier(&backend).should_respond(&event).await);
    }
}
