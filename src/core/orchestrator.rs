//! 阶段编排器：生成 → 自审 → 洞察提取
//!
//! - 追评先经过预过滤与两个分类调用；新 issue 跳过分类，直接使用完整工具集
//! - 阶段 1（生成）失败时销毁会话、重建一次并重试，再失败则整个运行失败
//! - 阶段 2（自审）只在阶段 1 产生修改时运行；阶段 3（洞察）在回复为 SKIP 时跳过
//! - 阶段 2、3 复用阶段 1 的会话，失败只记日志，阶段 1 的回复照常交付

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::config::TimeoutsSection;
use crate::core::session_supervisor::{ManagedSession, SessionSpec, SessionSupervisor, TurnOptions};
use crate::core::{AgentError, MutationRecord, RunContext, RunEvent};
use crate::memory::{format_for_prompt, InsightScope};
use crate::react::{is_trivial_reply, prompts, ImplementationIntent, IntentClassifier};
use crate::tools::{combined_diff, CapabilityRegistry, MAX_DIFF_SIZE};

/// 阶段 1 的最多尝试次数（首次 + 一次重建重试）
const GENERATION_ATTEMPTS: usize = 2;
/// Agent 表示无需回复的控制词
pub const SKIP_TOKEN: &str = "SKIP";

/// 各阶段硬超时（秒）
#[derive(Debug, Clone, Copy)]
pub struct PhaseTimeouts {
    pub generation: u64,
    pub review: u64,
    pub insight: u64,
    pub classify: u64,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self::from(&TimeoutsSection::default())
    }
}

impl From<&TimeoutsSection> for PhaseTimeouts {
    fn from(t: &TimeoutsSection) -> Self {
        Self {
            generation: t.generation,
            review: t.review,
            insight: t.insight,
            classify: t.classify,
        }
    }
}

/// 没有产出回复的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 追评被预过滤判定为致谢 / 确认
    TrivialReply,
    /// 分类器认为追评不需要回复
    NotWorthReplying,
    /// Agent 自己回复了 SKIP
    AgentSkipped,
}

/// 一次运行的结果
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub reply: Option<String>,
    pub mutations: Vec<MutationRecord>,
    /// 追评时的分类结果；新 issue 为 None
    pub intent: Option<ImplementationIntent>,
    pub skipped: Option<SkipReason>,
    pub review_ran: bool,
    pub insight_ran: bool,
}

impl RunOutcome {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

/// 回复是否为 SKIP 控制词
pub fn is_skip(reply: &str) -> bool {
    reply.trim().eq_ignore_ascii_case(SKIP_TOKEN)
}

pub struct PhaseOrchestrator {
    supervisor: Arc<SessionSupervisor>,
    classifier: IntentClassifier,
    capabilities: CapabilityRegistry,
    ctx: Arc<RunContext>,
    instructions: String,
    timeouts: PhaseTimeouts,
    diff_roots: Vec<PathBuf>,
    max_diff_size: usize,
    today: NaiveDate,
}

impl PhaseOrchestrator {
    pub fn new(
        supervisor: Arc<SessionSupervisor>,
        capabilities: CapabilityRegistry,
        ctx: Arc<RunContext>,
        timeouts: PhaseTimeouts,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(Arc::clone(&supervisor), timeouts.classify),
            supervisor,
            capabilities,
            ctx,
            instructions: prompts::SYSTEM_PROMPT.to_string(),
            timeouts,
            diff_roots: Vec::new(),
            max_diff_size: MAX_DIFF_SIZE,
            today: chrono::Local::now().date_naive(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// 自审时取 diff 的根目录
    pub fn with_diff_roots(mut self, roots: Vec<PathBuf>, max_diff_size: usize) -> Self {
        self.diff_roots = roots;
        self.max_diff_size = max_diff_size;
        self
    }

    /// 洞察过期判断与落盘使用的日期
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub async fn run(&self, event: &RunEvent) -> Result<RunOutcome, AgentError> {
        let mut intent = None;
        if let Some(comment) = &event.comment {
            if is_trivial_reply(&comment.body) {
                tracing::info!(author = %comment.author, "trivial reply, skipping");
                return Ok(RunOutcome::skipped(SkipReason::TrivialReply));
            }
            if !self.classifier.should_respond(event).await {
                tracing::info!(author = %comment.author, "classifier decided not to respond");
                return Ok(RunOutcome::skipped(SkipReason::NotWorthReplying));
            }
            intent = Some(
                self.classifier
                    .classify_implementation(&event.title, &event.body, &event.conversation)
                    .await,
            );
        }

        let project = self.ctx.insights.load_pruned(InsightScope::Project, self.today);
        let global = self.ctx.insights.load_pruned(InsightScope::Global, self.today);
        let insights_text = format_for_prompt(&project, &global);

        let tool_set = self
            .capabilities
            .tools_for(intent.unwrap_or(ImplementationIntent::AnswerOnly));
        let spec = SessionSpec {
            instructions: tool_set.instructions(&self.instructions),
            tools: tool_set.tools,
            extended: true,
        };

        let prompt = prompts::generation_prompt(event, &insights_text);
        let (mut session, draft) = self.generate(&spec, &prompt).await?;

        let mut outcome = RunOutcome {
            intent,
            ..RunOutcome::default()
        };

        if self.ctx.has_mutations() {
            outcome.review_ran = true;
            self.review(&mut session, &draft).await;
        }

        let skip = is_skip(&draft);
        if skip {
            tracing::info!("agent replied SKIP, no response and no insight extraction");
        } else {
            outcome.insight_ran = true;
            self.extract_insights(&mut session, &insights_text, event).await;
        }

        self.supervisor.destroy(session).await;

        outcome.mutations = self.ctx.mutations();
        if skip {
            outcome.skipped = Some(SkipReason::AgentSkipped);
        } else {
            outcome.reply = Some(draft);
        }
        Ok(outcome)
    }

    /// 阶段 1：失败时销毁会话并重建重试一次
    async fn generate(&self, spec: &SessionSpec, prompt: &str) -> Result<(ManagedSession, String), AgentError> {
        // SKIP 本身要能作为有效回复被提取
        let opts = TurnOptions::new(self.timeouts.generation).min_len(SKIP_TOKEN.len());
        let mut failure = AgentError::Backend("generation not attempted".to_string());

        for attempt in 1..=GENERATION_ATTEMPTS {
            tracing::info!(phase = "generation", attempt, "phase started");
            let mut session = match self.supervisor.create(spec.clone()).await {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!(phase = "generation", attempt, error = %e, "session creation failed");
                    failure = e;
                    continue;
                }
            };
            match self.supervisor.send(&mut session, prompt, opts).await {
                Ok(text) => {
                    tracing::info!(phase = "generation", attempt, chars = text.chars().count(), "phase complete");
                    return Ok((session, text));
                }
                Err(e) => {
                    tracing::warn!(phase = "generation", attempt, error = %e, "phase failed");
                    self.supervisor.destroy(session).await;
                    failure = e;
                }
            }
        }
        Err(AgentError::PhaseFailure {
            phase: "generation",
            source: Box::new(failure),
        })
    }

    /// 阶段 2：自审，失败只记日志
    async fn review(&self, session: &mut ManagedSession, draft: &str) {
        let mutations = self.ctx.mutations();
        tracing::info!(phase = "review", files = mutations.len(), "phase started");
        let diff = combined_diff(&self.diff_roots, self.max_diff_size).await;
        let prompt = prompts::review_prompt(draft, &mutations, &diff);

        match self
            .supervisor
            .send(session, &prompt, TurnOptions::new(self.timeouts.review))
            .await
        {
            Ok(result) => tracing::info!(phase = "review", chars = result.chars().count(), "phase complete"),
            Err(e) => {
                let err = AgentError::PhaseFailure {
                    phase: "review",
                    source: Box::new(e),
                };
                tracing::warn!(error = %err, "self-review failed, keeping draft");
            }
        }
    }

    /// 阶段 3：洞察提取并落盘，失败只记日志
    async fn extract_insights(&self, session: &mut ManagedSession, insights_text: &str, event: &RunEvent) {
        tracing::info!(phase = "insight", "phase started");
        let prompt = prompts::insight_prompt(insights_text, event.issue_number, &event.title);
        match self
            .supervisor
            .send(session, &prompt, TurnOptions::new(self.timeouts.insight).min_len(1))
            .await
        {
            Ok(result) => tracing::info!(phase = "insight", chars = result.chars().count(), "phase complete"),
            Err(e) => {
                let err = AgentError::PhaseFailure {
                    phase: "insight",
                    source: Box::new(e),
                };
                tracing::warn!(error = %err, "insight extraction failed");
            }
        }

        for result in self.ctx.insights.flush_all(self.today, event.issue_number) {
            match result {
                Ok(0) => {}
                Ok(added) => tracing::info!(phase = "insight", added, "insights stored"),
                Err(e) => tracing::warn!(error = %e, "failed to store insights"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_token_detection() {
        assert!(is_skip("SKIP"));
        assert!(is_skip("  skip\n"));
        assert!(!is_skip("SKIP this part and read the config"));
        assert!(!is_skip(""));
    }

    #[test]
    fn test_timeouts_from_config_section() {
        let t = PhaseTimeouts::default();
        assert_eq!((t.generation, t.review, t.insight, t.classify), (3600, 600, 180, 30));
    }
}
