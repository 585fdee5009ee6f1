//! Bee Responder - 问题分诊智能体
//!
//! 入口：初始化日志、加载配置与运行事件、组装沙箱与会话监管，执行三阶段编排并写出产物。
//! 用法：`bee-responder [config.toml]`

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bee_responder::config::{load_config, AppConfig};
use bee_responder::core::{ArtifactWriter, PhaseOrchestrator, PhaseTimeouts, RunContext, RunEvent, SessionSupervisor};
use bee_responder::llm::{ChatBackend, ExtendedSessionConfig};
use bee_responder::memory::InsightStore;
use bee_responder::observability;
use bee_responder::tools::{reset_working_dir, AccessGuard, CapabilityRegistry, MutationEngine};

#[tokio::main]
async fn main() -> ExitCode {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = match load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            AppConfig::default()
        }
    };
    let writer = ArtifactWriter::new(&cfg.output.dir);

    match run(&cfg, &writer).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "run failed");
            if let Err(write_err) = writer.write_failure(&format!("{:#}", e)) {
                tracing::error!(error = %write_err, "failed to write failure artifact");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: &AppConfig, writer: &ArtifactWriter) -> anyhow::Result<()> {
    let event = RunEvent::from_env().context("Failed to read run event")?;
    let project_id = std::env::var("PROJECT_ID").unwrap_or_else(|_| "default".to_string());
    tracing::info!(
        project = %project_id,
        issue = event.issue_number,
        reply = event.is_reply(),
        "run started"
    );

    reset_working_dir(&cfg.sandbox.working_dir).context("Failed to reset working notes directory")?;

    let guard = AccessGuard::new(cfg.sandbox.roots.clone())
        .with_restricted_dirs(cfg.sandbox.restricted_dirs.clone())
        .with_blocked_filenames(cfg.sandbox.blocked_filenames.clone());
    let insights = InsightStore::new(&cfg.insights.dir, project_id.clone())
        .with_limits(cfg.insights.max_insights, cfg.insights.expiry_days);
    let ctx = Arc::new(RunContext::new(project_id, event.issue_number, insights));
    let engine = Arc::new(
        MutationEngine::new(guard, Arc::clone(&ctx))
            .with_limits(cfg.sandbox.max_file_size, cfg.sandbox.max_list_entries),
    );
    let capabilities = CapabilityRegistry::standard(
        engine,
        Arc::clone(&ctx),
        &cfg.sandbox.working_dir,
        cfg.sandbox.max_search_results,
    );

    let api_key = cfg.agent.resolved_api_key();
    if api_key.is_none() {
        tracing::warn!("no API key configured (BEE__AGENT__API_KEY / OPENAI_API_KEY)");
    }
    let backend = Arc::new(
        ChatBackend::new(&cfg.agent.base_url, api_key.as_deref())
            .with_context_window(cfg.agent.context_window_tokens)
            .with_max_tool_rounds(cfg.agent.max_tool_rounds)
            .with_tool_timeout(cfg.agent.tool_timeout_secs),
    );
    let supervisor = SessionSupervisor::new(backend.clone(), cfg.agent.model.clone())
        .with_stall_policy(
            Duration::from_secs(cfg.timeouts.stall),
            Duration::from_secs(cfg.timeouts.poll),
        )
        .with_extended(ExtendedSessionConfig {
            compaction_threshold: cfg.agent.compaction_threshold,
            buffer_exhaustion_threshold: cfg.agent.buffer_exhaustion_threshold,
        });

    let orchestrator = PhaseOrchestrator::new(
        Arc::new(supervisor),
        capabilities,
        Arc::clone(&ctx),
        PhaseTimeouts::from(&cfg.timeouts),
    )
    .with_diff_roots(cfg.sandbox.mutable_root_paths(), cfg.sandbox.max_diff_size);

    let result = orchestrator.run(&event).await;
    let (prompt_tokens, completion_tokens, total_tokens) = backend.token_usage();
    tracing::info!(prompt_tokens, completion_tokens, total_tokens, "token usage");
    let outcome = result?;
    if let Some(reason) = outcome.skipped {
        tracing::info!(?reason, "run skipped, no response");
    }

    let written = writer
        .write_outcome(&outcome)
        .context("Failed to write run artifacts")?;
    tracing::info!(
        files = written.len(),
        mutations = outcome.mutations.len(),
        review = outcome.review_ran,
        insight = outcome.insight_ran,
        "run complete"
    );
    Ok(())
}
