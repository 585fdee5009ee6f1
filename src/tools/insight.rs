//! store_insight 工具：Agent 记录可复用洞察的入口，写入 RunContext 中的 InsightStore 缓冲

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::RunContext;
use crate::memory::NewInsight;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::Tool;

fn default_scope() -> String {
    "project".to_string()
}

#[derive(Debug, Deserialize, JsonSchema)]
struct StoreInsightParams {
    /// Topic category matching a skill directory name (e.g. 'channels', 'bosses'), or 'general'
    topic: String,
    /// Specific, actionable insight in 1-3 sentences. Must be concrete enough to help resolve similar future issues.
    insight: String,
    /// Skill file this supplements, e.g. 'channels'. Empty if general.
    #[serde(default)]
    related_skill: String,
    /// 'project' for project-specific insights, 'global' for cross-project framework or platform knowledge
    #[serde(default = "default_scope")]
    scope: String,
}

pub struct StoreInsightTool {
    ctx: Arc<RunContext>,
}

impl StoreInsightTool {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for StoreInsightTool {
    fn name(&self) -> &str {
        "store_insight"
    }

    fn description(&self) -> &str {
        "Store a learned insight from this issue. Only call if you found genuinely new knowledge not in skill files. Most issues teach nothing new, so do not force insights. Use scope='global' for framework or platform knowledge that applies across all projects."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<StoreInsightParams>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let params: StoreInsightParams = parse_args(args)?;
        let reply = format!(
            "Insight stored for topic '{}' (scope: {}).",
            params.topic, params.scope
        );
        self.ctx
            .insights
            .append(NewInsight {
                topic: params.topic,
                text: params.insight,
                related_skill: params.related_skill,
                scope: params.scope,
            })
            .map_err(|e| e.to_string())?;
        Ok(reply)
    }
}
