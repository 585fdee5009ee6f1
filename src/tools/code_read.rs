//! 代码读取工具 - 读取沙箱内的源码、配置或技能文件

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::mutation::MutationEngine;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::Tool;

#[derive(Debug, Deserialize, JsonSchema)]
struct ReadFileParams {
    /// Relative file path, e.g. 'main/src/main/resources/settings.yml' or 'ai-support/projects/.../SKILL.md'
    path: String,
}

/// read_codebase_file 工具
pub struct ReadFileTool {
    engine: Arc<MutationEngine>,
}

impl ReadFileTool {
    pub fn new(engine: Arc<MutationEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_codebase_file"
    }

    fn description(&self) -> &str {
        "Read a source file from the project or Foundation repository, or a skill file from ai-support/. Path must start with 'main/', 'foundation/', or 'ai-support/'. Excludes build output directories."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ReadFileParams>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let params: ReadFileParams = parse_args(args)?;
        tracing::info!(path = %params.path, "read_codebase_file tool execute");
        self.engine.read(&params.path).map_err(|e| e.to_string())
    }
}
