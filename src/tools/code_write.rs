//! 代码写入工具 - 在可写前缀下创建新文件
//!
//! 只创建不存在的文件；修改已有文件必须走 patch_codebase_file。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::mutation::MutationEngine;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::Tool;

#[derive(Debug, Deserialize, JsonSchema)]
struct WriteFileParams {
    /// Relative file path within main/ or foundation/, e.g. 'main/src/main/java/org/example/MyClass.java'. Must be a NEW file that does not exist yet.
    path: String,
    /// The complete content for the new file
    content: String,
    /// Brief explanation of why this new file is needed
    reason: String,
}

/// write_codebase_file 工具
pub struct WriteFileTool {
    engine: Arc<MutationEngine>,
}

impl WriteFileTool {
    pub fn new(engine: Arc<MutationEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_codebase_file"
    }

    fn description(&self) -> &str {
        "Create a NEW source/config file in the project or Foundation repository. Only for files that don't exist yet. For editing existing files, use patch_codebase_file instead. Path must start with 'main/' or 'foundation/' and be under a writable source directory. Cannot modify build files. Changes are submitted as a draft for human review."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<WriteFileParams>()
    }

    fn mutates(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let params: WriteFileParams = parse_args(args)?;
        tracing::info!(path = %params.path, "write_codebase_file tool execute");
        let outcome = self
            .engine
            .write(&params.path, &params.content, &params.reason)
            .map_err(|e| e.to_string())?;
        Ok(format!("Created {} ({} chars)", outcome.path, outcome.chars))
    }
}
