//! 代码编辑工具 - 以唯一锚定的精确文本替换修改已有文件
//!
//! old_text 必须在文件中恰好出现一次；不做缩进容忍，匹配失败时让 Agent 重新读取文件取得原文。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::mutation::MutationEngine;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::Tool;

#[derive(Debug, Deserialize, JsonSchema)]
struct PatchFileParams {
    /// Relative file path within main/ or foundation/, e.g. 'main/src/main/resources/settings.yml'
    path: String,
    /// The exact text to find in the file (must match uniquely). Include 2-3 lines of surrounding context to ensure a unique match.
    old_text: String,
    /// The replacement text that will replace old_text
    new_text: String,
    /// Brief explanation of what this change does
    reason: String,
}

/// patch_codebase_file 工具
pub struct PatchFileTool {
    engine: Arc<MutationEngine>,
}

impl PatchFileTool {
    pub fn new(engine: Arc<MutationEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for PatchFileTool {
    fn name(&self) -> &str {
        "patch_codebase_file"
    }

    fn description(&self) -> &str {
        "Edit an existing source/config file in the project or Foundation repository by replacing a specific text snippet. Use this instead of write_codebase_file for all edits to existing files. The old_text must appear exactly once in the file. Include 2-3 lines of context around the change to ensure uniqueness."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<PatchFileParams>()
    }

    fn mutates(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let params: PatchFileParams = parse_args(args)?;
        tracing::info!(path = %params.path, "patch_codebase_file tool execute");
        let outcome = self
            .engine
            .patch(&params.path, &params.old_text, &params.new_text, &params.reason)
            .map_err(|e| e.to_string())?;
        Ok(format!(
            "Patched {} at line {}: replaced {} chars with {} chars",
            outcome.path, outcome.line, outcome.replaced_chars, outcome.inserted_chars
        ))
    }
}
