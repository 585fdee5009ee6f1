//! 代码搜索工具 - 在可修改的根目录中按字面量查找
//!
//! 递归遍历（跳过隐藏目录与构建产物目录），按扩展名过滤，每个文件最多 3 处命中，总数有上限。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::mutation::MutationEngine;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::Tool;

/// 总命中上限
pub const MAX_SEARCH_RESULTS: usize = 50;
/// 单文件命中上限
const MAX_HITS_PER_FILE: usize = 3;
/// 超过此大小的文件不搜索
const MAX_SEARCHABLE_BYTES: u64 = 1024 * 1024;

fn default_file_types() -> String {
    "java,yml,yaml,rs,json".to_string()
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchParams {
    /// Search term or keyword to grep for in source files
    query: String,
    /// Comma-separated file extensions to search
    #[serde(default = "default_file_types")]
    file_types: String,
}

/// search_codebase 工具
pub struct SearchCodebaseTool {
    engine: Arc<MutationEngine>,
    max_results: usize,
}

impl SearchCodebaseTool {
    pub fn new(engine: Arc<MutationEngine>) -> Self {
        Self {
            engine,
            max_results: MAX_SEARCH_RESULTS,
        }
    }

    pub fn with_limit(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    fn search(&self, query: &str, patterns: &[glob::Pattern]) -> (Vec<String>, bool) {
        let guard = self.engine.guard();
        let mut hits = Vec::new();

        let roots: Vec<(String, &Path)> = guard
            .roots()
            .filter(|r| r.is_mutable())
            .filter_map(|r| guard.root_dir(&r.name).map(|dir| (r.name.clone(), dir)))
            .collect();

        for (name, dir) in roots {
            let walker = walkdir::WalkDir::new(dir)
                .max_depth(32)
                .into_iter()
                .filter_entry(|e| {
                    let entry_name = e.file_name().to_string_lossy();
                    e.depth() == 0 || (!entry_name.starts_with('.') && !guard.is_restricted(&entry_name))
                })
                .filter_map(|e| e.ok());

            for entry in walker {
                if !entry.file_type().is_file() {
                    continue;
                }
                let file_name = entry.file_name().to_string_lossy();
                if !patterns.iter().any(|p| p.matches(&file_name)) {
                    continue;
                }
                if entry.metadata().map(|m| m.len() > MAX_SEARCHABLE_BYTES).unwrap_or(true) {
                    continue;
                }
                let content = match std::fs::read_to_string(entry.path()) {
                    Ok(c) => c,
                    Err(_) => continue, // 跳过二进制或无法读取的文件
                };
                let relative = entry
                    .path()
                    .strip_prefix(dir)
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();

                for (line_num, line) in content
                    .lines()
                    .enumerate()
                    .filter(|(_, l)| l.contains(query))
                    .take(MAX_HITS_PER_FILE)
                {
                    if hits.len() >= self.max_results {
                        return (hits, true);
                    }
                    hits.push(format!("{}/{}:{}:{}", name, relative, line_num + 1, line.trim()));
                }
            }
        }
        (hits, false)
    }
}

#[async_trait]
impl Tool for SearchCodebaseTool {
    fn name(&self) -> &str {
        "search_codebase"
    }

    fn description(&self) -> &str {
        "Search the project and Foundation codebases for files containing a keyword. Returns matching file paths with line numbers and snippets. Excludes build output (target/) directories."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<SearchParams>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let params: SearchParams = parse_args(args)?;
        if params.query.chars().count() < 2 {
            return Err("Search query must be at least 2 characters.".to_string());
        }
        tracing::info!(query = %params.query, "search_codebase tool execute");

        let patterns: Vec<glob::Pattern> = params
            .file_types
            .split(',')
            .map(|ext| ext.trim().trim_start_matches('.'))
            .filter(|ext| !ext.is_empty())
            .filter_map(|ext| glob::Pattern::new(&format!("*.{}", ext)).ok())
            .collect();
        if patterns.is_empty() {
            return Err(format!("No valid file types in '{}'", params.file_types));
        }

        let (mut hits, truncated) = self.search(&params.query, &patterns);
        if hits.is_empty() {
            return Ok(format!("No matches found for '{}'", params.query));
        }
        if truncated {
            hits.push(format!("... (showing {} of many matches)", self.max_results));
        }
        Ok(hits.join("\n"))
    }
}
