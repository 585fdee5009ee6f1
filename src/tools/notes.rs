//! 工作笔记工具 - Agent 的草稿本
//!
//! 笔记写在每次运行开始时清空的 working 目录下，上下文压缩后仍可通过 read_working_notes 找回。

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::{parse_args, schema_of};
use crate::tools::Tool;

fn default_note_name() -> String {
    "notes.md".to_string()
}

/// 文件名只允许单层普通名字
fn note_path(dir: &Path, filename: &str) -> Result<PathBuf, String> {
    if filename.is_empty() || filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return Err("Filename must be a simple name without path separators.".to_string());
    }
    Ok(dir.join(filename))
}

/// 清空并重建 working 目录
pub fn reset_working_dir(dir: &Path) -> std::io::Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)
}

#[derive(Debug, Deserialize, JsonSchema)]
struct WriteNoteParams {
    /// Filename within working/, e.g. 'notes.md' or 'findings.md'
    #[serde(default = "default_note_name")]
    filename: String,
    /// Content to append to the file
    content: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ReadNotesParams {
    /// Filename within working/ to read, e.g. 'notes.md'
    #[serde(default = "default_note_name")]
    filename: String,
}

/// write_working_note 工具
pub struct WriteNoteTool {
    dir: PathBuf,
}

impl WriteNoteTool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Tool for WriteNoteTool {
    fn name(&self) -> &str {
        "write_working_note"
    }

    fn description(&self) -> &str {
        "Append a note to your working scratchpad in the working/ directory. Use this to record important findings, plans, and observations so they survive context compaction."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<WriteNoteParams>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let params: WriteNoteParams = parse_args(args)?;
        let path = note_path(&self.dir, &params.filename)?;

        std::fs::create_dir_all(&self.dir).map_err(|e| e.to_string())?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| e.to_string())?;
        writeln!(file, "{}", params.content).map_err(|e| e.to_string())?;

        Ok(format!(
            "Appended {} chars to working/{}",
            params.content.chars().count(),
            params.filename
        ))
    }
}

/// read_working_notes 工具
pub struct ReadNotesTool {
    dir: PathBuf,
}

impl ReadNotesTool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Tool for ReadNotesTool {
    fn name(&self) -> &str {
        "read_working_notes"
    }

    fn description(&self) -> &str {
        "Read your working scratchpad notes from the working/ directory. Use this to recall findings you recorded earlier, especially after context compaction."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ReadNotesParams>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let params: ReadNotesParams = parse_args(args)?;
        let path = note_path(&self.dir, &params.filename)?;
        if !path.exists() {
            return Ok("No working notes yet.".to_string());
        }
        std::fs::read_to_string(&path).map_err(|e| e.to_string())
    }
}
