//! 运行产物：回复正文、按根目录分组的变更说明、致命失败说明
//!
//! 下游流水线只读这些文件：response.md 发评论，pr_description*.md 开草稿 PR，failure.md 发失败通知。

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::core::orchestrator::RunOutcome;
use crate::core::MutationRecord;

pub const RESPONSE_FILE: &str = "response.md";
pub const FAILURE_FILE: &str = "failure.md";
/// 项目根目录使用的变更说明文件名
const MAIN_ROOT: &str = "main";

pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn write_reply(&self, reply: &str) -> io::Result<PathBuf> {
        self.write(RESPONSE_FILE, reply)
    }

    /// 每个有修改的根目录写一份变更说明，按根目录首次出现的顺序
    pub fn write_change_summaries(&self, mutations: &[MutationRecord]) -> io::Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for (root, records) in group_by_root(mutations) {
            written.push(self.write(&summary_file_name(root), &render_change_summary(&records))?);
        }
        Ok(written)
    }

    pub fn write_failure(&self, error: &dyn std::fmt::Display) -> io::Result<PathBuf> {
        self.write(FAILURE_FILE, &render_failure(error))
    }

    /// 写出一次运行的全部产物；被跳过的运行不产生任何文件
    pub fn write_outcome(&self, outcome: &RunOutcome) -> io::Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        if let Some(reply) = &outcome.reply {
            written.push(self.write_reply(reply)?);
        }
        written.extend(self.write_change_summaries(&outcome.mutations)?);
        Ok(written)
    }

    fn write(&self, name: &str, content: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        fs::write(&path, content)?;
        tracing::info!(path = %path.display(), bytes = content.len(), "artifact written");
        Ok(path)
    }
}

fn group_by_root(mutations: &[MutationRecord]) -> Vec<(&str, Vec<&MutationRecord>)> {
    let mut groups: Vec<(&str, Vec<&MutationRecord>)> = Vec::new();
    for m in mutations {
        match groups.iter_mut().find(|(root, _)| *root == m.root) {
            Some((_, records)) => records.push(m),
            None => groups.push((m.root.as_str(), vec![m])),
        }
    }
    groups
}

pub fn summary_file_name(root: &str) -> String {
    if root == MAIN_ROOT {
        "pr_description.md".to_string()
    } else {
        format!("pr_description_{}.md", root)
    }
}

pub fn render_change_summary(records: &[&MutationRecord]) -> String {
    let mut lines = vec![
        "Automated fix proposed by AI analysis of the linked issue.\n".to_string(),
        "## Changes\n".to_string(),
    ];
    for r in records {
        let marker = if r.is_new { "**New:** " } else { "" };
        lines.push(format!("- {}`{}`: {}", marker, r.path, r.reason));
    }
    lines.push("\n**This is a draft PR - human review required before merging.**".to_string());
    lines.join("\n")
}

pub fn render_failure(error: &dyn std::fmt::Display) -> String {
    format!(
        "The AI analysis was unable to generate a response for this issue.\n\n**Error:** `{}`\n\nA human maintainer will follow up.",
        error
    )
}
