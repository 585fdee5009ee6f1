//! 合并 diff：自审阶段展示所有可修改根目录的改动（含新建文件）
//!
//! 每个根目录依次执行 `git add -A`、`git diff --cached`、`git reset --quiet`，
//! 暂存区只在取 diff 期间使用，执行后恢复原状。

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

/// diff 上限（字符）
pub const MAX_DIFF_SIZE: usize = 60_000;

async fn run_git(dir: &Path, args: &[&str], timeout_secs: u64) -> Result<String, String> {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(dir).args(args).kill_on_drop(true);

    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output())
        .await
        .map_err(|_| format!("git {} timed out after {}s", args.join(" "), timeout_secs))?
        .map_err(|e| format!("Failed to run git: {}", e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("git {} failed: {}", args.join(" "), stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

async fn root_diff(dir: &Path) -> Result<String, String> {
    run_git(dir, &["add", "-A"], 10).await?;
    let diff = run_git(dir, &["diff", "--cached"], 30).await;
    let reset = run_git(dir, &["reset", "--quiet"], 10).await;
    if let Err(e) = reset {
        tracing::warn!(dir = %dir.display(), error = %e, "git reset failed");
    }
    diff
}

/// 依次取各根目录的 diff 并拼接；单个根目录失败只记日志。超过 `max_size` 时截断并附标记
pub async fn combined_diff(roots: &[PathBuf], max_size: usize) -> String {
    let mut diffs = Vec::new();
    for dir in roots {
        match root_diff(dir).await {
            Ok(diff) if !diff.trim().is_empty() => diffs.push(diff.trim().to_string()),
            Ok(_) => {}
            Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "git diff failed"),
        }
    }

    let diff = diffs.join("\n");
    match diff.char_indices().nth(max_size) {
        Some((idx, _)) => format!("{}\n... (diff truncated)", &diff[..idx]),
        None => diff,
    }
}
