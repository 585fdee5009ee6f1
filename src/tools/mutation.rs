//! 沙箱内的读 / 列 / 写 / 补丁
//!
//! 所有操作先经 AccessGuard 校验。写入只创建新文件；补丁要求 old_text 在当前内容中恰好出现一次，
//! 0 次或多次都直接失败且不修改文件（按原始文本比较，不做空白容忍）。成功的写入与补丁记入 RunContext。

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use crate::core::{MutationRecord, RunContext, SandboxError};
use crate::tools::filesystem::{AccessGuard, ResolvedPath};

/// 读取 / 写入的大小上限（字符）
pub const MAX_FILE_SIZE: usize = 80_000;
/// 目录列举条目上限
pub const MAX_LIST_ENTRIES: usize = 100;

/// 目录列举结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub entries: Vec<String>,
    /// 超出上限而未列出的条目数
    pub overflow: usize,
}

impl Listing {
    pub fn render(&self) -> String {
        let mut lines: Vec<String> = self.entries.iter().map(|e| format!("  {}", e)).collect();
        if self.overflow > 0 {
            lines.push(format!("... and {} more entries", self.overflow));
        }
        if lines.is_empty() {
            return "(empty directory)".to_string();
        }
        lines.join("\n")
    }
}

/// 写入成功
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub path: String,
    pub chars: usize,
}

/// 补丁成功
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub path: String,
    pub replaced_chars: usize,
    pub inserted_chars: usize,
    /// 替换发生处的行号（从 1 开始）
    pub line: usize,
}

/// 沙箱修改引擎
pub struct MutationEngine {
    guard: AccessGuard,
    ctx: Arc<RunContext>,
    max_file_size: usize,
    max_list_entries: usize,
}

impl MutationEngine {
    pub fn new(guard: AccessGuard, ctx: Arc<RunContext>) -> Self {
        Self {
            guard,
            ctx,
            max_file_size: MAX_FILE_SIZE,
            max_list_entries: MAX_LIST_ENTRIES,
        }
    }

    pub fn with_limits(mut self, max_file_size: usize, max_list_entries: usize) -> Self {
        self.max_file_size = max_file_size;
        self.max_list_entries = max_list_entries;
        self
    }

    pub fn guard(&self) -> &AccessGuard {
        &self.guard
    }

    pub fn max_file_size(&self) -> usize {
        self.max_file_size
    }

    /// 读取文件；超出上限时截断并追加标记，截断本身不算失败
    pub fn read(&self, path: &str) -> Result<String, SandboxError> {
        let resolved = self.guard.validate(path)?;
        self.ensure_file(&resolved)?;
        let bytes = std::fs::read(&resolved.absolute)
            .map_err(|e| SandboxError::io(&resolved.display, e))?;
        let content = String::from_utf8_lossy(&bytes);
        Ok(match content.char_indices().nth(self.max_file_size) {
            Some((idx, _)) => format!(
                "{}\n... (truncated at {} characters)",
                &content[..idx],
                self.max_file_size
            ),
            None => content.into_owned(),
        })
    }

    /// 列出目录的直接子项（排除构建产物目录），超出上限时附带溢出数
    pub fn list(&self, path: &str) -> Result<Listing, SandboxError> {
        let resolved = self.guard.validate(path)?;
        let abs = &resolved.absolute;
        if !abs.exists() {
            return Err(SandboxError::FileNotFound(resolved.display));
        }
        if !abs.is_dir() {
            return Err(SandboxError::NotADirectory(resolved.display));
        }

        let mut entries = Vec::new();
        let dir = std::fs::read_dir(abs).map_err(|e| SandboxError::io(&resolved.display, e))?;
        for entry in dir {
            let entry = entry.map_err(|e| SandboxError::io(&resolved.display, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.guard.is_restricted(&name) {
                continue;
            }
            let metadata = entry.metadata().ok();
            let is_dir = metadata.as_ref().map(|m| m.is_dir()).unwrap_or(false);
            let size = metadata.map(|m| m.len()).unwrap_or(0);
            entries.push((name, is_dir, size));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let overflow = entries.len().saturating_sub(self.max_list_entries);
        let entries = entries
            .into_iter()
            .take(self.max_list_entries)
            .map(|(name, is_dir, size)| {
                if is_dir {
                    format!("{}/", name)
                } else {
                    format!("{} ({} bytes)", name, size)
                }
            })
            .collect();
        Ok(Listing { entries, overflow })
    }

    /// 创建新文件；目标已存在（含悬空符号链接）一律 AlreadyExists
    pub fn write(&self, path: &str, content: &str, reason: &str) -> Result<WriteOutcome, SandboxError> {
        let resolved = self.guard.validate_writable(path)?;
        if resolved.absolute.symlink_metadata().is_ok() {
            return Err(SandboxError::AlreadyExists(resolved.display));
        }

        let chars = content.chars().count();
        if chars > self.max_file_size {
            return Err(SandboxError::SizeExceeded {
                size: chars,
                max: self.max_file_size,
            });
        }

        if let Some(parent) = resolved.absolute.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SandboxError::io(&resolved.display, e))?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&resolved.absolute)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => SandboxError::AlreadyExists(resolved.display.clone()),
                _ => SandboxError::io(&resolved.display, e),
            })?;
        file.write_all(content.as_bytes())
            .map_err(|e| SandboxError::io(&resolved.display, e))?;

        self.ctx.record_mutation(MutationRecord {
            path: resolved.display.clone(),
            root: resolved.root.clone(),
            reason: reason.to_string(),
            is_new: true,
        });
        Ok(WriteOutcome {
            path: resolved.display,
            chars,
        })
    }

    /// 唯一锚定的文本替换：old_text 必须恰好出现一次
    pub fn patch(
        &self,
        path: &str,
        old_text: &str,
        new_text: &str,
        reason: &str,
    ) -> Result<PatchOutcome, SandboxError> {
        let resolved = self.guard.validate_writable(path)?;
        if !resolved.absolute.is_file() {
            return Err(SandboxError::FileNotFound(resolved.display));
        }
        if old_text.is_empty() {
            return Err(SandboxError::EmptyPattern);
        }

        let content = std::fs::read_to_string(&resolved.absolute)
            .map_err(|e| SandboxError::io(&resolved.display, e))?;

        let count = count_occurrences(&content, old_text);
        if count == 0 {
            return Err(SandboxError::PatchNotFound(resolved.display));
        }
        if count > 1 {
            return Err(SandboxError::AmbiguousMatch {
                path: resolved.display,
                count,
            });
        }

        let pos = content.find(old_text).unwrap_or(0);
        let line = content[..pos].matches('\n').count() + 1;
        let new_content = content.replacen(old_text, new_text, 1);
        let size = new_content.chars().count();
        if size > self.max_file_size {
            return Err(SandboxError::SizeExceeded {
                size,
                max: self.max_file_size,
            });
        }

        std::fs::write(&resolved.absolute, new_content)
            .map_err(|e| SandboxError::io(&resolved.display, e))?;

        self.ctx.record_mutation(MutationRecord {
            path: resolved.display.clone(),
            root: resolved.root.clone(),
            reason: reason.to_string(),
            is_new: false,
        });
        Ok(PatchOutcome {
            path: resolved.display,
            replaced_chars: old_text.chars().count(),
            inserted_chars: new_text.chars().count(),
            line,
        })
    }

    fn ensure_file(&self, resolved: &ResolvedPath) -> Result<(), SandboxError> {
        if !resolved.absolute.exists() {
            return Err(SandboxError::FileNotFound(resolved.display.clone()));
        }
        if !resolved.absolute.is_file() {
            return Err(SandboxError::NotAFile(resolved.display.clone()));
        }
        Ok(())
    }
}

/// 统计出现次数（允许重叠，`aa` 在 `aaa` 中计 2 次）
fn count_occurrences(haystack: &str, needle: &str) -> usize {
    let mut count = 0;
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        count += 1;
        let at = start + pos;
        let step = haystack[at..].chars().next().map_or(1, char::len_utf8);
        start = at + step;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InsightStore;
    use crate::tools::filesystem::SandboxRoot;

    struct Fixture {
        dir: tempfile::TempDir,
        ctx: Arc<RunContext>,
        engine: MutationEngine,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("main/src/main/java")).unwrap();
        std::fs::create_dir_all(dir.path().join("main/target")).unwrap();
        std::fs::create_dir_all(dir.path().join("insights")).unwrap();
        std::fs::write(
            dir.path().join("main/src/main/java/App.java"),
            "class App {\n    int a = 1;\n    int b = 1;\n}\n",
        )
        .unwrap();
        let guard = AccessGuard::new(vec![SandboxRoot::new("main", dir.path().join("main"))
            .writable(&["src/main/"], &[".java", ".yml"])]);
        let ctx = Arc::new(RunContext::new(
            "demo",
            1,
            InsightStore::new(dir.path().join("insights"), "demo"),
        ));
        let engine = MutationEngine::new(guard, Arc::clone(&ctx));
        Fixture { dir, ctx, engine }
    }

    #[test]
    fn test_read_and_truncate() {
        let f = fixture();
        let content = f.engine.read("main/src/main/java/App.java").unwrap();
        assert!(content.starts_with("class App"));

        let small = MutationEngine::new(f.engine.guard().clone(), Arc::clone(&f.ctx)).with_limits(5, 100);
        let truncated = small.read("main/src/main/java/App.java").unwrap();
        assert_eq!(truncated, "class\n... (truncated at 5 characters)");
    }

    #[test]
    fn test_read_errors() {
        let f = fixture();
        assert!(matches!(
            f.engine.read("main/src/main/java/Missing.java"),
            Err(SandboxError::FileNotFound(_))
        ));
        assert!(matches!(
            f.engine.read("main/src/main/java"),
            Err(SandboxError::NotAFile(_))
        ));
    }

    #[test]
    fn test_list_excludes_build_output_and_caps() {
        let f = fixture();
        let listing = f.engine.list("main").unwrap();
        assert_eq!(listing.entries, vec!["src/".to_string()]);
        assert_eq!(listing.overflow, 0);

        for i in 0..5 {
            std::fs::write(f.dir.path().join(format!("main/src/main/f{i}.yml")), "x").unwrap();
        }
        let capped = MutationEngine::new(f.engine.guard().clone(), Arc::clone(&f.ctx)).with_limits(100, 3);
        let listing = capped.list("main/src/main").unwrap();
        assert_eq!(listing.entries.len(), 3);
        assert_eq!(listing.overflow, 3);
        assert!(listing.render().ends_with("... and 3 more entries"));
    }

    #[test]
    fn test_write_creates_and_records() {
        let f = fixture();
        let outcome = f
            .engine
            .write("main/src/main/java/pkg/New.java", "class New {}", "add class")
            .unwrap();
        assert_eq!(outcome.path, "main/src/main/java/pkg/New.java");
        assert_eq!(
            std::fs::read_to_string(f.dir.path().join("main/src/main/java/pkg/New.java")).unwrap(),
            "class New {}"
        );
        let records = f.ctx.mutations();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_new);
        assert_eq!(records[0].reason, "add class");
    }

    #[test]
    fn test_write_never_overwrites() {
        let f = fixture();
        for content in ["", "class App {}", "anything"] {
            assert!(matches!(
                f.engine.write("main/src/main/java/App.java", content, "r"),
                Err(SandboxError::AlreadyExists(_))
            ));
        }
        assert!(!f.ctx.has_mutations());
    }

    #[test]
    fn test_write_enforces_size_and_extension() {
        let f = fixture();
        let big = "x".repeat(MAX_FILE_SIZE + 1);
        assert!(matches!(
            f.engine.write("main/src/main/Big.java", &big, "r"),
            Err(SandboxError::SizeExceeded { .. })
        ));
        assert!(!f.dir.path().join("main/src/main/Big.java").exists());
        assert!(matches!(
            f.engine.write("main/src/main/run.sh", "echo", "r"),
            Err(SandboxError::WrongExtension { .. })
        ));
    }

    #[test]
    fn test_patch_unique_match_round_trip() {
        let f = fixture();
        let outcome = f
            .engine
            .patch("main/src/main/java/App.java", "int a = 1;", "int a = 2;", "bump a")
            .unwrap();
        assert_eq!(outcome.line, 2);

        let content = f.engine.read("main/src/main/java/App.java").unwrap();
        assert_eq!(content.matches("int a = 2;").count(), 1);
        assert_eq!(content.matches("int a = 1;").count(), 0);

        let records = f.ctx.mutations();
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_new);
    }

    #[test]
    fn test_patch_ambiguous_never_mutates() {
        let f = fixture();
        let path = f.dir.path().join("main/src/main/java/App.java");
        let before = std::fs::read_to_string(&path).unwrap();

        let err = f
            .engine
            .patch("main/src/main/java/App.java", " = 1;", " = 3;", "r")
            .unwrap_err();
        assert!(matches!(err, SandboxError::AmbiguousMatch { count: 2, .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
        assert!(!f.ctx.has_mutations());
    }

    #[test]
    fn test_patch_not_found_is_strict_about_whitespace() {
        let f = fixture();
        assert!(matches!(
            f.engine.patch("main/src/main/java/App.java", "int  a = 1;", "x", "r"),
            Err(SandboxError::PatchNotFound(_))
        ));
        assert!(matches!(
            f.engine.patch("main/src/main/java/App.java", "", "x", "r"),
            Err(SandboxError::EmptyPattern)
        ));
        assert!(matches!(
            f.engine.patch("main/src/main/java/Missing.java", "a", "b", "r"),
            Err(SandboxError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_count_occurrences_overlapping() {
        assert_eq!(count_occurrences("aaa", "aa"), 2);
        assert_eq!(count_occurrences("abc", "d"), 0);
        assert_eq!(count_occurrences("héllo héllo", "héllo"), 2);
    }
}
