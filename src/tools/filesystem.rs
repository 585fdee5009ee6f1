//! 沙箱文件系统边界
//!
//! AccessGuard 绑定一组白名单根目录（main / foundation / ai-support 等），所有路径先做词法规范化
//! （拒绝绝对路径与越界的 `..`），再解析符号链接，要求解析后的真实路径恰好落在一个根目录之下；
//! 任何一段命中构建产物目录（如 `target/`）都直接拒绝。写入类操作另需满足可写前缀、扩展名与文件名黑名单。
//! ListDirTool 基于 MutationEngine 提供目录列举能力。

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::SandboxError;
use crate::tools::mutation::MutationEngine;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::Tool;

/// 单个沙箱根目录：逻辑名（路径首段）、磁盘位置、可写前缀与可写扩展名
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxRoot {
    pub name: String,
    pub path: PathBuf,
    /// 相对根目录的可写前缀，如 `src/main/`；为空表示只读根
    #[serde(default)]
    pub writable_prefixes: Vec<String>,
    /// 可写扩展名（含点，如 `.java`）
    #[serde(default)]
    pub writable_extensions: Vec<String>,
}

impl SandboxRoot {
    pub fn new(name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            path: path.as_ref().to_path_buf(),
            writable_prefixes: Vec::new(),
            writable_extensions: Vec::new(),
        }
    }

    pub fn writable(mut self, prefixes: &[&str], extensions: &[&str]) -> Self {
        self.writable_prefixes = prefixes.iter().map(|p| p.to_string()).collect();
        self.writable_extensions = extensions.iter().map(|e| e.to_string()).collect();
        self
    }

    /// 是否允许在该根目录下创建或修改文件
    pub fn is_mutable(&self) -> bool {
        !self.writable_prefixes.is_empty()
    }
}

/// 通过校验的路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// 所属根目录的逻辑名
    pub root: String,
    /// 解析符号链接后相对根目录的路径（`/` 分隔）
    pub relative: String,
    /// Agent 视角的规范化路径，如 `main/src/main/App.java`
    pub display: String,
    /// 磁盘上的真实路径
    pub absolute: PathBuf,
}

#[derive(Debug, Clone)]
struct GuardedRoot {
    root: SandboxRoot,
    canonical: PathBuf,
    extensions: HashSet<String>,
}

/// 路径访问守卫
#[derive(Debug, Clone)]
pub struct AccessGuard {
    roots: Vec<GuardedRoot>,
    restricted_dirs: Vec<String>,
    blocked_filenames: Vec<String>,
}

impl AccessGuard {
    pub fn new(roots: Vec<SandboxRoot>) -> Self {
        let roots = roots
            .into_iter()
            .map(|root| {
                let canonical = root
                    .path
                    .canonicalize()
                    .unwrap_or_else(|_| root.path.clone());
                let extensions = root
                    .writable_extensions
                    .iter()
                    .map(|e| normalize_extension(e))
                    .collect();
                GuardedRoot {
                    root,
                    canonical,
                    extensions,
                }
            })
            .collect();
        Self {
            roots,
            restricted_dirs: vec!["target".to_string()],
            blocked_filenames: vec!["pom.xml".to_string(), "build.xml".to_string()],
        }
    }

    pub fn with_restricted_dirs(mut self, dirs: Vec<String>) -> Self {
        self.restricted_dirs = dirs;
        self
    }

    pub fn with_blocked_filenames(mut self, names: Vec<String>) -> Self {
        self.blocked_filenames = names;
        self
    }

    pub fn roots(&self) -> impl Iterator<Item = &SandboxRoot> {
        self.roots.iter().map(|r| &r.root)
    }

    /// 根目录解析后的真实路径
    pub fn root_dir(&self, name: &str) -> Option<&Path> {
        self.roots
            .iter()
            .find(|r| r.root.name == name)
            .map(|r| r.canonical.as_path())
    }

    pub fn is_restricted(&self, segment: &str) -> bool {
        self.restricted_dirs.iter().any(|d| d == segment)
    }

    /// 校验相对路径：规范化、解析符号链接，并确认落在恰好一个根目录内且不触碰受限目录
    pub fn validate(&self, path: &str) -> Result<ResolvedPath, SandboxError> {
        let trimmed = path.trim();
        if trimmed.is_empty() || trimmed.starts_with('/') || trimmed.starts_with('\\') {
            return Err(self.out_of_bounds(path));
        }

        let mut segments: Vec<String> = Vec::new();
        for component in Path::new(trimmed).components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    if segments.pop().is_none() {
                        return Err(self.out_of_bounds(path));
                    }
                }
                Component::Normal(seg) => segments.push(seg.to_string_lossy().into_owned()),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(self.out_of_bounds(path));
                }
            }
        }

        if let Some(segment) = segments.iter().find(|s| self.is_restricted(s)) {
            return Err(SandboxError::RestrictedDirectory {
                path: path.to_string(),
                segment: segment.clone(),
            });
        }

        let (first, rest) = segments
            .split_first()
            .ok_or_else(|| self.out_of_bounds(path))?;
        let guarded = self
            .roots
            .iter()
            .find(|r| &r.root.name == first)
            .ok_or_else(|| self.out_of_bounds(path))?;

        let lexical = rest
            .iter()
            .fold(guarded.canonical.clone(), |acc, seg| acc.join(seg));
        let resolved = resolve_existing(&lexical).ok_or_else(|| self.out_of_bounds(path))?;

        // 解析后的路径必须恰好属于一个根目录，且就是路径首段声明的那个
        let owners = self
            .roots
            .iter()
            .filter(|r| resolved.starts_with(&r.canonical))
            .count();
        if owners != 1 || !resolved.starts_with(&guarded.canonical) {
            return Err(self.out_of_bounds(path));
        }

        let relative_path = resolved
            .strip_prefix(&guarded.canonical)
            .map_err(|_| self.out_of_bounds(path))?;
        let mut relative_segments = Vec::new();
        for component in relative_path.components() {
            let seg = component.as_os_str().to_string_lossy().into_owned();
            if self.is_restricted(&seg) {
                return Err(SandboxError::RestrictedDirectory {
                    path: path.to_string(),
                    segment: seg,
                });
            }
            relative_segments.push(seg);
        }

        Ok(ResolvedPath {
            root: guarded.root.name.clone(),
            relative: relative_segments.join("/"),
            display: segments.join("/"),
            absolute: resolved,
        })
    }

    /// 写入类校验：在 validate 基础上要求可写前缀、扩展名白名单且非构建清单文件
    pub fn validate_writable(&self, path: &str) -> Result<ResolvedPath, SandboxError> {
        let resolved = self.validate(path)?;
        let guarded = self
            .roots
            .iter()
            .find(|r| r.root.name == resolved.root)
            .ok_or_else(|| self.out_of_bounds(path))?;

        if !guarded
            .root
            .writable_prefixes
            .iter()
            .any(|prefix| resolved.relative.starts_with(prefix.as_str()))
        {
            let prefixes = if guarded.root.writable_prefixes.is_empty() {
                "(read-only root)".to_string()
            } else {
                guarded.root.writable_prefixes.join(", ")
            };
            return Err(SandboxError::NotWritable {
                root: resolved.root.clone(),
                relative: resolved.relative.clone(),
                prefixes,
            });
        }

        let filename = Path::new(&resolved.relative)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.blocked_filenames.iter().any(|b| *b == filename) {
            return Err(SandboxError::BlockedFile(filename));
        }

        let ext = Path::new(&resolved.relative)
            .extension()
            .map(|e| normalize_extension(&e.to_string_lossy()))
            .unwrap_or_default();
        if !guarded.extensions.contains(&ext) {
            let mut allowed: Vec<&str> = guarded.extensions.iter().map(String::as_str).collect();
            allowed.sort_unstable();
            return Err(SandboxError::WrongExtension {
                ext: if ext.is_empty() { "(no extension)".to_string() } else { ext },
                allowed: allowed.join(", "),
            });
        }

        Ok(resolved)
    }

    fn out_of_bounds(&self, path: &str) -> SandboxError {
        let roots: Vec<String> = self.roots.iter().map(|r| format!("'{}/'", r.root.name)).collect();
        SandboxError::PathOutOfBounds {
            path: path.to_string(),
            roots: roots.join(", "),
        }
    }
}

/// `.JAVA` / `java` -> `.java`
fn normalize_extension(ext: &str) -> String {
    let lower = ext.trim().to_lowercase();
    if lower.is_empty() || lower.starts_with('.') {
        lower
    } else {
        format!(".{}", lower)
    }
}

/// 解析符号链接：对最深的已存在祖先做 canonicalize，再拼回尚不存在的尾部。
/// 存在但无法解析的条目（悬空符号链接）返回 None。
fn resolve_existing(path: &Path) -> Option<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(canonical) => {
                return Some(tail.iter().rev().fold(canonical, |acc, seg| acc.join(seg)));
            }
            Err(_) => {
                if existing.symlink_metadata().is_ok() {
                    return None;
                }
                let name = existing.file_name()?.to_os_string();
                tail.push(name);
                existing = existing.parent()?.to_path_buf();
            }
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ListDirParams {
    /// Relative directory path, e.g. 'main/src/main/resources/'
    path: String,
}

/// list_directory 工具：列出沙箱目录的直接子项
pub struct ListDirTool {
    engine: Arc<MutationEngine>,
}

impl ListDirTool {
    pub fn new(engine: Arc<MutationEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List files and subdirectories in a directory of the project or Foundation repository. Path must start with 'main/', 'foundation/', or 'ai-support/'."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ListDirParams>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let params: ListDirParams = parse_args(args)?;
        tracing::info!(path = %params.path, "list_directory tool execute");
        let listing = self.engine.list(&params.path).map_err(|e| e.to_string())?;
        Ok(listing.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> (tempfile::TempDir, AccessGuard) {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["main/src/main", "foundation/core/src/main", "ai-support", "main/target"] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        std::fs::write(dir.path().join("main/src/main/App.java"), "class App {}").unwrap();
        let guard = AccessGuard::new(vec![
            SandboxRoot::new("main", dir.path().join("main"))
                .writable(&["src/main/"], &[".java", ".yml"]),
            SandboxRoot::new("foundation", dir.path().join("foundation"))
                .writable(&["core/src/main/"], &[".java"]),
            SandboxRoot::new("ai-support", dir.path().join("ai-support")),
        ]);
        (dir, guard)
    }

    #[test]
    fn test_validate_accepts_paths_inside_roots() {
        let (_dir, guard) = sandbox();
        let resolved = guard.validate("main/src/main/App.java").unwrap();
        assert_eq!(resolved.root, "main");
        assert_eq!(resolved.relative, "src/main/App.java");
        assert_eq!(resolved.display, "main/src/main/App.java");

        // 尚不存在的文件也可以解析
        let new_file = guard.validate("main/src/main/sub/New.java").unwrap();
        assert_eq!(new_file.relative, "src/main/sub/New.java");

        // 根内的 `..` 合法
        let dotted = guard.validate("main/src/../src/main/App.java").unwrap();
        assert_eq!(dotted.relative, "src/main/App.java");
    }

    #[test]
    fn test_validate_rejects_escapes() {
        let (_dir, guard) = sandbox();
        for bad in [
            "/etc/passwd",
            "../etc/passwd",
            "main/../../etc/passwd",
            "other/file.txt",
            "",
            "main/src/../../../../etc/passwd",
        ] {
            assert!(
                matches!(guard.validate(bad), Err(SandboxError::PathOutOfBounds { .. })),
                "expected out-of-bounds for {bad:?}"
            );
        }
    }

    #[test]
    fn test_validate_rejects_restricted_segments() {
        let (_dir, guard) = sandbox();
        assert!(matches!(
            guard.validate("main/target/classes/App.class"),
            Err(SandboxError::RestrictedDirectory { .. })
        ));
        assert!(matches!(
            guard.validate("ai-support/target"),
            Err(SandboxError::RestrictedDirectory { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_validate_rejects_symlink_escape() {
        let (dir, guard) = sandbox();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("main/src/main/link")).unwrap();

        assert!(matches!(
            guard.validate("main/src/main/link/secret.txt"),
            Err(SandboxError::PathOutOfBounds { .. })
        ));
        assert!(matches!(
            guard.validate("main/src/main/link/new.java"),
            Err(SandboxError::PathOutOfBounds { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_validate_rejects_symlink_into_other_root() {
        let (dir, guard) = sandbox();
        std::os::unix::fs::symlink(
            dir.path().join("foundation/core"),
            dir.path().join("main/src/main/shared"),
        )
        .unwrap();
        assert!(guard.validate("main/src/main/shared/src").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_validate_rejects_symlink_into_build_output() {
        let (dir, guard) = sandbox();
        std::os::unix::fs::symlink(
            dir.path().join("main/target"),
            dir.path().join("main/src/main/out"),
        )
        .unwrap();
        assert!(matches!(
            guard.validate("main/src/main/out"),
            Err(SandboxError::RestrictedDirectory { .. })
        ));
    }

    #[test]
    fn test_validate_writable_rules() {
        let (_dir, guard) = sandbox();
        assert!(guard.validate_writable("main/src/main/New.java").is_ok());
        assert!(guard.validate_writable("main/src/main/config.YML").is_ok());

        assert!(matches!(
            guard.validate_writable("main/README.java"),
            Err(SandboxError::NotWritable { .. })
        ));
        assert!(matches!(
            guard.validate_writable("main/src/main/script.sh"),
            Err(SandboxError::WrongExtension { .. })
        ));
        assert!(matches!(
            guard.validate_writable("ai-support/notes.java"),
            Err(SandboxError::NotWritable { .. })
        ));
    }

    #[test]
    fn test_validate_writable_blocks_build_manifests() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("main")).unwrap();
        let guard = AccessGuard::new(vec![
            SandboxRoot::new("main", dir.path().join("main")).writable(&[""], &[".xml"]),
        ]);
        assert!(matches!(
            guard.validate_writable("main/pom.xml"),
            Err(SandboxError::BlockedFile(_))
        ));
        assert!(guard.validate_writable("main/plugin.xml").is_ok());
    }
}
