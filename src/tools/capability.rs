//! 能力注册表：根据分类得到的实现意图裁剪主会话的工具集
//!
//! - Implement / AnswerOnly：完整工具集
//! - Declined：移除所有 `mutates() == true` 的工具，并在系统指令末尾追加禁止提出修改的说明
//!
//! 读取、搜索、列目录、抓取 URL、笔记、洞察等只读工具始终保留。

use std::path::Path;
use std::sync::Arc;

use crate::core::RunContext;
use crate::react::ImplementationIntent;
use crate::tools::{
    FetchUrlTool, ListDirTool, MutationEngine, PatchFileTool, ReadFileTool, ReadNotesTool, SearchCodebaseTool,
    StoreInsightTool, ToolRegistry, WriteFileTool, WriteNoteTool,
};

pub const DECLINED_NOTICE: &str = "\n\n## CRITICAL: Feature Declined\n\
A maintainer or collaborator has explicitly declined or rejected this feature request in the conversation above. You MUST NOT:\n\
- Propose code changes, patches, or pull requests\n\
- Use write_codebase_file or patch_codebase_file\n\
- Suggest implementing the requested feature\n\n\
Instead, politely explain the decision and answer any remaining questions the user has.";

/// 某一轮的工具集与附加指令
#[derive(Clone)]
pub struct ToolSet {
    pub tools: ToolRegistry,
    pub instructions_suffix: Option<&'static str>,
}

impl ToolSet {
    /// 基础系统指令加上附加说明
    pub fn instructions(&self, base: &str) -> String {
        match self.instructions_suffix {
            Some(suffix) => format!("{}{}", base, suffix),
            None => base.to_string(),
        }
    }
}

pub struct CapabilityRegistry {
    tools: ToolRegistry,
}

impl CapabilityRegistry {
    pub fn new(tools: ToolRegistry) -> Self {
        Self { tools }
    }

    /// 注册全部标准工具
    pub fn standard(
        engine: Arc<MutationEngine>,
        ctx: Arc<RunContext>,
        working_dir: &Path,
        max_search_results: usize,
    ) -> Self {
        let mut tools = ToolRegistry::new();
        tools.register(ReadFileTool::new(Arc::clone(&engine)));
        tools.register(ListDirTool::new(Arc::clone(&engine)));
        tools.register(SearchCodebaseTool::new(Arc::clone(&engine)).with_limit(max_search_results));
        tools.register(WriteFileTool::new(Arc::clone(&engine)));
        tools.register(PatchFileTool::new(engine));
        tools.register(FetchUrlTool::new());
        tools.register(StoreInsightTool::new(ctx));
        tools.register(WriteNoteTool::new(working_dir));
        tools.register(ReadNotesTool::new(working_dir));
        Self::new(tools)
    }

    pub fn all(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn tools_for(&self, intent: ImplementationIntent) -> ToolSet {
        match intent {
            ImplementationIntent::Declined => {
                tracing::info!("intent declined, stripping mutation tools");
                ToolSet {
                    tools: self.tools.filtered(|t| !t.mutates()),
                    instructions_suffix: Some(DECLINED_NOTICE),
                }
            }
            ImplementationIntent::Implement | ImplementationIntent::AnswerOnly => ToolSet {
                tools: self.tools.clone(),
                instructions_suffix: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InsightStore;
    use crate::tools::filesystem::{AccessGuard, SandboxRoot};

    fn registry(dir: &Path) -> CapabilityRegistry {
        let guard = AccessGuard::new(vec![SandboxRoot::new("main", dir.join("main"))]);
        let ctx = Arc::new(RunContext::new("p", 1, InsightStore::new(dir.join("insights"), "p")));
        let engine = Arc::new(MutationEngine::new(guard, Arc::clone(&ctx)));
        CapabilityRegistry::standard(engine, ctx, &dir.join("working"), crate::tools::MAX_SEARCH_RESULTS)
    }

    #[test]
    fn test_declined_excludes_every_mutation_tool() {
        let dir = tempfile::tempdir().unwrap();
        let caps = registry(dir.path());

        let declined = caps.tools_for(ImplementationIntent::Declined);
        let names = declined.tools.tool_names();
        assert!(!names.contains(&"write_codebase_file".to_string()));
        assert!(!names.contains(&"patch_codebase_file".to_string()));
        for always_on in [
            "read_codebase_file",
            "list_directory",
            "search_codebase",
            "fetch_url",
            "store_insight",
        ] {
            assert!(names.contains(&always_on.to_string()), "{always_on} missing");
        }
        assert!(declined.instructions("base").starts_with("base\n\n## CRITICAL: Feature Declined"));
    }

    #[test]
    fn test_implement_and_answer_only_keep_full_set() {
        let dir = tempfile::tempdir().unwrap();
        let caps = registry(dir.path());
        for intent in [ImplementationIntent::Implement, ImplementationIntent::AnswerOnly] {
            let set = caps.tools_for(intent);
            assert_eq!(set.tools.tool_names(), caps.all().tool_names());
            assert_eq!(set.tools.tool_names().len(), 9);
            assert_eq!(set.instructions("base"), "base");
        }
    }
}
