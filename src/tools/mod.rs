//! 工具层：沙箱（AccessGuard / MutationEngine）、面向 Agent 的工具、注册表与执行器、能力门控

pub mod capability;
pub mod code_edit;
pub mod code_grep;
pub mod code_read;
pub mod code_write;
pub mod executor;
pub mod fetch;
pub mod filesystem;
pub mod git_diff;
pub mod insight;
pub mod mutation;
pub mod notes;
pub mod registry;
pub mod schema;

pub use capability::{CapabilityRegistry, ToolSet, DECLINED_NOTICE};
pub use code_edit::PatchFileTool;
pub use code_grep::{SearchCodebaseTool, MAX_SEARCH_RESULTS};
pub use code_read::ReadFileTool;
pub use code_write::WriteFileTool;
pub use executor::{ToolExecutor, ERROR_PREFIX};
pub use fetch::{FetchUrlTool, MAX_FETCH_SIZE};
pub use filesystem::{AccessGuard, ListDirTool, ResolvedPath, SandboxRoot};
pub use git_diff::{combined_diff, MAX_DIFF_SIZE};
pub use insight::StoreInsightTool;
pub use mutation::{Listing, MutationEngine, PatchOutcome, WriteOutcome, MAX_FILE_SIZE, MAX_LIST_ENTRIES};
pub use notes::{reset_working_dir, ReadNotesTool, WriteNoteTool};
pub use registry::{Tool, ToolRegistry};
