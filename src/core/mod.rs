//! 核心编排层：错误、运行上下文、会话监管、阶段编排与产物输出

pub mod artifacts;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod session_supervisor;

pub use artifacts::ArtifactWriter;
pub use context::{IncomingComment, MutationRecord, RunContext, RunEvent, MAX_ISSUE_BODY};
pub use error::{AgentError, SandboxError};
pub use orchestrator::{PhaseOrchestrator, PhaseTimeouts, RunOutcome, SkipReason};
pub use session_supervisor::{SessionSpec, SessionSupervisor, TurnOptions};
