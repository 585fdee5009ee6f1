//! 记忆层：既往对话（只读输入）与跨运行持久化的洞察

pub mod conversation;
pub mod insights;

pub use conversation::{
    conversation_snippet, format_conversation, load_conversation, tagged_conversation, Association, Comment,
    MAX_CONVERSATION_SIZE,
};
pub use insights::{
    format_for_prompt, prune_insights, Insight, InsightError, InsightScope, InsightStore, NewInsight,
};
