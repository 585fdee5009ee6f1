//! 认知层：意图分类与各阶段提示词

pub mod intent;
pub mod prompts;

pub use intent::{is_trivial_reply, ImplementationIntent, IntentClassifier};
