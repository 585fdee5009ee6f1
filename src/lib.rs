//! Bee Responder - 问题分诊智能体
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 运行上下文、会话监管、三阶段编排与产物输出
//! - **llm**: Agent 后端抽象与实现（OpenAI 兼容 / 脚本化 Mock）
//! - **memory**: 洞察存储与会话历史
//! - **observability**: 日志初始化
//! - **react**: 意图分类与提示词
//! - **tools**: 沙箱化的代码读写工具、能力注册表与执行器

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;
