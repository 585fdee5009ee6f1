//! 工具执行器
//!
//! 持有 ToolRegistry 与单次调用超时。invoke(tool_name, args) 是面向 Agent 的边界：
//! 工具内部的强类型错误在这里才序列化为带 `Error: ` 前缀的纯文本，Agent 只能按前缀识别失败；
//! 每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::tools::ToolRegistry;

/// 工具失败文本的统一前缀（线上协约：Agent 通过该前缀识别错误）
pub const ERROR_PREFIX: &str = "Error: ";

/// 工具执行器：对每次调用施加超时，并把结果映射为线上文本
#[derive(Clone)]
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 执行指定工具并返回单一文本结果；失败、超时均以 ERROR_PREFIX 开头，绝不向上抛错
    pub async fn invoke(&self, tool_name: &str, args: serde_json::Value) -> String {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, self.registry.execute(tool_name, args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) => content,
            Ok(Err(e)) => format!("{}{}", ERROR_PREFIX, e),
            Err(_) => format!(
                "{}Tool '{}' timed out after {}s",
                ERROR_PREFIX,
                tool_name,
                self.timeout.as_secs()
            ),
        }
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("File not found: main/x.java".to_string())
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test]
    async fn test_errors_become_prefixed_text() {
        let mut registry = ToolRegistry::new();
        registry.register(Failing);
        let executor = ToolExecutor::new(registry, 5);

        let out = executor.invoke("failing", Value::Null).await;
        assert_eq!(out, "Error: File not found: main/x.java");

        let unknown = executor.invoke("missing", Value::Null).await;
        assert!(unknown.starts_with(ERROR_PREFIX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_prefixed_text() {
        let mut registry = ToolRegistry::new();
        registry.register(Slow);
        let executor = ToolExecutor::new(registry, 30);

        let out = executor.invoke("slow", Value::Null).await;
        assert!(out.starts_with(ERROR_PREFIX));
        assert!(out.contains("timed out after 30s"));
    }
}
