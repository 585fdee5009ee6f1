//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找，
//! ToolExecutor 在调用时加超时并把结果序列化为给 Agent 的纯文本。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（Agent 调用时使用）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 是否会创建或修改沙箱内文件；为 true 的工具受能力门控
    fn mutates(&self) -> bool {
        false
    }

    /// 执行工具；Err 中的文本会以错误前缀返回给 Agent
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>，可廉价克隆后按能力裁剪
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<String, String> {
        let tool = self.tools.get(name).ok_or_else(|| format!("Unknown tool: {name}"))?;
        tool.execute(args).await
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 按名称排序的工具名
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 仅保留满足条件的工具
    pub fn filtered(&self, keep: impl Fn(&dyn Tool) -> bool) -> Self {
        Self {
            tools: self
                .tools
                .iter()
                .filter(|(_, tool)| keep(tool.as_ref()))
                .map(|(name, tool)| (name.clone(), Arc::clone(tool)))
                .collect(),
        }
    }

    /// OpenAI function-calling 格式的工具定义，按名称排序
    pub fn to_function_specs(&self) -> Vec<Value> {
        self.tool_names()
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.parameters_schema()
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echo"
        }
        async fn execute(&self, args: Value) -> Result<String, String> {
            Ok(args.to_string())
        }
    }

    struct Writer;

    #[async_trait]
    impl Tool for Writer {
        fn name(&self) -> &str {
            "writer"
        }
        fn description(&self) -> &str {
            "writes"
        }
        fn mutates(&self) -> bool {
            true
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("nope".to_string())
        }
    }

    #[tokio::test]
    async fn test_filtered_and_unknown_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Echo);
        registry.register(Writer);

        let read_only = registry.filtered(|t| !t.mutates());
        assert_eq!(read_only.tool_names(), vec!["echo".to_string()]);
        assert_eq!(registry.tool_names().len(), 2);

        let err = read_only.execute("writer", Value::Null).await.unwrap_err();
        assert!(err.contains("Unknown tool"));
    }

    #[test]
    fn test_function_specs_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Writer);
        registry.register(Echo);
        let specs = registry.to_function_specs();
        assert_eq!(specs[0]["function"]["name"], "echo");
        assert_eq!(specs[1]["function"]["name"], "writer");
        assert_eq!(specs[0]["type"], "function");
    }
}
