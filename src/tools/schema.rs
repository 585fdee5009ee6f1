//! 工具参数 Schema 与解析（schemars 自动生成工具 Schema）
//!
//! 每个工具定义一个带 `JsonSchema` 的参数结构体：schema_of 生成下发给 Agent 的 JSON Schema，
//! parse_args 把 Agent 传来的 JSON 参数反序列化为该结构体。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// 生成参数结构体的 JSON Schema（去掉 `$schema` / `title` 等元信息）
pub fn schema_of<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| {
        serde_json::json!({ "type": "object", "properties": {} })
    });
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

/// 将工具参数反序列化为强类型结构体，失败时给出可读的错误文本
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[allow(dead_code)]
    #[derive(Debug, Deserialize, JsonSchema)]
    struct Params {
        /// File path
        path: String,
        #[serde(default)]
        limit: Option<u32>,
    }

    #[test]
    fn test_schema_lists_fields_and_required() {
        let schema = schema_of::<Params>();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["path"].is_object());
        assert_eq!(schema["properties"]["path"]["description"], "File path");
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(required, vec!["path"]);
        assert!(schema.get("$schema").is_none());
    }

    #[test]
    fn test_parse_args_reports_missing_field() {
        let err = parse_args::<Params>(serde_json::json!({ "limit": 3 })).unwrap_err();
        assert!(err.starts_with("Invalid arguments"));
        assert!(err.contains("path"));
    }
}
