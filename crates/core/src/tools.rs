//! Built-in tool handlers and tool-call dispatch.
//!
//! Characters reference handlers by name; the table of handlers is fixed at
//! compile time. Arguments are validated against the tool's JSON Schema
//! (required keys and known property names) before the handler runs.

use crate::character::ToolDef;
use serde_json::{Map, Value};

/// A synchronous built-in tool handler. Returns the textual result that is
/// fed back to the LLM as a tool message.
pub type ToolHandler = fn(&Map<String, Value>) -> Result<String, ToolError>;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool references unknown handler: {0}")]
    UnknownHandler(String),
    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),
    #[error("tool execution failed: {0}")]
    Failed(String),
}

/// Looks up a handler in the built-in table.
pub fn lookup_handler(name: &str) -> Option<ToolHandler> {
    match name {
        "current_time" => Some(current_time),
        "arithmetic" => Some(arithmetic),
        _ => None,
    }
}

/// Validates `arguments` (a raw JSON string, as delivered by the LLM)
/// against the tool definition and runs its handler.
pub fn execute(def: &ToolDef, arguments: &str) -> Result<String, ToolError> {
    let handler = lookup_handler(&def.handler)
        .ok_or_else(|| ToolError::UnknownHandler(def.handler.clone()))?;
    let value: Value = serde_json::from_str(arguments)
        .map_err(|e| ToolError::InvalidArguments(format!("arguments are not valid JSON: {e}")))?;
    let args = validate_arguments(def, &value)?;
    handler(&args)
}

/// Checks that all required parameters are present and that no argument
/// falls outside the declared properties.
pub fn validate_arguments(def: &ToolDef, value: &Value) -> Result<Map<String, Value>, ToolError> {
    let args = value
        .as_object()
        .ok_or_else(|| ToolError::InvalidArguments("arguments must be a JSON object".into()))?;

    if let Some(required) = def.parameters.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(name) {
                return Err(ToolError::InvalidArguments(format!(
                    "missing required parameter \"{name}\""
                )));
            }
        }
    }
    if let Some(properties) = def.parameters.get("properties").and_then(Value::as_object) {
        for key in args.keys() {
            if !properties.contains_key(key) {
                return Err(ToolError::InvalidArguments(format!(
                    "unexpected parameter \"{key}\""
                )));
            }
        }
    }
    Ok(args.clone())
}

fn current_time(_args: &Map<String, Value>) -> Result<String, ToolError> {
    Ok(chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string())
}

fn arithmetic(args: &Map<String, Value>) -> Result<String, ToolError> {
    let operand = |name: &str| -> Result<f64, ToolError> {
        args.get(name)
            .and_then(Value::as_f64)
            .ok_or_else(|| ToolError::InvalidArguments(format!("\"{name}\" must be a number")))
    };
    let a = operand("a")?;
    let b = operand("b")?;
    let op = args.get("op").and_then(Value::as_str).unwrap_or("add");
    let result = match op {
        "add" => a + b,
        "subtract" => a - b,
        "multiply" => a * b,
        "divide" => {
            if b == 0.0 {
                return Err(ToolError::Failed("division by zero".into()));
            }
            a / b
        }
        other => {
            return Err(ToolError::InvalidArguments(format!(
                "unsupported op \"{other}\""
            )));
        }
    };
    Ok(result.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn arithmetic_def() -> ToolDef {
        ToolDef {
            name: "calculate".into(),
            description: None,
            parameters: json!({
                "type": "object",
                "properties": {
                    "a": { "type": "number" },
                    "b": { "type": "number" },
                    "op": { "type": "string" }
                },
                "required": ["a", "b"]
            }),
            handler: "arithmetic".into(),
        }
    }

    #[test]
    fn test_execute_arithmetic() {
        let def = arithmetic_def();
        let result = execute(&def, r#"{"a": 6, "b": 7, "op": "multiply"}"#).unwrap();
        assert_eq!(result, "42");
    }

    #[test]
    fn test_missing_required_parameter_rejected() {
        let def = arithmetic_def();
        let err = execute(&def, r#"{"a": 6}"#).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        assert!(err.to_string().contains("\"b\""));
    }

    #[test]
    fn test_unexpected_parameter_rejected() {
        let def = arithmetic_def();
        let err = execute(&def, r#"{"a": 1, "b": 2, "bogus": 3}"#).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn test_non_object_arguments_rejected() {
        let def = arithmetic_def();
        let err = execute(&def, r#"[1, 2]"#).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn test_unknown_handler() {
        let mut def = arithmetic_def();
        def.handler = "does_not_exist".into();
        let err = execute(&def, "{}").unwrap_err();
        assert!(matches!(err, ToolError::UnknownHandler(_)));
    }

    #[test]
    fn test_division_by_zero_fails() {
        let def = arithmetic_def();
        let err = execute(&def, r#"{"a": 1, "b": 0, "op": "divide"}"#).unwrap_err();
        assert!(matches!(err, ToolError::Failed(_)));
    }

    #[test]
    fn test_current_time_handler_exists() {
        let handler = lookup_handler("current_time").unwrap();
        let result = handler(&Map::new()).unwrap();
        assert!(!result.is_empty());
    }
}
