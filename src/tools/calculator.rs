//! Calculator toolkit.
//!
//! The arithmetic tools served by the math tool server: `add` and `multiply`.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{MathGraphError, Result};
use crate::tool::{Tool, ToolRegistry};

/// Create a calculator toolkit with every arithmetic tool.
pub fn calculator_toolkit() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(AddTool);
    registry.register(MultiplyTool);
    registry
}

fn binary_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "a": {"type": "number", "description": "First operand"},
            "b": {"type": "number", "description": "Second operand"}
        },
        "required": ["a", "b"]
    })
}

struct AddTool;

#[async_trait]
impl Tool for AddTool {
    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Add two numbers. Expects {\"a\": number, \"b\": number}."
    }

    fn parameters(&self) -> Option<Value> {
        Some(binary_schema())
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let a = get_number(&input, "a", "add")?;
        let b = get_number(&input, "b", "add")?;
        Ok(json!({ "operation": "addition", "result": normalize(a + b) }))
    }
}

struct MultiplyTool;

#[async_trait]
impl Tool for MultiplyTool {
    fn name(&self) -> &str {
        "multiply"
    }

    fn description(&self) -> &str {
        "Multiply two numbers. Expects {\"a\": number, \"b\": number}."
    }

    fn parameters(&self) -> Option<Value> {
        Some(binary_schema())
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let a = get_number(&input, "a", "multiply")?;
        let b = get_number(&input, "b", "multiply")?;
        Ok(json!({ "operation": "multiplication", "result": normalize(a * b) }))
    }
}

/// Models often send numbers as strings, so both forms are accepted.
fn get_number(input: &Value, key: &str, tool: &str) -> Result<f64> {
    let raw = input.get(key).ok_or_else(|| MathGraphError::InvalidArguments {
        tool: tool.to_string(),
        reason: format!("missing `{key}`"),
    })?;
    raw.as_f64()
        .or_else(|| raw.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
        .ok_or_else(|| MathGraphError::InvalidArguments {
            tool: tool.to_string(),
            reason: format!("`{key}` must be a number, got {raw}"),
        })
}

// Integral results are reported as integers so "8" reads as 8, not 8.0.
fn normalize(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        json!(value as i64)
    } else {
        json!(value)
    }
}
