use futures::future::BoxFuture;
use serde_json::json;

use arbor_core::error::{ArborError, Result};
use arbor_core::state::ToolResult;
use arbor_core::traits::Tool;
use arbor_core::types::ToolContext;

use super::number;

pub struct AddTool;

impl Tool for AddTool {
    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Add two numbers"
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "a": { "type": "number" },
                "b": { "type": "number" }
            },
            "required": ["a", "b"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let a = operand(&input, "a")?;
            let b = operand(&input, "b")?;
            Ok(ToolResult::ok(number(a + b)))
        })
    }

    fn timeout_secs(&self) -> u64 {
        5
    }
}

pub struct ProductTool;

impl Tool for ProductTool {
    fn name(&self) -> &str {
        "prod"
    }

    fn description(&self) -> &str {
        "Product of an array of numbers"
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "nums": {
                    "type": "array",
                    "items": { "type": "number" }
                }
            },
            "required": ["nums"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let nums = input["nums"].as_array().ok_or_else(|| ArborError::ToolValidation {
                tool: "prod".into(),
                message: "'nums' must be an array".into(),
            })?;
            let mut product = 1.0;
            for n in nums {
                product *= n.as_f64().ok_or_else(|| ArborError::ToolValidation {
                    tool: "prod".into(),
                    message: format!("not a number: {}", n),
                })?;
            }
            Ok(ToolResult::ok(number(product)))
        })
    }

    fn timeout_secs(&self) -> u64 {
        5
    }
}

fn operand(input: &serde_json::Value, key: &str) -> Result<f64> {
    input[key].as_f64().ok_or_else(|| ArborError::ToolValidation {
        tool: "add".into(),
        message: format!("'{}' must be a number", key),
    })
}
