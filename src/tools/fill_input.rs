//! `fill_input`: type a value into a form field

use super::{FunctionTool, ToolContext};
use crate::conversation::FunctionCallResult;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

pub struct FillInputTool;

#[derive(Debug, Deserialize)]
struct FillInputInput {
    selector: String,
    value: String,
}

#[async_trait]
impl FunctionTool for FillInputTool {
    fn name(&self) -> &'static str {
        "fill_input"
    }

    fn description(&self) -> String {
        "Fill an input, textarea or select on the current page with a value. Fires the same input and change events a user would.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["selector", "value"],
            "properties": {
                "selector": {
                    "type": "string",
                    "description": "CSS selector of the field"
                },
                "value": {
                    "type": "string",
                    "description": "Value to enter"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> FunctionCallResult {
        let input: FillInputInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return FunctionCallResult::failed(format!("Invalid input: {e}")),
        };

        match ctx.browser().fill_input(&input.selector, &input.value).await {
            Ok(()) => {
                tracing::debug!(selector = %input.selector, "Filled input");
                FunctionCallResult::ok()
            }
            Err(e) => FunctionCallResult::failed(e.to_string()),
        }
    }
}
