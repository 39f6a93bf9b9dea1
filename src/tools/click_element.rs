//! `click_element`: click something on the page

use super::{FunctionTool, ToolContext};
use crate::conversation::FunctionCallResult;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

pub struct ClickElementTool;

#[derive(Debug, Deserialize)]
struct ClickElementInput {
    selector: String,
}

#[async_trait]
impl FunctionTool for ClickElementTool {
    fn name(&self) -> &'static str {
        "click_element"
    }

    fn description(&self) -> String {
        "Click an element on the current page, such as a button or link.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["selector"],
            "properties": {
                "selector": {
                    "type": "string",
                    "description": "CSS selector of the element to click"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> FunctionCallResult {
        let input: ClickElementInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return FunctionCallResult::failed(format!("Invalid input: {e}")),
        };

        match ctx.browser().click_element(&input.selector).await {
            Ok(()) => FunctionCallResult::ok(),
            Err(e) => FunctionCallResult::failed(e.to_string()),
        }
    }
}
