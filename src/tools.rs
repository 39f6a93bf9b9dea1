//! Page-action functions the assistant can call
//!
//! Tools are stateless; the browser and cancellation signal arrive through
//! `ToolContext` on every invocation.

mod click_element;
mod fill_input;

pub use click_element::ClickElementTool;
pub use fill_input::FillInputTool;

use crate::browser::BrowserPort;
use crate::conversation::FunctionCallResult;
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// All context needed for a function call.
#[derive(Clone)]
pub struct ToolContext {
    /// Cancellation signal for long-running operations
    pub cancel: CancellationToken,

    browser: Arc<dyn BrowserPort>,
}

impl ToolContext {
    pub fn new(cancel: CancellationToken, browser: Arc<dyn BrowserPort>) -> Self {
        Self { cancel, browser }
    }

    pub fn browser(&self) -> &dyn BrowserPort {
        self.browser.as_ref()
    }
}

/// A function the assistant may propose
#[async_trait]
pub trait FunctionTool: Send + Sync {
    fn name(&self) -> &str;

    /// Description for the assistant
    fn description(&self) -> String;

    /// JSON schema for the arguments
    fn input_schema(&self) -> Value;

    /// Run with parsed arguments. Failures are reported in the result,
    /// never by panicking.
    async fn run(&self, input: Value, ctx: ToolContext) -> FunctionCallResult;
}

/// Functions available to the assistant
pub struct ToolRegistry {
    tools: Vec<Arc<dyn FunctionTool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn FunctionTool>>) -> Self {
        Self { tools }
    }

    /// The built-in page actions
    pub fn page_actions() -> Self {
        Self::new(vec![Arc::new(FillInputTool), Arc::new(ClickElementTool)])
    }

    /// Definitions advertised to the provider
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Resolve `name` and run it with the raw JSON `arguments`.
    pub async fn execute(&self, name: &str, arguments: &str, ctx: ToolContext) -> FunctionCallResult {
        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            return FunctionCallResult::failed(format!("Unknown function: {name}"));
        };

        let arguments = if arguments.trim().is_empty() {
            "{}"
        } else {
            arguments
        };
        let input: Value = match serde_json::from_str(arguments) {
            Ok(input) => input,
            Err(e) => return FunctionCallResult::failed(format!("Invalid arguments: {e}")),
        };

        if ctx.cancel.is_cancelled() {
            return FunctionCallResult::failed("Cancelled");
        }
        let cancel = ctx.cancel.clone();
        tokio::select! {
            result = tool.run(input, ctx) => result,
            () = cancel.cancelled() => FunctionCallResult::failed("Cancelled"),
        }
    }
}
