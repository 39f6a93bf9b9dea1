//! Request types handed to providers

use crate::conversation::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A new user message to answer
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub model: String,
    pub message: Message,
    pub instructions: Option<String>,
    /// Messages of the thread that precede `message`, oldest first
    pub history: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

/// Function-call results to report back.
///
/// `message` is the assistant message whose calls have all settled; each
/// call item carries its `result`.
#[derive(Debug, Clone)]
pub struct FunctionCallTurn {
    pub model: String,
    pub message: Message,
    pub history: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

/// Function definition advertised to the assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}
