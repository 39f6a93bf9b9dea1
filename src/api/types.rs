//! API request and response types

use crate::conversation::{ConversationState, Message, Thread, TurnPhase};
use serde::{Deserialize, Serialize};

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

/// Request to run a proposed function call
#[derive(Debug, Deserialize)]
pub struct ExecuteFunctionCallRequest {
    pub message_id: String,
    pub content_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SettingsRequest {
    pub auto_execute: bool,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

/// What the panel renders: the conversation plus the derived busy flag
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub thread: Thread,
    pub messages: Vec<Message>,
    pub phase: TurnPhase,
    pub waiting_for_reply: bool,
    pub auto_execute: bool,
    pub model: String,
}

impl From<&ConversationState> for SessionView {
    fn from(state: &ConversationState) -> Self {
        Self {
            thread: state.thread.clone(),
            messages: state.messages.clone(),
            phase: state.phase.clone(),
            waiting_for_reply: state.waiting_for_reply(),
            auto_execute: state.auto_execute,
            model: state.model.clone(),
        }
    }
}

/// Response with the stored threads
#[derive(Debug, Serialize)]
pub struct ThreadListResponse {
    pub threads: Vec<Thread>,
}

/// Whether a provider token is configured; the token itself is never returned
#[derive(Debug, Serialize)]
pub struct TokenStatusResponse {
    pub provider: String,
    pub has_token: bool,
}

/// Response for actions
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
