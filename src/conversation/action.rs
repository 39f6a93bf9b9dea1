//! Inputs to the conversation reducer

use super::message::{FunctionCallResult, Message, Thread};
use super::state::TurnRef;
use crate::provider::{ProviderError, ProviderMessageEvent};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub enum Action {
    /// The user sent a message. When the page context could not be read,
    /// `context_ok` is false and the message carries the error.
    UserMessage {
        message: Message,
        context_ok: bool,
        instructions: Option<String>,
    },

    /// An event streamed by the provider for `turn`
    Provider {
        turn: TurnRef,
        event: ProviderMessageEvent,
        received_at: DateTime<Utc>,
    },

    /// The provider call for `turn` returned an error
    ProviderFailed { turn: TurnRef, error: ProviderError },

    Stop,

    NewThread { thread: Thread },

    SelectThread {
        thread: Thread,
        messages: Vec<Message>,
    },

    /// The user confirmed a proposed function call
    ExecuteFunctionCall {
        message_id: String,
        content_id: String,
    },

    FunctionCallFinished {
        message_id: String,
        content_id: String,
        result: FunctionCallResult,
    },

    SetAutoExecute { enabled: bool },
}
