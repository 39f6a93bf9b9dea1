//! Effects produced by state transitions

use super::message::{Message, Thread};
use super::state::TurnRef;

/// Side effects the session runs after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Store a message that reached a terminal state
    PersistMessage { message: Message },

    /// Rewrite a stored message whose function calls have settled
    UpdateMessage { message: Message },

    PersistThread { thread: Thread, created: bool },

    /// Ask the provider to answer `message`
    RequestReply {
        turn: TurnRef,
        model: String,
        message: Message,
        instructions: Option<String>,
        history: Vec<Message>,
    },

    /// Report settled function calls of `message` back to the provider
    SendFunctionCallResults {
        turn: TurnRef,
        model: String,
        message: Message,
        history: Vec<Message>,
    },

    /// Run a function call (spawns as background task)
    ExecuteFunctionCall {
        message_id: String,
        content_id: String,
        name: String,
        arguments: String,
    },

    /// Cancel the provider call of `turn`
    AbortTurn { turn: TurnRef },
}

impl Effect {
    pub fn persist_thread(thread: &Thread, created: bool) -> Self {
        Effect::PersistThread {
            thread: thread.clone(),
            created,
        }
    }
}
