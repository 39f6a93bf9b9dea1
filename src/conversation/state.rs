//! Conversation state

use super::message::{Message, Thread};
use serde::Serialize;

/// Identity of one provider turn.
///
/// Events are applied only while their turn is the active one and its
/// thread is still current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnRef {
    pub id: u64,
    pub thread_id: String,
    /// User message (or function-call message) the turn answers
    pub origin_message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnPhase {
    #[default]
    Idle,
    /// A provider turn is in flight; `reply_id` is set once it announced
    /// its assistant message
    AwaitingReply {
        turn: TurnRef,
        reply_id: Option<String>,
    },
    /// The last reply proposed function calls that have not all run yet
    AwaitingTools { message_id: String },
}

/// Immutable snapshot of the session's conversation.
///
/// Transitions produce a new value; readers holding an older snapshot never
/// observe a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationState {
    pub thread: Thread,
    /// Whether `thread` exists in the store yet
    pub thread_saved: bool,
    pub messages: Vec<Message>,
    pub phase: TurnPhase,
    pub auto_execute: bool,
    pub model: String,
    #[serde(skip)]
    pub(super) next_turn: u64,
}

impl ConversationState {
    pub fn new(thread: Thread, model: impl Into<String>, auto_execute: bool) -> Self {
        Self {
            thread,
            thread_saved: false,
            messages: Vec::new(),
            phase: TurnPhase::Idle,
            auto_execute,
            model: model.into(),
            next_turn: 1,
        }
    }

    pub fn waiting_for_reply(&self) -> bool {
        matches!(self.phase, TurnPhase::AwaitingReply { .. })
    }

    pub fn active_turn(&self) -> Option<&TurnRef> {
        match &self.phase {
            TurnPhase::AwaitingReply { turn, .. } => Some(turn),
            _ => None,
        }
    }

    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    pub(super) fn message_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }

    /// Allocate a turn id for the current thread
    pub(super) fn allocate_turn(&mut self, origin_message_id: &str) -> TurnRef {
        let id = self.next_turn;
        self.next_turn += 1;
        TurnRef {
            id,
            thread_id: self.thread.id.clone(),
            origin_message_id: origin_message_id.to_string(),
        }
    }

    /// True if `turn` is the in-flight turn of the current thread
    pub fn is_current(&self, turn: &TurnRef) -> bool {
        turn.thread_id == self.thread.id && self.active_turn() == Some(turn)
    }
}
