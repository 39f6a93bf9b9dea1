//! Session runtime
//!
//! `ChatSession` is the effectful shell around the conversation reducer: one
//! task owns the state, applies commands and provider events in order, runs
//! the resulting effects and broadcasts every new snapshot.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::{ChatSession, SessionConfig};
pub use traits::*;

use crate::conversation::{ConversationState, TransitionError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Thread not found: {0}")]
    ThreadNotFound(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("Session is not running")]
    Closed,
}

type Reply = oneshot::Sender<Result<(), SessionError>>;

/// Requests from the panel, applied one at a time by the session task
#[derive(Debug)]
pub enum Command {
    SendMessage {
        text: String,
        reply: Reply,
    },
    Stop {
        reply: Reply,
    },
    NewThread {
        reply: Reply,
    },
    SelectThread {
        thread_id: String,
        reply: Reply,
    },
    ExecuteFunctionCall {
        message_id: String,
        content_id: String,
        reply: Reply,
    },
    SetAutoExecute {
        enabled: bool,
        reply: Reply,
    },
}

/// Cloneable handle to a running `ChatSession`
#[derive(Clone)]
pub struct SessionHandle {
    command_tx: mpsc::Sender<Command>,
    snapshot_rx: watch::Receiver<Arc<ConversationState>>,
}

impl SessionHandle {
    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(command(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn send_message(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let text = text.into();
        self.request(|reply| Command::SendMessage { text, reply })
            .await
    }

    pub async fn stop(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    pub async fn new_thread(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::NewThread { reply }).await
    }

    pub async fn select_thread(&self, thread_id: impl Into<String>) -> Result<(), SessionError> {
        let thread_id = thread_id.into();
        self.request(|reply| Command::SelectThread { thread_id, reply })
            .await
    }

    /// Run a proposed function call the user confirmed
    pub async fn execute_function_call(
        &self,
        message_id: impl Into<String>,
        content_id: impl Into<String>,
    ) -> Result<(), SessionError> {
        let message_id = message_id.into();
        let content_id = content_id.into();
        self.request(|reply| Command::ExecuteFunctionCall {
            message_id,
            content_id,
            reply,
        })
        .await
    }

    pub async fn set_auto_execute(&self, enabled: bool) -> Result<(), SessionError> {
        self.request(|reply| Command::SetAutoExecute { enabled, reply })
            .await
    }

    /// The latest snapshot
    pub fn snapshot(&self) -> Arc<ConversationState> {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver that is notified after every processed action
    pub fn subscribe(&self) -> watch::Receiver<Arc<ConversationState>> {
        self.snapshot_rx.clone()
    }
}
