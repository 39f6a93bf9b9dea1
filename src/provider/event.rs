//! Streaming message-event protocol between providers and the conversation

use crate::conversation::ContentItem;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Incremental event produced while a provider answers a turn.
///
/// One `Created` precedes all deltas of a message. Exactly one terminal
/// event (`Completed`, `Fallback` or `Error`) ends the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderMessageEvent {
    Created {
        message_id: String,
        thread_id: String,
    },
    OutputTextDelta {
        message_id: String,
        content_id: String,
        text_delta: String,
    },
    FunctionCallProposed {
        message_id: String,
        content_id: String,
        name: String,
        arguments: String,
    },
    Completed {
        message_id: String,
        user_message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
    },
    /// Whole content at once, for responses that could not be streamed
    Fallback {
        content: Vec<ContentItem>,
        has_tools: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
    },
    Error {
        message: String,
    },
}

impl ProviderMessageEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Fallback { .. } | Self::Error { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::OutputTextDelta { .. } => "output_text_delta",
            Self::FunctionCallProposed { .. } => "function_call_proposed",
            Self::Completed { .. } => "completed",
            Self::Fallback { .. } => "fallback",
            Self::Error { .. } => "error",
        }
    }
}

/// Receiving end handed to a provider for one turn.
///
/// Emission stops for good once the turn's token is cancelled.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<ProviderMessageEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<ProviderMessageEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Create a sink plus the receiver the session drains
    pub fn channel(
        cancel: CancellationToken,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ProviderMessageEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx, cancel), rx)
    }

    /// Deliver an event. Returns `false` when the turn is over (cancelled or
    /// nobody is listening) and the provider should return.
    pub async fn emit(&self, event: ProviderMessageEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.send(event).await.is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the turn is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}
