//! Canned provider used for development and tests

use super::{
    AssistantProvider, EventSink, FunctionCallTurn, ProviderError, ProviderMessageEvent,
    TurnRequest,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

pub const MOCK_REPLY: &str = "Hello, how can I help you today?";
pub const DEFAULT_MOCK_LATENCY: Duration = Duration::from_millis(500);

/// Replies to everything with the same greeting after a fixed delay.
///
/// A new call or `cancel()` before the delay elapses clears the in-progress
/// latch of the pending call, which then emits nothing.
pub struct MockProvider {
    latency: Duration,
    in_progress: AtomicBool,
    generation: AtomicU64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(DEFAULT_MOCK_LATENCY)
    }
}

impl MockProvider {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            in_progress: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Clear the latch so a pending reply is dropped
    #[cfg(test)]
    pub fn cancel(&self) {
        self.in_progress.store(false, Ordering::SeqCst);
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    async fn reply(
        &self,
        thread_id: &str,
        user_message_id: &str,
        sink: &EventSink,
    ) -> Result<(), ProviderError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.in_progress.store(true, Ordering::SeqCst);

        tokio::select! {
            () = tokio::time::sleep(self.latency) => {}
            () = sink.cancelled() => {
                self.release(generation);
                return Ok(());
            }
        }

        // Superseded by a newer call, or cancelled through the latch
        if self.generation.load(Ordering::SeqCst) != generation || !self.is_in_progress() {
            return Ok(());
        }

        let message_id = format!("mock_{}", uuid::Uuid::new_v4());
        let events = [
            ProviderMessageEvent::Created {
                message_id: message_id.clone(),
                thread_id: thread_id.to_string(),
            },
            ProviderMessageEvent::OutputTextDelta {
                message_id: message_id.clone(),
                content_id: format!("{message_id}-text"),
                text_delta: MOCK_REPLY.to_string(),
            },
            ProviderMessageEvent::Completed {
                message_id,
                user_message_id: user_message_id.to_string(),
                response_id: None,
            },
        ];
        for event in events {
            if !sink.emit(event).await {
                break;
            }
        }

        self.release(generation);
        Ok(())
    }

    fn release(&self, generation: u64) {
        if self.generation.load(Ordering::SeqCst) == generation {
            self.in_progress.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl AssistantProvider for MockProvider {
    async fn send_message(
        &self,
        request: TurnRequest,
        sink: EventSink,
    ) -> Result<(), ProviderError> {
        self.reply(&request.message.thread_id, &request.message.id, &sink)
            .await
    }

    async fn send_function_call_response(
        &self,
        request: FunctionCallTurn,
        sink: EventSink,
    ) -> Result<(), ProviderError> {
        self.reply(&request.message.thread_id, &request.message.id, &sink)
            .await
    }

    fn name(&self) -> &str {
        "mock"
    }
}
