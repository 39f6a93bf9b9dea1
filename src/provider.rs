//! Assistant provider abstraction
//!
//! Providers answer a turn by pushing `ProviderMessageEvent`s into an
//! `EventSink`; the returned future completes once the stream is over.

mod error;
pub mod event;
mod mock;
mod openai;
mod registry;
mod types;

pub use error::{ProviderError, ProviderErrorKind};
pub use event::{EventSink, ProviderMessageEvent};
pub use mock::{MockProvider, MOCK_REPLY};
pub use openai::OpenAiProvider;
pub use registry::{ProviderConfig, ProviderKind, ProviderRegistry};
pub use types::{FunctionCallTurn, ToolDefinition, TurnRequest};

use async_trait::async_trait;
use std::sync::Arc;

/// Common interface for assistant backends
#[async_trait]
pub trait AssistantProvider: Send + Sync {
    /// Answer a new user message
    async fn send_message(&self, request: TurnRequest, sink: EventSink)
        -> Result<(), ProviderError>;

    /// Continue a turn after its proposed function calls have run
    async fn send_function_call_response(
        &self,
        request: FunctionCallTurn,
        sink: EventSink,
    ) -> Result<(), ProviderError>;

    fn name(&self) -> &str;
}

/// Logging wrapper for providers
pub struct LoggingProvider {
    inner: Arc<dyn AssistantProvider>,
    name: String,
}

impl LoggingProvider {
    pub fn new(inner: Arc<dyn AssistantProvider>) -> Self {
        let name = inner.name().to_string();
        Self { inner, name }
    }

    fn log_outcome(
        &self,
        operation: &str,
        model: &str,
        start: std::time::Instant,
        result: &Result<(), ProviderError>,
    ) {
        let duration = start.elapsed();
        match result {
            Ok(()) => {
                tracing::info!(
                    provider = %self.name,
                    operation,
                    model,
                    duration_ms = %duration.as_millis(),
                    "Provider turn finished"
                );
            }
            Err(e) if e.is_cancellation() => {
                tracing::debug!(
                    provider = %self.name,
                    operation,
                    duration_ms = %duration.as_millis(),
                    "Provider turn cancelled"
                );
            }
            Err(e) => {
                tracing::error!(
                    provider = %self.name,
                    operation,
                    model,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = e.kind.as_str(),
                    "Provider turn failed"
                );
            }
        }
    }
}

#[async_trait]
impl AssistantProvider for LoggingProvider {
    async fn send_message(
        &self,
        request: TurnRequest,
        sink: EventSink,
    ) -> Result<(), ProviderError> {
        let start = std::time::Instant::now();
        let model = request.model.clone();
        let result = self.inner.send_message(request, sink).await;
        self.log_outcome("send_message", &model, start, &result);
        result
    }

    async fn send_function_call_response(
        &self,
        request: FunctionCallTurn,
        sink: EventSink,
    ) -> Result<(), ProviderError> {
        let start = std::time::Instant::now();
        let model = request.model.clone();
        let result = self.inner.send_function_call_response(request, sink).await;
        self.log_outcome("send_function_call_response", &model, start, &result);
        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}
