//! `OpenAI` Responses API provider with streaming output

use super::{
    AssistantProvider, EventSink, FunctionCallTurn, ProviderError, ProviderMessageEvent,
    ToolDefinition, TurnRequest,
};
use crate::conversation::{ContentItem, FunctionCallResult, Message, Role};
use crate::runtime::TokenStorage;
use async_trait::async_trait;
use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Streams replies from `POST {base_url}/responses`.
///
/// The API key is looked up on every turn so a token saved through the
/// settings page takes effect without a restart.
pub struct OpenAiProvider {
    client: Client,
    endpoint: String,
    tokens: TokenStorage,
    fallback_api_key: Option<String>,
}

impl OpenAiProvider {
    pub fn new(
        base_url: Option<&str>,
        tokens: TokenStorage,
        fallback_api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let base_url = base_url.unwrap_or(DEFAULT_BASE_URL);
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/responses", base_url.trim_end_matches('/')),
            tokens,
            fallback_api_key,
        })
    }

    async fn api_key(&self) -> Result<String, ProviderError> {
        let stored = match self.tokens.get_token("openai").await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stored OpenAI token");
                None
            }
        };

        stored
            .or_else(|| self.fallback_api_key.clone())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                ProviderError::auth("No OpenAI API key configured. Add one in the settings page.")
            })
    }

    async fn stream_turn(
        &self,
        body: ResponsesRequest,
        turn: &TurnIds,
        sink: &EventSink,
    ) -> Result<(), ProviderError> {
        let api_key = self.api_key().await?;

        let send = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send();

        let response = tokio::select! {
            result = send => result.map_err(classify_transport_error)?,
            () = sink.cancelled() => return Err(ProviderError::cancelled()),
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_error(status.as_u16(), &body, retry_after));
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));

        if is_json {
            let body: ResponsesApiResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::unknown(format!("Failed to parse response: {e}")))?;
            return emit_fallback(body, turn, sink).await;
        }

        translate_stream(Box::pin(response.bytes_stream()), turn, sink, STREAM_IDLE_TIMEOUT).await
    }
}

#[async_trait]
impl AssistantProvider for OpenAiProvider {
    async fn send_message(
        &self,
        request: TurnRequest,
        sink: EventSink,
    ) -> Result<(), ProviderError> {
        let turn = TurnIds {
            thread_id: request.message.thread_id.clone(),
            user_message_id: request.message.id.clone(),
        };
        self.stream_turn(message_request(request), &turn, &sink).await
    }

    async fn send_function_call_response(
        &self,
        request: FunctionCallTurn,
        sink: EventSink,
    ) -> Result<(), ProviderError> {
        let turn = TurnIds {
            thread_id: request.message.thread_id.clone(),
            user_message_id: request.message.id.clone(),
        };
        self.stream_turn(function_results_request(request), &turn, &sink)
            .await
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Ids the translated events refer back to
struct TurnIds {
    thread_id: String,
    user_message_id: String,
}

// ============================================================================
// Request translation
// ============================================================================

const NOT_EXECUTED_OUTPUT: &str = r#"{"success":false,"error":"Not executed"}"#;

/// Body for a new user message.
///
/// A chained request carries only the new message, plus outputs for the
/// calls of the chained response, which have not reached the API yet.
fn message_request(request: TurnRequest) -> ResponsesRequest {
    let previous_response_id = latest_response_id(&request.history);
    let mut input = match &previous_response_id {
        Some(response_id) => pending_call_outputs(&request.history, response_id),
        None => history_items(&request.history),
    };
    input.extend(message_items(&request.message));

    ResponsesRequest::new(
        request.model,
        request.instructions,
        input,
        &request.tools,
        previous_response_id,
    )
}

/// Body reporting the settled calls of `request.message`, chained onto the
/// response that proposed them
fn function_results_request(request: FunctionCallTurn) -> ResponsesRequest {
    let previous_response_id = request.message.response_id.clone();
    let input = if previous_response_id.is_some() {
        function_call_outputs(&request.message)
    } else {
        let mut items = history_items(&request.history);
        items.extend(message_items(&request.message));
        items
    };

    ResponsesRequest::new(request.model, None, input, &request.tools, previous_response_id)
}

/// Response id of the most recent message that has one
fn latest_response_id(history: &[Message]) -> Option<String> {
    history
        .iter()
        .rev()
        .find_map(|message| message.response_id.clone())
}

/// Every call of the chained response needs an output item or the API rejects
/// the request. Calls that ran report their result even when the follow-up
/// that carried it was stopped.
fn pending_call_outputs(history: &[Message], response_id: &str) -> Vec<InputItem> {
    let Some(message) = history
        .iter()
        .rev()
        .find(|m| m.response_id.as_deref() == Some(response_id))
    else {
        return Vec::new();
    };

    message
        .content
        .iter()
        .filter_map(|item| match item {
            ContentItem::FunctionCall { id, result, .. } => Some(call_output(id, result.as_ref())),
            ContentItem::OutputText { .. } => None,
        })
        .collect()
}

fn history_items(history: &[Message]) -> Vec<InputItem> {
    history.iter().flat_map(message_items).collect()
}

fn message_items(message: &Message) -> Vec<InputItem> {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };

    let mut items = Vec::new();
    for item in &message.content {
        match item {
            ContentItem::OutputText { text, .. } => {
                if !text.is_empty() {
                    items.push(InputItem::Message {
                        role: role.to_string(),
                        content: text.clone(),
                    });
                }
            }
            ContentItem::FunctionCall {
                id,
                name,
                arguments,
                result,
                ..
            } => {
                items.push(InputItem::FunctionCall {
                    call_id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                });
                if let Some(result) = result {
                    items.push(call_output(id, Some(result)));
                }
            }
        }
    }
    items
}

/// `function_call_output` items for every call in the message that has a result
fn function_call_outputs(message: &Message) -> Vec<InputItem> {
    message
        .content
        .iter()
        .filter_map(|item| match item {
            ContentItem::FunctionCall {
                id,
                result: Some(result),
                ..
            } => Some(call_output(id, Some(result))),
            _ => None,
        })
        .collect()
}

fn call_output(call_id: &str, result: Option<&FunctionCallResult>) -> InputItem {
    let output = match result {
        Some(result) => serde_json::to_string(result)
            .unwrap_or_else(|_| r#"{"success":false}"#.to_string()),
        None => NOT_EXECUTED_OUTPUT.to_string(),
    };
    InputItem::FunctionCallOutput {
        call_id: call_id.to_string(),
        output,
    }
}

// ============================================================================
// Response translation
// ============================================================================

async fn emit_fallback(
    body: ResponsesApiResponse,
    turn: &TurnIds,
    sink: &EventSink,
) -> Result<(), ProviderError> {
    let content = fallback_content(body.output);
    let has_tools = content.iter().any(ContentItem::is_function_call);

    let created = ProviderMessageEvent::Created {
        message_id: body.id.clone(),
        thread_id: turn.thread_id.clone(),
    };
    if sink.emit(created).await {
        sink.emit(ProviderMessageEvent::Fallback {
            content,
            has_tools,
            response_id: Some(body.id),
        })
        .await;
    }
    Ok(())
}

fn fallback_content(output: Vec<OutputItem>) -> Vec<ContentItem> {
    let mut content = Vec::new();
    for item in output {
        match item.kind.as_str() {
            "message" => {
                for (index, part) in item.content.unwrap_or_default().into_iter().enumerate() {
                    if part.kind == "output_text" {
                        let id = match &item.id {
                            Some(id) => format!("{id}-{index}"),
                            None => format!("text-{index}"),
                        };
                        content.push(ContentItem::text(id, part.text.unwrap_or_default()));
                    }
                }
            }
            "function_call" => {
                if let (Some(call_id), Some(name)) = (item.call_id, item.name) {
                    content.push(ContentItem::function_call(
                        call_id,
                        name,
                        item.arguments.unwrap_or_else(|| "{}".to_string()),
                    ));
                }
            }
            other => {
                tracing::debug!(kind = other, "Ignoring output item");
            }
        }
    }
    content
}

/// Translate an upstream SSE byte stream into provider events.
///
/// Returns once a terminal event was emitted or the sink reports the turn is
/// over. A stream that ends without `response.completed` is an error.
async fn translate_stream<S, E>(
    stream: S,
    turn: &TurnIds,
    sink: &EventSink,
    idle_timeout: Duration,
) -> Result<(), ProviderError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut events = stream.eventsource();
    let mut message_id: Option<String> = None;

    loop {
        let next = tokio::select! {
            next = timeout(idle_timeout, events.next()) => next,
            () = sink.cancelled() => return Ok(()),
        };
        let sse = match next {
            Ok(Some(Ok(sse))) => sse,
            Ok(Some(Err(e))) => {
                return Err(ProviderError::network(format!("Stream error: {e}")));
            }
            Ok(None) => {
                return Err(ProviderError::network(
                    "stream closed before response.completed",
                ));
            }
            Err(_) => {
                return Err(ProviderError::network("idle timeout waiting for SSE"));
            }
        };

        if sse.data == "[DONE]" {
            continue;
        }
        let event: StreamEvent = match serde_json::from_str(&sse.data) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(error = %e, data = %sse.data, "Skipping unparseable SSE event");
                continue;
            }
        };

        let translated = match event.kind.as_str() {
            "response.created" => event.response.map(|response| {
                message_id = Some(response.id.clone());
                ProviderMessageEvent::Created {
                    message_id: response.id,
                    thread_id: turn.thread_id.clone(),
                }
            }),
            "response.output_text.delta" => match (&message_id, event.delta) {
                (Some(message_id), Some(delta)) => Some(ProviderMessageEvent::OutputTextDelta {
                    message_id: message_id.clone(),
                    content_id: event.item_id.unwrap_or_else(|| format!("{message_id}-text")),
                    text_delta: delta,
                }),
                _ => None,
            },
            "response.output_item.done" => match (&message_id, event.item) {
                (Some(message_id), Some(item)) if item.kind == "function_call" => {
                    match (item.call_id, item.name) {
                        (Some(call_id), Some(name)) => {
                            Some(ProviderMessageEvent::FunctionCallProposed {
                                message_id: message_id.clone(),
                                content_id: call_id,
                                name,
                                arguments: item.arguments.unwrap_or_else(|| "{}".to_string()),
                            })
                        }
                        _ => None,
                    }
                }
                _ => None,
            },
            "response.completed" => {
                let response_id = event.response.map(|r| r.id);
                match message_id.clone().or_else(|| response_id.clone()) {
                    Some(message_id) => Some(ProviderMessageEvent::Completed {
                        message_id,
                        user_message_id: turn.user_message_id.clone(),
                        response_id,
                    }),
                    None => Some(ProviderMessageEvent::Error {
                        message: "Response completed without being created".to_string(),
                    }),
                }
            }
            "response.failed" | "error" => Some(ProviderMessageEvent::Error {
                message: event
                    .response
                    .and_then(|r| r.error)
                    .or(event.error)
                    .map(|e| e.message)
                    .or(event.message)
                    .unwrap_or_else(|| "The assistant failed to respond".to_string()),
            }),
            _ => None,
        };

        if let Some(translated) = translated {
            let terminal = translated.is_terminal();
            if !sink.emit(translated).await || terminal {
                return Ok(());
            }
        }
    }
}

fn classify_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::network(format!("Request timeout: {e}"))
    } else if e.is_connect() {
        ProviderError::network(format!("Connection failed: {e}"))
    } else {
        ProviderError::unknown(format!("Request failed: {e}"))
    }
}

fn classify_http_error(status: u16, body: &str, retry_after: Option<Duration>) -> ProviderError {
    let detail = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());
    ProviderError::from_status(status, &detail, retry_after)
}

/// `Retry-After` in delay-seconds form; HTTP dates are ignored
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ResponsesRequest {
    model: String,
    input: Vec<InputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<FunctionToolSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_response_id: Option<String>,
    stream: bool,
    store: bool,
}

impl ResponsesRequest {
    fn new(
        model: String,
        instructions: Option<String>,
        input: Vec<InputItem>,
        tools: &[ToolDefinition],
        previous_response_id: Option<String>,
    ) -> Self {
        Self {
            model,
            input,
            instructions,
            tools: tools
                .iter()
                .map(|t| FunctionToolSpec {
                    kind: "function",
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                })
                .collect(),
            previous_response_id,
            stream: true,
            store: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InputItem {
    Message {
        role: String,
        content: String,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

#[derive(Debug, Serialize)]
struct FunctionToolSpec {
    #[serde(rename = "type")]
    kind: &'static str,
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    response: Option<StreamResponse>,
    #[serde(default)]
    item_id: Option<String>,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    item: Option<OutputItem>,
    #[serde(default)]
    error: Option<ApiError>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    id: String,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ResponsesApiResponse {
    id: String,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
    #[serde(default)]
    content: Option<Vec<OutputContent>>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}
