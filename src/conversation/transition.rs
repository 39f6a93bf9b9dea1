//! Pure state transition function

use super::action::Action;
use super::effect::Effect;
use super::message::{ContentItem, FunctionCallResult, FunctionCallStatus, Message};
use super::state::{ConversationState, TurnPhase, TurnRef};
use crate::provider::{ProviderError, ProviderMessageEvent};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConversationState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConversationState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Message {0} is not part of the current thread")]
    UnknownMessage(String),
    #[error("Function call {0} not found")]
    UnknownFunctionCall(String),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function.
///
/// Given the same snapshot and action it always produces the same result and
/// performs no I/O. The input snapshot is never modified.
pub fn transition(
    state: &ConversationState,
    action: Action,
) -> Result<TransitionResult, TransitionError> {
    let state = state.clone();

    match action {
        Action::UserMessage {
            message,
            context_ok,
            instructions,
        } => user_message(state, message, context_ok, instructions),

        Action::Provider {
            turn,
            event,
            received_at,
        } => {
            if !state.is_current(&turn) {
                // Stale: the turn was stopped, superseded or its thread left
                return Ok(TransitionResult::new(state));
            }
            Ok(provider_event(state, &turn, event, received_at))
        }

        Action::ProviderFailed { turn, error } => Ok(provider_failed(state, &turn, &error)),

        Action::Stop => {
            let mut state = state;
            let effects = abort_active_turn(&mut state);
            Ok(TransitionResult::new(state).with_effects(effects))
        }

        Action::NewThread { thread } => {
            let mut state = state;
            let effects = abort_active_turn(&mut state);
            state.thread = thread;
            state.thread_saved = false;
            state.messages.clear();
            state.phase = TurnPhase::Idle;
            Ok(TransitionResult::new(state).with_effects(effects))
        }

        Action::SelectThread { thread, messages } => {
            let mut state = state;
            let effects = abort_active_turn(&mut state);
            state.thread = thread;
            state.thread_saved = true;
            state.phase = restored_phase(&messages);
            state.messages = messages;
            Ok(TransitionResult::new(state).with_effects(effects))
        }

        Action::ExecuteFunctionCall {
            message_id,
            content_id,
        } => execute_function_call(state, &message_id, &content_id),

        Action::FunctionCallFinished {
            message_id,
            content_id,
            result,
        } => Ok(function_call_finished(state, &message_id, &content_id, result)),

        Action::SetAutoExecute { enabled } => {
            let mut state = state;
            state.auto_execute = enabled;
            let mut effects = Vec::new();
            if enabled {
                if let TurnPhase::AwaitingTools { message_id } = state.phase.clone() {
                    effects = start_idle_calls(&mut state, &message_id);
                }
            }
            Ok(TransitionResult::new(state).with_effects(effects))
        }
    }
}

/// A restored transcript whose last reply still has unconfirmed calls waits on them
fn restored_phase(messages: &[Message]) -> TurnPhase {
    match messages.last() {
        Some(last) if last.complete && !last.idle_function_calls().is_empty() => {
            TurnPhase::AwaitingTools {
                message_id: last.id.clone(),
            }
        }
        _ => TurnPhase::Idle,
    }
}

// ============================================================================
// User messages
// ============================================================================

fn user_message(
    mut state: ConversationState,
    message: Message,
    context_ok: bool,
    instructions: Option<String>,
) -> Result<TransitionResult, TransitionError> {
    if message.thread_id != state.thread.id {
        return Err(TransitionError::InvalidTransition(format!(
            "message for thread {} sent while thread {} is current",
            message.thread_id, state.thread.id
        )));
    }

    // A new send supersedes whatever turn is still in flight
    let mut effects = abort_active_turn(&mut state);

    let created = !state.thread_saved;
    state.thread.updated_at = message.created_at;
    state.thread_saved = true;
    effects.push(Effect::persist_thread(&state.thread, created));

    let history = state.messages.clone();
    state.messages.push(message.clone());
    effects.push(Effect::PersistMessage {
        message: message.clone(),
    });

    if context_ok {
        let turn = state.allocate_turn(&message.id);
        state.phase = TurnPhase::AwaitingReply {
            turn: turn.clone(),
            reply_id: None,
        };
        effects.push(Effect::RequestReply {
            turn,
            model: state.model.clone(),
            message,
            instructions,
            history,
        });
    }

    Ok(TransitionResult::new(state).with_effects(effects))
}

/// Cancel the in-flight turn, if any, and clear the waiting state
fn abort_active_turn(state: &mut ConversationState) -> Vec<Effect> {
    match std::mem::take(&mut state.phase) {
        TurnPhase::AwaitingReply { turn, .. } => vec![Effect::AbortTurn { turn }],
        TurnPhase::AwaitingTools { message_id } => {
            state.phase = TurnPhase::AwaitingTools { message_id };
            vec![]
        }
        TurnPhase::Idle => vec![],
    }
}

// ============================================================================
// Provider events
// ============================================================================

fn reply_id(state: &ConversationState) -> Option<String> {
    match &state.phase {
        TurnPhase::AwaitingReply { reply_id, .. } => reply_id.clone(),
        _ => None,
    }
}

fn provider_event(
    mut state: ConversationState,
    turn: &TurnRef,
    event: ProviderMessageEvent,
    received_at: DateTime<Utc>,
) -> TransitionResult {
    let current_reply = reply_id(&state);

    match event {
        ProviderMessageEvent::Created {
            message_id,
            thread_id,
        } => {
            let duplicate = current_reply.is_some() || state.message(&message_id).is_some();
            if thread_id == turn.thread_id && !duplicate {
                state
                    .messages
                    .push(Message::assistant(message_id.clone(), thread_id, received_at));
                state.phase = TurnPhase::AwaitingReply {
                    turn: turn.clone(),
                    reply_id: Some(message_id),
                };
            }
            TransitionResult::new(state)
        }

        ProviderMessageEvent::OutputTextDelta {
            message_id,
            content_id,
            text_delta,
        } => {
            if current_reply.as_deref() == Some(message_id.as_str()) {
                if let Some(message) = state.message_mut(&message_id) {
                    append_text(message, &content_id, &text_delta);
                }
            }
            TransitionResult::new(state)
        }

        ProviderMessageEvent::FunctionCallProposed {
            message_id,
            content_id,
            name,
            arguments,
        } => {
            if current_reply.as_deref() == Some(message_id.as_str()) {
                if let Some(message) = state.message_mut(&message_id) {
                    if !message.complete && message.content_item(&content_id).is_none() {
                        message
                            .content
                            .push(ContentItem::function_call(content_id, name, arguments));
                    }
                }
            }
            TransitionResult::new(state)
        }

        ProviderMessageEvent::Completed {
            message_id,
            user_message_id,
            response_id,
        } => {
            if user_message_id != turn.origin_message_id {
                return TransitionResult::new(state);
            }
            match current_reply {
                Some(reply) if reply == message_id => finish_reply(state, &reply, response_id),
                Some(_) => TransitionResult::new(state),
                None => {
                    // Completed without any content
                    state.phase = TurnPhase::Idle;
                    TransitionResult::new(state)
                }
            }
        }

        ProviderMessageEvent::Fallback {
            content,
            response_id,
            ..
        } => {
            let reply = current_reply.unwrap_or_else(|| {
                let id = format!("{}-reply", turn.origin_message_id);
                state.messages.push(Message::assistant(
                    id.clone(),
                    turn.thread_id.clone(),
                    received_at,
                ));
                id
            });
            if let Some(message) = state.message_mut(&reply) {
                message.content = content;
            }
            finish_reply(state, &reply, response_id)
        }

        ProviderMessageEvent::Error { message } => fail_turn(state, message),
    }
}

fn append_text(message: &mut Message, content_id: &str, delta: &str) {
    if message.complete {
        return;
    }
    let existing = message.content.iter_mut().find(|item| item.id() == content_id);
    match existing {
        Some(ContentItem::OutputText { text, .. }) => text.push_str(delta),
        // Id already taken by a function call
        Some(ContentItem::FunctionCall { .. }) => {}
        None => message.content.push(ContentItem::text(content_id, delta)),
    }
}

/// Mark the reply complete, persist it and route any proposed calls
fn finish_reply(
    mut state: ConversationState,
    message_id: &str,
    response_id: Option<String>,
) -> TransitionResult {
    let Some(message) = state.message_mut(message_id) else {
        state.phase = TurnPhase::Idle;
        return TransitionResult::new(state);
    };

    message.complete = true;
    if response_id.is_some() {
        message.response_id = response_id;
    }
    let persisted = message.clone();
    let pending_calls = message.idle_function_calls();

    let mut effects = vec![Effect::PersistMessage { message: persisted }];
    if pending_calls.is_empty() {
        state.phase = TurnPhase::Idle;
    } else {
        state.phase = TurnPhase::AwaitingTools {
            message_id: message_id.to_string(),
        };
        if state.auto_execute {
            effects.extend(start_idle_calls(&mut state, message_id));
        }
    }

    TransitionResult::new(state).with_effects(effects)
}

/// Record a failure on the last message and end the turn
fn fail_turn(mut state: ConversationState, error: String) -> TransitionResult {
    let reply = reply_id(&state);
    state.phase = TurnPhase::Idle;

    let Some(last) = state.messages.last_mut() else {
        return TransitionResult::new(state);
    };
    last.error = Some(error);
    let message = last.clone();

    // The streamed reply was never stored; earlier messages only get the error
    let effect = if reply.as_deref() == Some(message.id.as_str()) {
        Effect::PersistMessage { message }
    } else {
        Effect::UpdateMessage { message }
    };
    TransitionResult::new(state).with_effect(effect)
}

fn provider_failed(
    state: ConversationState,
    turn: &TurnRef,
    error: &ProviderError,
) -> TransitionResult {
    if error.is_cancellation() || !state.is_current(turn) {
        return TransitionResult::new(state);
    }
    fail_turn(state, error.to_string())
}

// ============================================================================
// Function calls
// ============================================================================

/// Move every idle call of the message to Running and request execution
fn start_idle_calls(state: &mut ConversationState, message_id: &str) -> Vec<Effect> {
    let Some(message) = state.message_mut(message_id) else {
        return vec![];
    };

    let mut effects = Vec::new();
    for item in &mut message.content {
        if let ContentItem::FunctionCall {
            id,
            name,
            status,
            arguments,
            ..
        } = item
        {
            if *status == FunctionCallStatus::Idle {
                *status = FunctionCallStatus::Running;
                effects.push(Effect::ExecuteFunctionCall {
                    message_id: message_id.to_string(),
                    content_id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                });
            }
        }
    }
    effects
}

fn execute_function_call(
    mut state: ConversationState,
    message_id: &str,
    content_id: &str,
) -> Result<TransitionResult, TransitionError> {
    let message = state
        .message_mut(message_id)
        .ok_or_else(|| TransitionError::UnknownMessage(message_id.to_string()))?;
    if !message.complete {
        return Err(TransitionError::InvalidTransition(
            "function calls can run once the reply is complete".to_string(),
        ));
    }

    let item = message
        .content
        .iter_mut()
        .find(|item| item.id() == content_id);
    let Some(ContentItem::FunctionCall {
        name,
        status,
        arguments,
        ..
    }) = item
    else {
        return Err(TransitionError::UnknownFunctionCall(content_id.to_string()));
    };

    if !status.can_transition_to(FunctionCallStatus::Running) {
        return Err(TransitionError::InvalidTransition(format!(
            "function call {content_id} is already {status:?}"
        )));
    }
    *status = FunctionCallStatus::Running;
    let effect = Effect::ExecuteFunctionCall {
        message_id: message_id.to_string(),
        content_id: content_id.to_string(),
        name: name.clone(),
        arguments: arguments.clone(),
    };

    Ok(TransitionResult::new(state).with_effect(effect))
}

fn function_call_finished(
    mut state: ConversationState,
    message_id: &str,
    content_id: &str,
    result: FunctionCallResult,
) -> TransitionResult {
    let Some(message) = state.message_mut(message_id) else {
        return TransitionResult::new(state);
    };

    let Some(ContentItem::FunctionCall {
        status,
        result: slot,
        ..
    }) = message
        .content
        .iter_mut()
        .find(|item| item.id() == content_id)
    else {
        return TransitionResult::new(state);
    };
    if !status.can_transition_to(result.status()) {
        return TransitionResult::new(state);
    }
    *status = result.status();
    *slot = Some(result);

    if !message.function_calls_settled() {
        return TransitionResult::new(state);
    }

    let message = message.clone();
    let mut effects = vec![Effect::UpdateMessage {
        message: message.clone(),
    }];

    // Results only resume the turn that is still waiting on them
    let resumable = matches!(
        &state.phase,
        TurnPhase::AwaitingTools { message_id: waiting } if waiting == message_id
    );
    if resumable {
        let history = state
            .messages
            .iter()
            .take_while(|m| m.id != message_id)
            .cloned()
            .collect();
        let turn = state.allocate_turn(message_id);
        state.phase = TurnPhase::AwaitingReply {
            turn: turn.clone(),
            reply_id: None,
        };
        effects.push(Effect::SendFunctionCallResults {
            turn,
            model: state.model.clone(),
            message,
            history,
        });
    }

    TransitionResult::new(state).with_effects(effects)
}
