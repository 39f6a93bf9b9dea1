//! Chat session executor

use super::traits::ConversationStore;
use super::{Command, SessionError, SessionHandle};

use crate::browser::BrowserPort;
use crate::conversation::{
    transition, Action, ConversationState, Effect, FunctionCallResult, Message,
    PageContextSnapshot, Thread, TurnRef,
};
use crate::instructions::build_instructions;
use crate::provider::{
    AssistantProvider, EventSink, FunctionCallTurn, ProviderError, TurnRequest,
};
use crate::tools::{ToolContext, ToolRegistry};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Buffered provider events per turn
const EVENT_BUFFER: usize = 64;
const COMMAND_BUFFER: usize = 32;
const ACTION_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub auto_execute: bool,
}

/// What a provider turn asks for
enum TurnCall {
    Reply(TurnRequest),
    FunctionResults(FunctionCallTurn),
}

pub struct ChatSession {
    state: Arc<ConversationState>,
    store: Arc<dyn ConversationStore>,
    provider: Arc<dyn AssistantProvider>,
    browser: Arc<dyn BrowserPort>,
    tools: Arc<ToolRegistry>,
    command_rx: mpsc::Receiver<Command>,
    action_tx: mpsc::Sender<Action>,
    action_rx: mpsc::Receiver<Action>,
    snapshot_tx: watch::Sender<Arc<ConversationState>>,
    /// Id and token of the provider turn in flight
    active_turn: Option<(u64, CancellationToken)>,
    /// Parent token of function calls started in the current thread
    tools_cancel: CancellationToken,
}

impl ChatSession {
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn ConversationStore>,
        provider: Arc<dyn AssistantProvider>,
        browser: Arc<dyn BrowserPort>,
        tools: Arc<ToolRegistry>,
    ) -> (Self, SessionHandle) {
        let state = Arc::new(ConversationState::new(
            new_thread(),
            config.model,
            config.auto_execute,
        ));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (action_tx, action_rx) = mpsc::channel(ACTION_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(state.clone());

        let session = Self {
            state,
            store,
            provider,
            browser,
            tools,
            command_rx,
            action_tx,
            action_rx,
            snapshot_tx,
            active_turn: None,
            tools_cancel: CancellationToken::new(),
        };
        let handle = SessionHandle {
            command_tx,
            snapshot_rx,
        };
        (session, handle)
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        tracing::info!(
            thread_id = %self.state.thread.id,
            provider = self.provider.name(),
            "Starting chat session"
        );

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(action) = self.action_rx.recv() => {
                    if let Err(e) = self.dispatch(action).await {
                        tracing::warn!(error = %e, "Dropped session action");
                    }
                }
            }
        }

        if let Some((_, token)) = self.active_turn.take() {
            token.cancel();
        }
        self.tools_cancel.cancel();
        tracing::info!("Chat session stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SendMessage { text, reply } => {
                let _ = reply.send(self.send_message(&text).await);
            }
            Command::Stop { reply } => {
                let _ = reply.send(self.dispatch(Action::Stop).await);
            }
            Command::NewThread { reply } => {
                self.reset_tools();
                let thread = new_thread();
                tracing::info!(thread_id = %thread.id, "New thread");
                let _ = reply.send(self.dispatch(Action::NewThread { thread }).await);
            }
            Command::SelectThread { thread_id, reply } => {
                let _ = reply.send(self.select_thread(&thread_id).await);
            }
            Command::ExecuteFunctionCall {
                message_id,
                content_id,
                reply,
            } => {
                let result = self
                    .dispatch(Action::ExecuteFunctionCall {
                        message_id,
                        content_id,
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::SetAutoExecute { enabled, reply } => {
                let _ = reply.send(self.dispatch(Action::SetAutoExecute { enabled }).await);
            }
        }
    }

    /// Capture the page, then hand the user message to the reducer
    async fn send_message(&mut self, text: &str) -> Result<(), SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let mut message = Message::user(
            uuid::Uuid::new_v4().to_string(),
            self.state.thread.id.clone(),
            text,
            Utc::now(),
        );

        // Blocks the session loop for up to the browser's operation timeout;
        // other commands and provider events queue behind the capture.
        let (context_ok, instructions) = match self.browser.page_context().await {
            Ok(Some(page)) => {
                let favicon = self.browser.subscribe_page_info().borrow().favicon.clone();
                message.context = Some(PageContextSnapshot {
                    title: page.title.clone(),
                    url: page.url.clone(),
                    favicon,
                });
                (true, Some(build_instructions(&page, self.state.auto_execute)))
            }
            Ok(None) => {
                message.error = Some("No page is open".to_string());
                (false, None)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read page context");
                message.error = Some(format!("Failed to read page context: {e}"));
                (false, None)
            }
        };

        self.dispatch(Action::UserMessage {
            message,
            context_ok,
            instructions,
        })
        .await
    }

    async fn select_thread(&mut self, thread_id: &str) -> Result<(), SessionError> {
        let threads = self
            .store
            .get_threads()
            .await
            .map_err(SessionError::Storage)?;
        let thread = threads
            .into_iter()
            .find(|t| t.id == thread_id)
            .ok_or_else(|| SessionError::ThreadNotFound(thread_id.to_string()))?;
        let messages = self
            .store
            .get_messages(thread_id)
            .await
            .map_err(SessionError::Storage)?;

        self.reset_tools();
        tracing::info!(thread_id, messages = messages.len(), "Selected thread");
        self.dispatch(Action::SelectThread { thread, messages }).await
    }

    /// Function calls of the previous thread report into nothing; stop them
    fn reset_tools(&mut self) {
        self.tools_cancel.cancel();
        self.tools_cancel = CancellationToken::new();
    }

    /// Apply one action: transition, broadcast, then run effects in order
    async fn dispatch(&mut self, action: Action) -> Result<(), SessionError> {
        let result = transition(&self.state, action)?;

        self.state = Arc::new(result.new_state);
        self.snapshot_tx.send_replace(self.state.clone());

        for effect in result.effects {
            self.execute_effect(effect).await;
        }
        Ok(())
    }

    async fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::PersistMessage { message } => {
                if let Err(e) = self.store.create_message(&message).await {
                    tracing::error!(message_id = %message.id, error = %e, "Failed to persist message");
                }
            }

            Effect::UpdateMessage { message } => {
                if let Err(e) = self.store.update_message(&message).await {
                    tracing::error!(message_id = %message.id, error = %e, "Failed to update message");
                }
            }

            Effect::PersistThread { thread, created } => {
                let result = if created {
                    self.store.create_thread(&thread).await
                } else {
                    self.store.update_thread(&thread).await
                };
                if let Err(e) = result {
                    tracing::error!(thread_id = %thread.id, created, error = %e, "Failed to persist thread");
                }
            }

            Effect::RequestReply {
                turn,
                model,
                message,
                instructions,
                history,
            } => {
                let request = TurnRequest {
                    model,
                    message,
                    instructions,
                    history,
                    tools: self.tools.definitions(),
                };
                self.start_turn(turn, TurnCall::Reply(request));
            }

            Effect::SendFunctionCallResults {
                turn,
                model,
                message,
                history,
            } => {
                let request = FunctionCallTurn {
                    model,
                    message,
                    history,
                    tools: self.tools.definitions(),
                };
                self.start_turn(turn, TurnCall::FunctionResults(request));
            }

            Effect::ExecuteFunctionCall {
                message_id,
                content_id,
                name,
                arguments,
            } => self.start_function_call(message_id, content_id, name, arguments),

            Effect::AbortTurn { turn } => {
                if let Some((id, token)) = self.active_turn.take() {
                    if id == turn.id {
                        tracing::info!(turn = turn.id, "Aborting provider turn");
                        token.cancel();
                    } else {
                        self.active_turn = Some((id, token));
                    }
                }
            }
        }
    }

    /// Spawn the provider call for `turn`, forwarding its events as actions
    fn start_turn(&mut self, turn: TurnRef, call: TurnCall) {
        if let Some((_, previous)) = self.active_turn.take() {
            previous.cancel();
        }
        let cancel = CancellationToken::new();
        self.active_turn = Some((turn.id, cancel.clone()));

        let (sink, mut events) = EventSink::channel(cancel.clone(), EVENT_BUFFER);
        let provider = self.provider.clone();
        let action_tx = self.action_tx.clone();

        tokio::spawn(async move {
            let forward_tx = action_tx.clone();
            let forward_turn = turn.clone();
            let forward_cancel = cancel.clone();
            let forwarder = tokio::spawn(async move {
                let mut saw_terminal = false;
                while let Some(event) = events.recv().await {
                    if forward_cancel.is_cancelled() {
                        break;
                    }
                    saw_terminal |= event.is_terminal();
                    let action = Action::Provider {
                        turn: forward_turn.clone(),
                        event,
                        received_at: Utc::now(),
                    };
                    if forward_tx.send(action).await.is_err() {
                        break;
                    }
                }
                saw_terminal
            });

            let result = match call {
                TurnCall::Reply(request) => provider.send_message(request, sink).await,
                TurnCall::FunctionResults(request) => {
                    provider.send_function_call_response(request, sink).await
                }
            };
            let saw_terminal = forwarder.await.unwrap_or(false);

            if cancel.is_cancelled() {
                return;
            }
            let error = match result {
                Err(error) => error,
                Ok(()) if !saw_terminal => {
                    ProviderError::network("Provider finished without a final response")
                }
                Ok(()) => return,
            };
            let _ = action_tx
                .send(Action::ProviderFailed { turn, error })
                .await;
        });
    }

    fn start_function_call(
        &self,
        message_id: String,
        content_id: String,
        name: String,
        arguments: String,
    ) {
        let ctx = ToolContext::new(self.tools_cancel.child_token(), self.browser.clone());
        let tools = self.tools.clone();
        let action_tx = self.action_tx.clone();

        tokio::spawn(async move {
            tracing::info!(function = %name, id = %content_id, "Executing function call");

            let function = name.clone();
            let run = tokio::spawn(async move { tools.execute(&function, &arguments, ctx).await });
            let result = run.await.unwrap_or_else(|e| {
                tracing::error!(function = %name, error = %e, "Function call task failed");
                FunctionCallResult::failed(format!("Function call failed: {e}"))
            });

            tracing::info!(
                function = %name,
                id = %content_id,
                success = result.success,
                "Function call finished"
            );
            let _ = action_tx
                .send(Action::FunctionCallFinished {
                    message_id,
                    content_id,
                    result,
                })
                .await;
        });
    }
}

fn new_thread() -> Thread {
    Thread::new(uuid::Uuid::new_v4().to_string(), Utc::now())
}
