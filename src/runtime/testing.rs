//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::*;
use super::{ChatSession, SessionConfig, SessionHandle};
use crate::browser::{BrowserError, BrowserPort, PageContext, PageInfo};
use crate::conversation::{ConversationState, Message, Thread};
use crate::provider::{
    AssistantProvider, EventSink, FunctionCallTurn, ProviderError, ProviderMessageEvent,
    TurnRequest,
};
use crate::tools::ToolRegistry;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

// ============================================================================
// In-Memory Storage
// ============================================================================

/// In-memory storage for testing
#[derive(Default)]
pub struct InMemoryStorage {
    threads: Mutex<Vec<Thread>>,
    messages: Mutex<Vec<Message>>,
    secrets: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn stored_threads(&self) -> Vec<Thread> {
        self.threads.lock().unwrap().clone()
    }

    pub fn stored_messages(&self, thread_id: &str) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.thread_id == thread_id)
            .cloned()
            .collect()
    }

    fn check_writable(&self) -> Result<(), String> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err("disk full".to_string())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryStorage {
    async fn create_thread(&self, thread: &Thread) -> Result<(), String> {
        self.check_writable()?;
        let mut threads = self.threads.lock().unwrap();
        if threads.iter().any(|t| t.id == thread.id) {
            return Err(format!("Thread already exists: {}", thread.id));
        }
        threads.push(thread.clone());
        Ok(())
    }

    async fn update_thread(&self, thread: &Thread) -> Result<(), String> {
        self.check_writable()?;
        let mut threads = self.threads.lock().unwrap();
        let stored = threads
            .iter_mut()
            .find(|t| t.id == thread.id)
            .ok_or_else(|| format!("Thread not found: {}", thread.id))?;
        *stored = thread.clone();
        Ok(())
    }

    async fn create_message(&self, message: &Message) -> Result<(), String> {
        self.check_writable()?;
        if !self
            .threads
            .lock()
            .unwrap()
            .iter()
            .any(|t| t.id == message.thread_id)
        {
            return Err(format!("Thread not found: {}", message.thread_id));
        }
        let mut messages = self.messages.lock().unwrap();
        if messages.iter().any(|m| m.id == message.id) {
            return Err(format!("Message already exists: {}", message.id));
        }
        messages.push(message.clone());
        Ok(())
    }

    async fn update_message(&self, message: &Message) -> Result<(), String> {
        self.check_writable()?;
        let mut messages = self.messages.lock().unwrap();
        let stored = messages
            .iter_mut()
            .find(|m| m.id == message.id)
            .ok_or_else(|| format!("Message not found: {}", message.id))?;
        *stored = message.clone();
        Ok(())
    }

    async fn get_threads(&self) -> Result<Vec<Thread>, String> {
        Ok(self.stored_threads())
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>, String> {
        Ok(self.stored_messages(thread_id))
    }
}

#[async_trait]
impl SecretStore for InMemoryStorage {
    async fn get_secure_value(&self, key: &str) -> Result<Option<String>, String> {
        Ok(self.secrets.lock().unwrap().get(key).cloned())
    }

    async fn save_secure_value(&self, key: &str, value: &str) -> Result<(), String> {
        self.check_writable()?;
        self.secrets
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ============================================================================
// Mock Browser
// ============================================================================

/// Browser with a fixed page that records the actions it receives
pub struct MockBrowser {
    context: Mutex<Result<Option<PageContext>, String>>,
    page_info: watch::Sender<PageInfo>,
    missing: HashSet<String>,
    action_error: Option<String>,
    fills: Mutex<Vec<(String, String)>>,
    clicks: Mutex<Vec<String>>,
    settings_opened: AtomicUsize,
}

impl MockBrowser {
    pub fn new() -> Self {
        let (page_info, _) = watch::channel(PageInfo {
            title: "Sign up".to_string(),
            favicon: Some("https://example.com/favicon.ico".to_string()),
        });
        Self {
            context: Mutex::new(Ok(Some(PageContext {
                title: "Sign up".to_string(),
                url: "https://example.com/signup".to_string(),
                html: r#"<form><input id="email"><button id="go">Go</button></form>"#.to_string(),
            }))),
            page_info,
            missing: HashSet::new(),
            action_error: None,
            fills: Mutex::new(Vec::new()),
            clicks: Mutex::new(Vec::new()),
            settings_opened: AtomicUsize::new(0),
        }
    }

    /// Reading the page fails with `error`
    pub fn with_context_error(self, error: &str) -> Self {
        *self.context.lock().unwrap() = Err(error.to_string());
        self
    }

    /// No page is open
    pub fn without_page(self) -> Self {
        *self.context.lock().unwrap() = Ok(None);
        self
    }

    /// Selector that matches nothing
    pub fn with_missing(mut self, selector: &str) -> Self {
        self.missing.insert(selector.to_string());
        self
    }

    /// Every DOM action fails with `error`
    pub fn with_action_error(mut self, error: &str) -> Self {
        self.action_error = Some(error.to_string());
        self
    }

    pub fn set_page_info(&self, info: PageInfo) {
        self.page_info.send_replace(info);
    }

    pub fn fills(&self) -> Vec<(String, String)> {
        self.fills.lock().unwrap().clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.clicks.lock().unwrap().clone()
    }

    pub fn settings_opened(&self) -> usize {
        self.settings_opened.load(Ordering::SeqCst)
    }

    fn check_action(&self, selector: &str) -> Result<(), BrowserError> {
        if let Some(error) = &self.action_error {
            return Err(BrowserError::OperationFailed(error.clone()));
        }
        if self.missing.contains(selector) {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        Ok(())
    }
}

impl Default for MockBrowser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserPort for MockBrowser {
    async fn page_context(&self) -> Result<Option<PageContext>, BrowserError> {
        self.context
            .lock()
            .unwrap()
            .clone()
            .map_err(BrowserError::OperationFailed)
    }

    fn subscribe_page_info(&self) -> watch::Receiver<PageInfo> {
        self.page_info.subscribe()
    }

    async fn fill_input(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
        self.check_action(selector)?;
        self.fills
            .lock()
            .unwrap()
            .push((selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn click_element(&self, selector: &str) -> Result<(), BrowserError> {
        self.check_action(selector)?;
        self.clicks.lock().unwrap().push(selector.to_string());
        Ok(())
    }

    async fn open_extension_settings(&self) -> Result<(), BrowserError> {
        self.settings_opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Scripted Provider
// ============================================================================

/// A function call a scripted reply proposes
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ScriptedCall {
    pub fn new(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }
}

/// How the provider answers one turn
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// Stream `text` as two deltas, propose `calls`, then complete
    Reply {
        message_id: String,
        text: String,
        calls: Vec<ScriptedCall>,
    },
    /// Return an error without emitting anything
    Fail(ProviderError),
    /// Emit `Created`, then an `Error` event
    StreamError(String),
    /// Emit `Created` and wait until cancelled
    Hang,
    /// Return without emitting anything
    Silent,
}

impl ScriptedTurn {
    pub fn reply(message_id: &str, text: &str) -> Self {
        ScriptedTurn::Reply {
            message_id: message_id.to_string(),
            text: text.to_string(),
            calls: vec![],
        }
    }

    pub fn calls(message_id: &str, text: &str, calls: Vec<ScriptedCall>) -> Self {
        ScriptedTurn::Reply {
            message_id: message_id.to_string(),
            text: text.to_string(),
            calls,
        }
    }
}

/// A request the scripted provider received
#[derive(Debug, Clone)]
pub struct RecordedTurn {
    pub function_results: bool,
    pub message: Message,
    pub history: Vec<Message>,
    pub instructions: Option<String>,
}

/// Provider that plays back queued turns and records its requests
#[derive(Default)]
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<RecordedTurn>>,
}

impl ScriptedProvider {
    pub fn new(turns: impl IntoIterator<Item = ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn recorded_requests(&self) -> Vec<RecordedTurn> {
        self.requests.lock().unwrap().clone()
    }

    async fn play(&self, message: &Message, sink: EventSink) -> Result<(), ProviderError> {
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::unknown("No scripted turn queued"))?;

        match turn {
            ScriptedTurn::Reply {
                message_id,
                text,
                calls,
            } => {
                let (first, second) = text.split_at(text.len() / 2);
                let mut events = vec![ProviderMessageEvent::Created {
                    message_id: message_id.clone(),
                    thread_id: message.thread_id.clone(),
                }];
                for delta in [first, second] {
                    events.push(ProviderMessageEvent::OutputTextDelta {
                        message_id: message_id.clone(),
                        content_id: format!("{message_id}-text"),
                        text_delta: delta.to_string(),
                    });
                }
                for call in calls {
                    events.push(ProviderMessageEvent::FunctionCallProposed {
                        message_id: message_id.clone(),
                        content_id: call.id,
                        name: call.name,
                        arguments: call.arguments,
                    });
                }
                events.push(ProviderMessageEvent::Completed {
                    message_id: message_id.clone(),
                    user_message_id: message.id.clone(),
                    response_id: Some(format!("resp_{message_id}")),
                });
                for event in events {
                    if !sink.emit(event).await {
                        break;
                    }
                }
                Ok(())
            }
            ScriptedTurn::Fail(error) => Err(error),
            ScriptedTurn::StreamError(error) => {
                sink.emit(ProviderMessageEvent::Created {
                    message_id: format!("{}-reply", message.id),
                    thread_id: message.thread_id.clone(),
                })
                .await;
                sink.emit(ProviderMessageEvent::Error { message: error })
                    .await;
                Ok(())
            }
            ScriptedTurn::Hang => {
                sink.emit(ProviderMessageEvent::Created {
                    message_id: format!("{}-reply", message.id),
                    thread_id: message.thread_id.clone(),
                })
                .await;
                sink.cancelled().await;
                Err(ProviderError::cancelled())
            }
            ScriptedTurn::Silent => Ok(()),
        }
    }
}

#[async_trait]
impl AssistantProvider for ScriptedProvider {
    async fn send_message(
        &self,
        request: TurnRequest,
        sink: EventSink,
    ) -> Result<(), ProviderError> {
        self.requests.lock().unwrap().push(RecordedTurn {
            function_results: false,
            message: request.message.clone(),
            history: request.history,
            instructions: request.instructions,
        });
        self.play(&request.message, sink).await
    }

    async fn send_function_call_response(
        &self,
        request: FunctionCallTurn,
        sink: EventSink,
    ) -> Result<(), ProviderError> {
        self.requests.lock().unwrap().push(RecordedTurn {
            function_results: true,
            message: request.message.clone(),
            history: request.history,
            instructions: None,
        });
        self.play(&request.message, sink).await
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Test Session
// ============================================================================

const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// A running session wired to in-memory ports
pub struct TestSession {
    pub handle: SessionHandle,
    pub store: Arc<InMemoryStorage>,
    pub browser: Arc<MockBrowser>,
    _task: tokio::task::JoinHandle<()>,
}

impl TestSession {
    pub fn start(provider: Arc<dyn AssistantProvider>, auto_execute: bool) -> Self {
        Self::with_browser(provider, MockBrowser::new(), auto_execute)
    }

    pub fn with_browser(
        provider: Arc<dyn AssistantProvider>,
        browser: MockBrowser,
        auto_execute: bool,
    ) -> Self {
        let store = Arc::new(InMemoryStorage::new());
        let browser = Arc::new(browser);
        let (session, handle) = ChatSession::new(
            SessionConfig {
                model: "test-model".to_string(),
                auto_execute,
            },
            store.clone(),
            provider,
            browser.clone(),
            Arc::new(ToolRegistry::page_actions()),
        );
        Self {
            handle,
            store,
            browser,
            _task: session.spawn(),
        }
    }

    /// Wait until a snapshot satisfies `predicate`
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&Arc<ConversationState>) -> bool,
    ) -> Option<Arc<ConversationState>> {
        let mut rx = self.handle.subscribe();
        let result = match tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(predicate)).await {
            Ok(Ok(state)) => Some(Arc::clone(&state)),
            _ => None,
        };
        result
    }

    /// Poll the store until the messages of `thread_id` satisfy `predicate`
    pub async fn wait_for_stored(
        &self,
        thread_id: &str,
        predicate: impl Fn(&[Message]) -> bool,
    ) -> Vec<Message> {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        loop {
            let messages = self.store.stored_messages(thread_id);
            if predicate(&messages) || tokio::time::Instant::now() >= deadline {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ContentItem, FunctionCallStatus, Role, TurnPhase};
    use crate::provider::MockProvider;
    use crate::runtime::SessionError;

    fn settled(state: &ConversationState, count: usize) -> bool {
        state.messages.len() == count
            && !state.waiting_for_reply()
            && state.messages.iter().all(|m| m.complete)
    }

    fn call_status(message: &Message, content_id: &str) -> Option<FunctionCallStatus> {
        match message.content_item(content_id)? {
            ContentItem::FunctionCall { status, .. } => Some(*status),
            ContentItem::OutputText { .. } => None,
        }
    }

    fn fill_email() -> ScriptedCall {
        ScriptedCall::new(
            "call_1",
            "fill_input",
            r##"{"selector":"#email","value":"a@b.c"}"##,
        )
    }

    #[tokio::test]
    async fn test_in_memory_storage() {
        let storage = InMemoryStorage::new();
        let thread = Thread::new("th-1", chrono::Utc::now());
        storage.create_thread(&thread).await.unwrap();
        storage
            .create_message(&Message::user("u-1", "th-1", "hello", chrono::Utc::now()))
            .await
            .unwrap();

        let messages = storage.get_messages("th-1").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text(), "hello");
        assert!(storage
            .create_message(&Message::user("u-2", "missing", "hi", chrono::Utc::now()))
            .await
            .is_err());
    }

    /// Full round trip with the canned provider
    #[tokio::test]
    async fn test_mock_provider_reply() {
        let rt = TestSession::start(Arc::new(MockProvider::new(Duration::from_millis(10))), false);
        rt.handle.send_message("  Hi there  ").await.unwrap();

        let state = rt.wait_for(|s| settled(s, 2)).await.expect("reply");
        let user = &state.messages[0];
        assert_eq!(user.role, Role::User);
        assert_eq!(user.text(), "Hi there");
        let context = user.context.as_ref().unwrap();
        assert_eq!(context.title, "Sign up");
        assert_eq!(context.url, "https://example.com/signup");
        assert_eq!(
            context.favicon.as_deref(),
            Some("https://example.com/favicon.ico")
        );
        assert_eq!(state.messages[1].text(), crate::provider::MOCK_REPLY);

        let stored = rt.wait_for_stored(&state.thread.id, |m| m.len() == 2).await;
        assert_eq!(stored, state.messages);
        assert_eq!(rt.store.stored_threads().len(), 1);
    }

    #[tokio::test]
    async fn test_instructions_and_history_reach_provider() {
        let provider = Arc::new(ScriptedProvider::new([
            ScriptedTurn::reply("a1", "First answer"),
            ScriptedTurn::reply("a2", "Second answer"),
        ]));
        let rt = TestSession::start(provider.clone(), false);

        rt.handle.send_message("one").await.unwrap();
        rt.wait_for(|s| settled(s, 2)).await.expect("first reply");
        rt.handle.send_message("two").await.unwrap();
        let state = rt.wait_for(|s| settled(s, 4)).await.expect("second reply");

        let requests = provider.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].history.is_empty());
        assert_eq!(requests[1].history, state.messages[..2].to_vec());
        assert!(requests[1]
            .instructions
            .as_deref()
            .is_some_and(|i| i.contains("URL: https://example.com/signup")));
        assert_eq!(state.messages[3].text(), "Second answer");
        assert_eq!(state.messages[3].response_id.as_deref(), Some("resp_a2"));
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let provider = Arc::new(ScriptedProvider::default());
        let rt = TestSession::start(provider.clone(), false);

        let result = rt.handle.send_message("   ").await;
        assert!(matches!(result, Err(SessionError::EmptyMessage)));
        assert!(rt.handle.snapshot().messages.is_empty());
        assert!(provider.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_stop_discards_reply_silently() {
        let provider = Arc::new(ScriptedProvider::new([ScriptedTurn::Hang]));
        let rt = TestSession::start(provider, false);

        rt.handle.send_message("Hi").await.unwrap();
        rt.wait_for(|s| s.messages.len() == 2).await.expect("created");
        rt.handle.stop().await.unwrap();

        let state = rt.handle.snapshot();
        assert!(!state.waiting_for_reply());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let state = rt.handle.snapshot();
        assert!(!state.waiting_for_reply());
        assert!(state.messages.iter().all(|m| m.error.is_none()));
        // Only the user message was stored
        let stored = rt.wait_for_stored(&state.thread.id, |m| m.len() == 1).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_new_thread_drops_late_reply() {
        let rt = TestSession::start(Arc::new(MockProvider::new(Duration::from_millis(100))), false);

        rt.handle.send_message("Hi").await.unwrap();
        let first = rt.handle.snapshot().thread.clone();
        rt.handle.new_thread().await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        let state = rt.handle.snapshot();
        assert_ne!(state.thread.id, first.id);
        assert!(state.messages.is_empty());
        assert!(!state.waiting_for_reply());

        let stored = rt.store.stored_messages(&first.id);
        assert_eq!(stored.len(), 1);
        assert!(rt.store.stored_messages(&state.thread.id).is_empty());
    }

    #[tokio::test]
    async fn test_select_thread_restores_messages() {
        let provider = Arc::new(ScriptedProvider::new([ScriptedTurn::reply("a1", "Hello")]));
        let rt = TestSession::start(provider, false);

        rt.handle.send_message("Hi").await.unwrap();
        let first = rt.wait_for(|s| settled(s, 2)).await.expect("reply");
        rt.wait_for_stored(&first.thread.id, |m| m.len() == 2).await;

        rt.handle.new_thread().await.unwrap();
        assert!(rt.handle.snapshot().messages.is_empty());

        rt.handle.select_thread(first.thread.id.clone()).await.unwrap();
        let state = rt.handle.snapshot();
        assert_eq!(state.thread.id, first.thread.id);
        assert_eq!(state.messages, first.messages);

        let missing = rt.handle.select_thread("nope").await;
        assert!(matches!(missing, Err(SessionError::ThreadNotFound(_))));
    }

    #[tokio::test]
    async fn test_auto_execute_runs_calls_and_reports_back() {
        let provider = Arc::new(ScriptedProvider::new([
            ScriptedTurn::calls("a1", "Filling it in.", vec![fill_email()]),
            ScriptedTurn::reply("a2", "Done!"),
        ]));
        let rt = TestSession::start(provider.clone(), true);

        rt.handle.send_message("Use a@b.c").await.unwrap();
        let state = rt.wait_for(|s| settled(s, 3)).await.expect("follow-up");

        assert_eq!(
            rt.browser.fills(),
            vec![("#email".to_string(), "a@b.c".to_string())]
        );
        assert_eq!(
            call_status(&state.messages[1], "call_1"),
            Some(FunctionCallStatus::Succeeded)
        );
        assert_eq!(state.messages[2].text(), "Done!");

        let requests = provider.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].function_results);
        assert_eq!(requests[1].message.id, "a1");
        assert_eq!(requests[1].history.len(), 1);

        // The settled calls were written back to the store
        let stored = rt.wait_for_stored(&state.thread.id, |m| m.len() == 3).await;
        assert_eq!(
            call_status(&stored[1], "call_1"),
            Some(FunctionCallStatus::Succeeded)
        );
    }

    #[tokio::test]
    async fn test_manual_execution_waits_for_confirmation() {
        let provider = Arc::new(ScriptedProvider::new([
            ScriptedTurn::calls(
                "a1",
                "I can click it.",
                vec![ScriptedCall::new("call_1", "click_element", r##"{"selector":"#go"}"##)],
            ),
            ScriptedTurn::reply("a2", "Clicked."),
        ]));
        let rt = TestSession::start(provider.clone(), false);

        rt.handle.send_message("Press go").await.unwrap();
        let state = rt
            .wait_for(|s| matches!(s.phase, TurnPhase::AwaitingTools { .. }))
            .await
            .expect("awaiting confirmation");
        assert_eq!(
            call_status(&state.messages[1], "call_1"),
            Some(FunctionCallStatus::Idle)
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rt.browser.clicks().is_empty());
        assert_eq!(provider.recorded_requests().len(), 1);

        rt.handle.execute_function_call("a1", "call_1").await.unwrap();
        let state = rt.wait_for(|s| settled(s, 3)).await.expect("follow-up");
        assert_eq!(rt.browser.clicks(), vec!["#go".to_string()]);
        assert_eq!(state.messages[2].text(), "Clicked.");

        // A settled call cannot run twice
        let again = rt.handle.execute_function_call("a1", "call_1").await;
        assert!(matches!(again, Err(SessionError::Transition(_))));
    }

    #[tokio::test]
    async fn test_enabling_auto_execute_starts_waiting_calls() {
        let provider = Arc::new(ScriptedProvider::new([
            ScriptedTurn::calls("a1", "Filling.", vec![fill_email()]),
            ScriptedTurn::reply("a2", "Done."),
        ]));
        let rt = TestSession::start(provider, false);

        rt.handle.send_message("Fill it").await.unwrap();
        rt.wait_for(|s| matches!(s.phase, TurnPhase::AwaitingTools { .. }))
            .await
            .expect("awaiting confirmation");

        rt.handle.set_auto_execute(true).await.unwrap();
        let state = rt.wait_for(|s| settled(s, 3)).await.expect("follow-up");
        assert!(state.auto_execute);
        assert_eq!(rt.browser.fills().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_call_is_reported_to_provider() {
        let provider = Arc::new(ScriptedProvider::new([
            ScriptedTurn::calls(
                "a1",
                "Trying.",
                vec![ScriptedCall::new("call_1", "click_element", r##"{"selector":"#missing"}"##)],
            ),
            ScriptedTurn::reply("a2", "That button does not exist."),
        ]));
        let rt = TestSession::with_browser(
            provider.clone(),
            MockBrowser::new().with_missing("#missing"),
            true,
        );

        rt.handle.send_message("Click missing").await.unwrap();
        let state = rt.wait_for(|s| settled(s, 3)).await.expect("follow-up");
        assert_eq!(
            call_status(&state.messages[1], "call_1"),
            Some(FunctionCallStatus::Failed)
        );

        let reported = &provider.recorded_requests()[1].message;
        match reported.content_item("call_1") {
            Some(ContentItem::FunctionCall {
                result: Some(result),
                ..
            }) => {
                assert!(!result.success);
                assert_eq!(
                    result.error.as_deref(),
                    Some("No element matches selector #missing")
                );
            }
            other => panic!("expected settled call, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_context_failure_skips_provider() {
        let provider = Arc::new(ScriptedProvider::default());
        let rt = TestSession::with_browser(
            provider.clone(),
            MockBrowser::new().with_context_error("tab crashed"),
            false,
        );

        rt.handle.send_message("Hi").await.unwrap();
        let state = rt.handle.snapshot();
        assert_eq!(state.messages.len(), 1);
        assert!(!state.waiting_for_reply());
        assert_eq!(
            state.messages[0].error.as_deref(),
            Some("Failed to read page context: Browser operation failed: tab crashed")
        );
        assert!(provider.recorded_requests().is_empty());

        let stored = rt.wait_for_stored(&state.thread.id, |m| m.len() == 1).await;
        assert_eq!(stored, state.messages);
    }

    #[tokio::test]
    async fn test_no_open_page_is_a_context_failure() {
        let provider = Arc::new(ScriptedProvider::default());
        let rt = TestSession::with_browser(provider.clone(), MockBrowser::new().without_page(), false);

        rt.handle.send_message("Hi").await.unwrap();
        let state = rt.handle.snapshot();
        assert_eq!(state.messages[0].error.as_deref(), Some("No page is open"));
        assert!(provider.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_provider_error_lands_on_last_message() {
        let provider = Arc::new(ScriptedProvider::new([ScriptedTurn::Fail(
            ProviderError::from_status(
                429,
                "Too many requests",
                Some(Duration::from_secs(30)),
            ),
        )]));
        let rt = TestSession::start(provider, false);

        rt.handle.send_message("Hi").await.unwrap();
        let state = rt
            .wait_for(|s| s.messages.first().is_some_and(|m| m.error.is_some()))
            .await
            .expect("error");
        assert!(!state.waiting_for_reply());
        assert_eq!(state.messages.len(), 1);
        assert_eq!(
            state.messages[0].error.as_deref(),
            Some("Rate limited, retry in 30s: Too many requests")
        );

        // The user message was stored first, then updated with the error
        let stored = rt
            .wait_for_stored(&state.thread.id, |m| {
                m.first().is_some_and(|u| u.error.is_some())
            })
            .await;
        assert_eq!(stored.len(), 1);
        assert_eq!(
            stored[0].error.as_deref(),
            Some("Rate limited, retry in 30s: Too many requests")
        );
    }

    #[tokio::test]
    async fn test_stream_error_persists_partial_reply() {
        let provider = Arc::new(ScriptedProvider::new([ScriptedTurn::StreamError(
            "model overloaded".to_string(),
        )]));
        let rt = TestSession::start(provider, false);

        rt.handle.send_message("Hi").await.unwrap();
        let state = rt
            .wait_for(|s| s.messages.len() == 2 && !s.waiting_for_reply())
            .await
            .expect("error");
        assert_eq!(state.messages[1].error.as_deref(), Some("model overloaded"));

        let stored = rt.wait_for_stored(&state.thread.id, |m| m.len() == 2).await;
        assert_eq!(stored[1].error.as_deref(), Some("model overloaded"));
    }

    #[tokio::test]
    async fn test_missing_terminal_event_is_an_error() {
        let rt = TestSession::start(
            Arc::new(ScriptedProvider::new([ScriptedTurn::Silent])),
            false,
        );

        rt.handle.send_message("Hi").await.unwrap();
        let state = rt
            .wait_for(|s| s.messages.first().is_some_and(|m| m.error.is_some()))
            .await
            .expect("error");
        assert!(!state.waiting_for_reply());
        assert_eq!(
            state.messages[0].error.as_deref(),
            Some("Provider finished without a final response")
        );
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_memory() {
        let provider = Arc::new(ScriptedProvider::new([ScriptedTurn::reply("a1", "Hello")]));
        let rt = TestSession::start(provider, false);
        rt.store.fail_writes();

        rt.handle.send_message("Hi").await.unwrap();
        let state = rt.wait_for(|s| settled(s, 2)).await.expect("reply");
        assert_eq!(state.messages[1].text(), "Hello");
        assert!(rt.store.stored_threads().is_empty());
    }

    #[tokio::test]
    async fn test_page_info_updates_are_observed() {
        let browser = MockBrowser::new();
        let mut rx = browser.subscribe_page_info();
        browser.set_page_info(PageInfo {
            title: "Checkout".to_string(),
            favicon: None,
        });

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().title, "Checkout");
        assert!(rx.borrow().favicon.is_none());
    }
}
