//! HTTP API for the chat panel

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::browser::BrowserPort;
use crate::runtime::{ConversationStore, SessionHandle, TokenStorage};
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
    pub store: Arc<dyn ConversationStore>,
    pub tokens: TokenStorage,
    pub browser: Arc<dyn BrowserPort>,
}

impl AppState {
    pub fn new(
        session: SessionHandle,
        store: Arc<dyn ConversationStore>,
        tokens: TokenStorage,
        browser: Arc<dyn BrowserPort>,
    ) -> Self {
        Self {
            session,
            store,
            tokens,
            browser,
        }
    }
}
