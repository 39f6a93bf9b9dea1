//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the session with in-memory implementations.

use crate::conversation::{Message, Thread};
use crate::db::Database;
use async_trait::async_trait;
use std::sync::Arc;

/// Append-only storage for threads and their messages
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_thread(&self, thread: &Thread) -> Result<(), String>;

    async fn update_thread(&self, thread: &Thread) -> Result<(), String>;

    async fn create_message(&self, message: &Message) -> Result<(), String>;

    /// Rewrite a stored message; used when its function calls settle or a
    /// failed request appends an error
    async fn update_message(&self, message: &Message) -> Result<(), String>;

    /// All threads in creation order
    async fn get_threads(&self) -> Result<Vec<Thread>, String>;

    /// Messages of a thread in chronological order
    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>, String>;
}

/// Key/value storage for secrets
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secure_value(&self, key: &str) -> Result<Option<String>, String>;

    async fn save_secure_value(&self, key: &str, value: &str) -> Result<(), String>;
}

/// Provider API tokens, stored as `token_<provider>` secrets
#[derive(Clone)]
pub struct TokenStorage {
    store: Arc<dyn SecretStore>,
}

impl TokenStorage {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    pub fn key(provider: &str) -> String {
        format!("token_{provider}")
    }

    pub async fn get_token(&self, provider: &str) -> Result<Option<String>, String> {
        self.store.get_secure_value(&Self::key(provider)).await
    }

    pub async fn set_token(&self, provider: &str, token: &str) -> Result<(), String> {
        self.store
            .save_secure_value(&Self::key(provider), token)
            .await
    }
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ConversationStore + ?Sized> ConversationStore for Arc<T> {
    async fn create_thread(&self, thread: &Thread) -> Result<(), String> {
        (**self).create_thread(thread).await
    }

    async fn update_thread(&self, thread: &Thread) -> Result<(), String> {
        (**self).update_thread(thread).await
    }

    async fn create_message(&self, message: &Message) -> Result<(), String> {
        (**self).create_message(message).await
    }

    async fn update_message(&self, message: &Message) -> Result<(), String> {
        (**self).update_message(message).await
    }

    async fn get_threads(&self) -> Result<Vec<Thread>, String> {
        (**self).get_threads().await
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>, String> {
        (**self).get_messages(thread_id).await
    }
}

#[async_trait]
impl<T: SecretStore + ?Sized> SecretStore for Arc<T> {
    async fn get_secure_value(&self, key: &str) -> Result<Option<String>, String> {
        (**self).get_secure_value(key).await
    }

    async fn save_secure_value(&self, key: &str, value: &str) -> Result<(), String> {
        (**self).save_secure_value(key, value).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as storage
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConversationStore for DatabaseStorage {
    async fn create_thread(&self, thread: &Thread) -> Result<(), String> {
        self.db.create_thread(thread).map_err(|e| e.to_string())
    }

    async fn update_thread(&self, thread: &Thread) -> Result<(), String> {
        self.db.update_thread(thread).map_err(|e| e.to_string())
    }

    async fn create_message(&self, message: &Message) -> Result<(), String> {
        self.db.create_message(message).map_err(|e| e.to_string())
    }

    async fn update_message(&self, message: &Message) -> Result<(), String> {
        self.db.update_message(message).map_err(|e| e.to_string())
    }

    async fn get_threads(&self) -> Result<Vec<Thread>, String> {
        self.db.get_threads().map_err(|e| e.to_string())
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>, String> {
        self.db.get_messages(thread_id).map_err(|e| e.to_string())
    }
}

#[async_trait]
impl SecretStore for DatabaseStorage {
    async fn get_secure_value(&self, key: &str) -> Result<Option<String>, String> {
        self.db.get_secure_value(key).map_err(|e| e.to_string())
    }

    async fn save_secure_value(&self, key: &str, value: &str) -> Result<(), String> {
        self.db
            .save_secure_value(key, value)
            .map_err(|e| e.to_string())
    }
}
