//! Transcript types: threads, messages and their content items

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

// ============================================================================
// Function calls
// ============================================================================

/// Execution status of a proposed function call.
///
/// Moves only `Idle -> Running -> {Succeeded, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionCallStatus {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl FunctionCallStatus {
    pub fn can_transition_to(self, next: FunctionCallStatus) -> bool {
        matches!(
            (self, next),
            (FunctionCallStatus::Idle, FunctionCallStatus::Running)
                | (
                    FunctionCallStatus::Running,
                    FunctionCallStatus::Succeeded | FunctionCallStatus::Failed
                )
        )
    }

    pub fn is_settled(self) -> bool {
        matches!(
            self,
            FunctionCallStatus::Succeeded | FunctionCallStatus::Failed
        )
    }
}

/// Outcome of executing a function call against the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCallResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FunctionCallResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }

    pub fn status(&self) -> FunctionCallStatus {
        if self.success {
            FunctionCallStatus::Succeeded
        } else {
            FunctionCallStatus::Failed
        }
    }
}

// ============================================================================
// Content
// ============================================================================

/// One item of a message's ordered content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    OutputText {
        id: String,
        text: String,
    },
    /// `arguments` is the raw JSON text the assistant produced
    FunctionCall {
        id: String,
        name: String,
        #[serde(default)]
        status: FunctionCallStatus,
        arguments: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<FunctionCallResult>,
    },
}

impl ContentItem {
    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        ContentItem::OutputText {
            id: id.into(),
            text: text.into(),
        }
    }

    pub fn function_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        ContentItem::FunctionCall {
            id: id.into(),
            name: name.into(),
            status: FunctionCallStatus::Idle,
            arguments: arguments.into(),
            result: None,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ContentItem::OutputText { id, .. } | ContentItem::FunctionCall { id, .. } => id,
        }
    }

    pub fn is_function_call(&self) -> bool {
        matches!(self, ContentItem::FunctionCall { .. })
    }
}

/// Page context captured when a user message was sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContextSnapshot {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

// ============================================================================
// Messages and threads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub role: Role,
    pub content: Vec<ContentItem>,
    pub created_at: DateTime<Utc>,
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<PageContextSnapshot>,
    /// Upstream response id, used to chain the next turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

impl Message {
    /// A user message is complete as soon as it is created.
    pub fn user(
        id: impl Into<String>,
        thread_id: impl Into<String>,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        let id = id.into();
        Self {
            content: vec![ContentItem::text(format!("{id}-text"), text)],
            id,
            thread_id: thread_id.into(),
            role: Role::User,
            created_at,
            complete: true,
            error: None,
            context: None,
            response_id: None,
        }
    }

    /// An empty, incomplete assistant message awaiting streamed content.
    pub fn assistant(
        id: impl Into<String>,
        thread_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.into(),
            role: Role::Assistant,
            content: Vec::new(),
            created_at,
            complete: false,
            error: None,
            context: None,
            response_id: None,
        }
    }

    /// Concatenated text of all output-text items
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| match item {
                ContentItem::OutputText { text, .. } => Some(text.as_str()),
                ContentItem::FunctionCall { .. } => None,
            })
            .collect()
    }

    pub fn content_item(&self, content_id: &str) -> Option<&ContentItem> {
        self.content.iter().find(|item| item.id() == content_id)
    }

    /// Ids of function calls that have not started yet
    pub fn idle_function_calls(&self) -> Vec<String> {
        self.content
            .iter()
            .filter_map(|item| match item {
                ContentItem::FunctionCall {
                    id,
                    status: FunctionCallStatus::Idle,
                    ..
                } => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// True once every function call in the message has succeeded or failed
    pub fn function_calls_settled(&self) -> bool {
        self.content.iter().all(|item| match item {
            ContentItem::FunctionCall { status, .. } => status.is_settled(),
            ContentItem::OutputText { .. } => true,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
        }
    }
}
