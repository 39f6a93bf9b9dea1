//! Browser capability port
//!
//! The session reads the page the user is looking at and drives DOM actions
//! through `BrowserPort`. `CdpBrowser` is the production implementation.

mod cdp;
pub mod html;

pub use cdp::{CdpBrowser, CdpConfig};

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("Browser operation failed: {0}")]
    OperationFailed(String),

    #[error("No element matches selector {0}")]
    ElementNotFound(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl From<chromiumoxide::error::CdpError> for BrowserError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        BrowserError::OperationFailed(e.to_string())
    }
}

/// The page as sent to the assistant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageContext {
    pub title: String,
    pub url: String,
    /// Cleaned, size-capped markup
    pub html: String,
}

/// What the panel header shows for the active page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub title: String,
    pub favicon: Option<String>,
}

#[async_trait]
pub trait BrowserPort: Send + Sync {
    /// Context of the active page, `None` if no page is open
    async fn page_context(&self) -> Result<Option<PageContext>, BrowserError>;

    /// Receiver that always holds the latest page info. Dropping it
    /// unsubscribes.
    fn subscribe_page_info(&self) -> watch::Receiver<PageInfo>;

    async fn fill_input(&self, selector: &str, value: &str) -> Result<(), BrowserError>;

    async fn click_element(&self, selector: &str) -> Result<(), BrowserError>;

    async fn open_extension_settings(&self) -> Result<(), BrowserError>;
}

#[async_trait]
impl<T: BrowserPort + ?Sized> BrowserPort for Arc<T> {
    async fn page_context(&self) -> Result<Option<PageContext>, BrowserError> {
        (**self).page_context().await
    }

    fn subscribe_page_info(&self) -> watch::Receiver<PageInfo> {
        (**self).subscribe_page_info()
    }

    async fn fill_input(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
        (**self).fill_input(selector, value).await
    }

    async fn click_element(&self, selector: &str) -> Result<(), BrowserError> {
        (**self).click_element(selector).await
    }

    async fn open_extension_settings(&self) -> Result<(), BrowserError> {
        (**self).open_extension_settings().await
    }
}
