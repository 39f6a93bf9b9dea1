//! Chrome DevTools Protocol implementation of the browser port
//!
//! Either attaches to a running Chrome through its DevTools websocket or
//! launches a headed one (system Chrome first, then a downloaded Chromium).

use super::html::clean_html;
use super::{BrowserError, BrowserPort, PageContext, PageInfo};
use async_trait::async_trait;
use chromiumoxide::{
    browser::{Browser, BrowserConfig},
    cdp::browser_protocol::page::EventLoadEventFired,
    error::CdpError,
    fetcher::{BrowserFetcher, BrowserFetcherOptions},
    Handler, Page,
};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Budget for any single CDP round trip
const OPERATION_TIMEOUT: Duration = Duration::from_secs(15);

const DEFAULT_SETTINGS_URL: &str = "chrome://extensions";

#[derive(Debug, Clone, Default)]
pub struct CdpConfig {
    /// DevTools websocket of a running Chrome; launch one when unset
    pub websocket_url: Option<String>,
    /// Page to open on startup
    pub start_url: Option<String>,
    pub settings_url: Option<String>,
}

impl CdpConfig {
    pub fn from_env() -> Self {
        Self {
            websocket_url: std::env::var("PAGECHAT_CHROME_WS").ok(),
            start_url: std::env::var("PAGECHAT_START_URL").ok(),
            settings_url: std::env::var("PAGECHAT_SETTINGS_URL").ok(),
        }
    }
}

pub struct CdpBrowser {
    browser: Browser,
    page: Page,
    page_info: Arc<watch::Sender<PageInfo>>,
    settings_url: String,
    tasks: Vec<JoinHandle<()>>,
}

impl CdpBrowser {
    pub async fn start(config: CdpConfig) -> Result<Self, BrowserError> {
        let (browser, handler) = match &config.websocket_url {
            Some(ws) => {
                tracing::info!(websocket = %ws, "Attaching to running Chrome");
                Browser::connect(ws.clone())
                    .await
                    .map_err(|e| BrowserError::LaunchFailed(format!("connect {ws}: {e}")))?
            }
            None => Self::launch().await?,
        };
        let handler_task = spawn_handler(handler);

        let page = match browser.pages().await?.into_iter().next() {
            Some(page) => page,
            None => browser.new_page("about:blank").await?,
        };
        if let Some(url) = &config.start_url {
            with_timeout(page.goto(url.as_str())).await?;
        }

        let (tx, _) = watch::channel(read_page_info(&page).await.unwrap_or_default());
        let page_info = Arc::new(tx);
        let watch_task = spawn_page_info_watcher(&page, page_info.clone()).await?;

        Ok(Self {
            browser,
            page,
            page_info,
            settings_url: config
                .settings_url
                .unwrap_or_else(|| DEFAULT_SETTINGS_URL.to_string()),
            tasks: vec![handler_task, watch_task],
        })
    }

    /// Directory where the fetcher caches downloaded Chrome binaries
    fn fetcher_cache_dir() -> PathBuf {
        home_dir().join(".cache/pagechat/chromium")
    }

    fn browser_config(executable: Option<&Path>) -> Result<BrowserConfig, BrowserError> {
        let mut builder = BrowserConfig::builder()
            .with_head()
            .user_data_dir(home_dir().join(".pagechat/chrome-profile"));

        if let Some(path) = executable {
            builder = builder.chrome_executable(path);
        }

        builder.build().map_err(BrowserError::LaunchFailed)
    }

    async fn launch_with(executable: Option<&Path>) -> Result<(Browser, Handler), BrowserError> {
        let config = Self::browser_config(executable)?;
        Browser::launch(config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))
    }

    /// Tries system Chrome first. On failure, downloads a compatible
    /// Chromium via `BrowserFetcher` and caches it for future runs.
    async fn launch() -> Result<(Browser, Handler), BrowserError> {
        match Self::launch_with(None).await {
            Ok(launched) => return Ok(launched),
            Err(e) => {
                tracing::info!("System Chrome not available ({e}), trying fetcher...");
            }
        }

        let cache_dir = Self::fetcher_cache_dir();
        tracing::info!("Downloading Chrome to {cache_dir:?} (first run only)...");

        std::fs::create_dir_all(&cache_dir).map_err(|e| {
            BrowserError::LaunchFailed(format!(
                "Failed to create cache dir {}: {e}",
                cache_dir.display()
            ))
        })?;

        let fetcher_opts = BrowserFetcherOptions::builder()
            .with_path(&cache_dir)
            .build()
            .map_err(|e| BrowserError::LaunchFailed(format!("Fetcher config error: {e}")))?;

        let info = BrowserFetcher::new(fetcher_opts)
            .fetch()
            .await
            .map_err(|e| BrowserError::LaunchFailed(format!("Chrome download failed: {e:#}")))?;

        tracing::info!("Using Chrome at {:?}", info.executable_path);
        Self::launch_with(Some(&info.executable_path)).await
    }
}

impl Drop for CdpBrowser {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl BrowserPort for CdpBrowser {
    async fn page_context(&self) -> Result<Option<PageContext>, BrowserError> {
        let Some(url) = with_timeout(self.page.url()).await? else {
            return Ok(None);
        };
        let title = with_timeout(self.page.get_title())
            .await?
            .unwrap_or_default();
        let html = with_timeout(self.page.content()).await?;

        Ok(Some(PageContext {
            title,
            url,
            html: clean_html(&html),
        }))
    }

    fn subscribe_page_info(&self) -> watch::Receiver<PageInfo> {
        self.page_info.subscribe()
    }

    async fn fill_input(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
        let found: bool = evaluate(&self.page, fill_script(selector, value)).await?;
        if found {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(selector.to_string()))
        }
    }

    async fn click_element(&self, selector: &str) -> Result<(), BrowserError> {
        let found: bool = evaluate(&self.page, click_script(selector)).await?;
        if found {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(selector.to_string()))
        }
    }

    async fn open_extension_settings(&self) -> Result<(), BrowserError> {
        with_timeout(self.browser.new_page(self.settings_url.as_str())).await?;
        Ok(())
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME").map_or_else(|_| PathBuf::from("/tmp"), PathBuf::from)
}

fn spawn_handler(mut handler: Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                tracing::warn!("CDP handler error: {e}");
            }
        }
    })
}

/// Refresh the page info after every load of the active page
async fn spawn_page_info_watcher(
    page: &Page,
    sender: Arc<watch::Sender<PageInfo>>,
) -> Result<JoinHandle<()>, BrowserError> {
    let mut loads = page.event_listener::<EventLoadEventFired>().await?;
    let page = page.clone();

    Ok(tokio::spawn(async move {
        while loads.next().await.is_some() {
            match read_page_info(&page).await {
                Ok(info) => {
                    sender.send_if_modified(|current| {
                        if *current == info {
                            return false;
                        }
                        *current = info;
                        true
                    });
                }
                Err(e) => tracing::debug!(error = %e, "Failed to read page info"),
            }
        }
    }))
}

async fn read_page_info(page: &Page) -> Result<PageInfo, BrowserError> {
    let title = with_timeout(page.get_title()).await?.unwrap_or_default();
    let favicon: Option<String> = evaluate(page, FAVICON_SCRIPT.to_string()).await?;
    Ok(PageInfo { title, favicon })
}

async fn with_timeout<T>(
    operation: impl Future<Output = Result<T, CdpError>>,
) -> Result<T, BrowserError> {
    tokio::time::timeout(OPERATION_TIMEOUT, operation)
        .await
        .map_err(|_| BrowserError::Timeout(OPERATION_TIMEOUT))?
        .map_err(BrowserError::from)
}

async fn evaluate<T: DeserializeOwned>(page: &Page, expression: String) -> Result<T, BrowserError> {
    with_timeout(page.evaluate(expression))
        .await?
        .into_value()
        .map_err(|e| BrowserError::OperationFailed(format!("Unexpected script result: {e}")))
}

const FAVICON_SCRIPT: &str = r#"(() => {
  const link = document.querySelector('link[rel~="icon"]');
  if (link && link.href) return link.href;
  return location.origin && location.origin !== 'null' ? location.origin + '/favicon.ico' : null;
})()"#;

/// JSON-quote a value for embedding in a script
fn js_string(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

/// Sets the value through the native setter so framework-controlled inputs
/// see the change, then fires `input` and `change`
fn fill_script(selector: &str, value: &str) -> String {
    format!(
        r"(() => {{
  const el = document.querySelector({selector});
  if (!el) return false;
  el.focus();
  const proto = el instanceof HTMLTextAreaElement ? HTMLTextAreaElement.prototype
    : el instanceof HTMLSelectElement ? HTMLSelectElement.prototype
    : el instanceof HTMLInputElement ? HTMLInputElement.prototype
    : null;
  const setter = proto && Object.getOwnPropertyDescriptor(proto, 'value')?.set;
  if (setter) setter.call(el, {value});
  else if ('value' in el) el.value = {value};
  else el.textContent = {value};
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return true;
}})()",
        selector = js_string(selector),
        value = js_string(value),
    )
}

fn click_script(selector: &str) -> String {
    format!(
        r"(() => {{
  const el = document.querySelector({selector});
  if (!el) return false;
  el.scrollIntoView({{ block: 'center' }});
  el.click();
  return true;
}})()",
        selector = js_string(selector),
    )
}
