//! Browser capability interface
//!
//! The narrow surface the engine needs from a browser-automation driver.
//! Commands depend only on this trait; `PlaywrightBrowser` is the bundled
//! implementation and tests substitute their own.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use mapcheck_common::Viewport;

use crate::error::{E2eError, E2eResult};

/// A message the page wrote to its console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleMessage {
    /// `log`, `info`, `warning`, `error`, ...
    pub level: String,
    pub text: String,
}

impl ConsoleMessage {
    pub fn is_error(&self) -> bool {
        self.level == "error"
    }
}

pub type ConsoleCallback = Arc<dyn Fn(&ConsoleMessage) + Send + Sync>;

/// Handle returned by `on_console_message`, used to detach the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

#[async_trait]
pub trait Browser: Send + Sync {
    /// Load `url` in the shared page
    async fn navigate(&self, url: &str, timeout_ms: u64) -> E2eResult<()>;

    /// Evaluate a JavaScript expression in the page and return its JSON value
    async fn evaluate(&self, script: &str) -> E2eResult<serde_json::Value>;

    /// Wait until `selector` is attached and visible
    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> E2eResult<()>;

    /// Capture the page into a PNG at `path`
    async fn screenshot(&self, path: &Path, full_page: bool) -> E2eResult<()>;

    /// Register a console listener
    fn on_console_message(&self, callback: ConsoleCallback) -> ListenerId;

    /// Detach a listener registered with `on_console_message`
    fn remove_console_listener(&self, id: ListenerId);

    async fn set_viewport_size(&self, viewport: Viewport) -> E2eResult<()>;
}

/// Typed evaluation on top of [`Browser::evaluate`]
#[async_trait]
pub trait BrowserExt: Browser {
    async fn evaluate_as<T: DeserializeOwned + Send>(&self, script: &str) -> E2eResult<T> {
        let value = self.evaluate(script).await?;
        serde_json::from_value(value).map_err(|e| {
            E2eError::Browser(format!("unexpected result from `{}`: {}", script, e))
        })
    }
}

impl<B: Browser + ?Sized> BrowserExt for B {}
