//! Page load verification

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use mapcheck_common::{ErrorKind, TestResult};

use crate::browser::{Browser, BrowserExt, ConsoleMessage};
use crate::command::{BaseCommand, Check, Command, CommandConfig, Findings};
use crate::context::TestContext;
use crate::error::{E2eError, E2eResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageLoadOptions {
    /// Path relative to the base URL
    pub path: String,

    /// Substring the document title must contain
    pub expected_title: Option<String>,

    /// Selectors that must become visible
    pub selectors: Vec<String>,

    pub capture_console: bool,

    /// How long to keep listening for console output after load
    pub console_grace_ms: u64,

    /// Treat console errors as failures instead of warnings
    pub console_errors_fatal: bool,

    pub screenshot: bool,

    pub full_page: bool,
}

impl Default for PageLoadOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            expected_title: None,
            selectors: Vec::new(),
            capture_console: true,
            console_grace_ms: 1_000,
            console_errors_fatal: false,
            screenshot: false,
            full_page: true,
        }
    }
}

/// Loads a page and checks its title, required elements and console output
pub struct PageLoadCommand {
    base: BaseCommand,
    options: PageLoadOptions,
}

impl PageLoadCommand {
    pub fn new(name: impl Into<String>, options: PageLoadOptions, config: CommandConfig) -> Self {
        Self {
            base: BaseCommand::new(name, config),
            options,
        }
    }

    async fn load(
        &self,
        browser: &dyn Browser,
        url: &str,
        findings: &mut Findings,
    ) -> E2eResult<()> {
        let timeout_ms = self.base.config().timeout_ms;
        let message = format!("Navigation to {}", url);
        self.base
            .execute_with_retry(|| {
                self.base
                    .execute_with_timeout(browser.navigate(url, timeout_ms), &message)
            })
            .await?;

        let title: String = self
            .base
            .execute_with_timeout(browser.evaluate_as("document.title"), "Reading page title")
            .await?;
        debug!("Loaded {} with title {:?}", url, title);
        if let Some(expected) = &self.options.expected_title {
            if !title.contains(expected.as_str()) {
                findings.fail(
                    ErrorKind::NotFound,
                    format!("Title {:?} does not contain {:?}", title, expected),
                );
            }
        }
        findings.meta("title", &title);

        let mut found = Vec::new();
        for selector in &self.options.selectors {
            let waited = self
                .base
                .execute_with_timeout(
                    browser.wait_for_selector(selector, timeout_ms),
                    &format!("Waiting for {}", selector),
                )
                .await;
            match waited {
                Ok(()) => found.push(selector.clone()),
                Err(E2eError::Timeout { .. }) | Err(E2eError::Assertion { .. }) => {
                    findings.fail(
                        ErrorKind::NotFound,
                        format!("Selector not found: {}", selector),
                    );
                }
                Err(e) => findings.record_error(&e),
            }
        }
        findings.meta("selectorsFound", &found);

        if self.options.capture_console && self.options.console_grace_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.options.console_grace_ms)).await;
        }
        Ok(())
    }

    async fn capture(&self, browser: &dyn Browser, ctx: &TestContext, findings: &mut Findings) {
        let path = ctx.artifact_path(self.base.name(), "png");
        let captured = match std::fs::create_dir_all(ctx.artifacts_dir()) {
            Ok(()) => {
                self.base
                    .execute_with_timeout(
                        browser.screenshot(&path, self.options.full_page),
                        "Capturing screenshot",
                    )
                    .await
            }
            Err(e) => Err(e.into()),
        };
        match captured {
            Ok(()) => findings.artifact(path),
            Err(e) => warn!("Screenshot for {} failed: {}", self.base.name(), e),
        }
    }
}

#[async_trait]
impl Command for PageLoadCommand {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn qualify(&mut self, scope: &str) {
        self.base.qualify(scope)
    }

    async fn run(&self, ctx: &TestContext) -> TestResult {
        self.base.run(self, ctx).await
    }

    fn describe(&self) -> String {
        format!("{} page_load {:?}", self.base.name(), self.options)
    }
}

#[async_trait]
impl Check for PageLoadCommand {
    async fn check(&self, ctx: &TestContext, findings: &mut Findings) -> E2eResult<()> {
        let browser = ctx.browser()?;
        let url = ctx.url(&self.options.path);
        findings.meta("url", &url);

        let console: Arc<Mutex<Vec<ConsoleMessage>>> = Arc::new(Mutex::new(Vec::new()));
        let listener = if self.options.capture_console {
            let sink = console.clone();
            Some(browser.on_console_message(Arc::new(move |msg: &ConsoleMessage| {
                if msg.is_error() {
                    sink.lock().push(msg.clone());
                }
            })))
        } else {
            None
        };

        let loaded = self.load(browser, &url, findings).await;

        if let Some(id) = listener {
            browser.remove_console_listener(id);
        }

        let errors: Vec<String> = console.lock().iter().map(|m| m.text.clone()).collect();
        for text in &errors {
            if self.options.console_errors_fatal {
                findings.fail(ErrorKind::Other, format!("Console error: {}", text));
            } else {
                findings.warn(format!("Console error: {}", text));
            }
        }
        findings.meta("consoleErrors", &errors);

        if let Err(e) = loaded {
            findings.record_error(&e);
        }

        if self.options.screenshot || findings.has_failures() {
            self.capture(browser, ctx, findings).await;
        }
        Ok(())
    }
}
