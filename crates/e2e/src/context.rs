//! Per-run context shared by every command

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use crate::browser::Browser;
use crate::error::{E2eError, E2eResult};
use crate::instrumentation::Instrumentation;

/// Environment key overriding the instrumentation namespace
pub const ENV_INSTRUMENTATION: &str = "instrumentation";

/// Environment keys read for the fail-fast policy, in priority order
pub const ENV_FAIL_FAST: &str = "failFast";
pub const ENV_STOP_ON_FIRST_FAILURE: &str = "stopOnFirstFailure";

/// Directory holding visual baselines; defaults to `<artifacts>/baselines`
pub const ENV_BASELINE_DIR: &str = "baselineDir";

/// Seed missing baselines and replace mismatching ones
pub const ENV_UPDATE_BASELINES: &str = "updateBaselines";

/// Configuration and browser handle for one run.
///
/// Built once by the runner and passed by reference; commands read it and
/// write files under `artifacts_dir`, nothing else.
#[derive(Clone)]
pub struct TestContext {
    browser: Option<Arc<dyn Browser>>,
    env: HashMap<String, String>,
    artifacts_dir: PathBuf,
    base_url: String,
}

impl TestContext {
    pub fn new(base_url: impl Into<String>, artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            browser: None,
            env: HashMap::new(),
            artifacts_dir: artifacts_dir.into(),
            base_url: base_url.into(),
        }
    }

    pub fn with_browser(mut self, browser: Arc<dyn Browser>) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// The browser handle, or an environment error for browser-free runs
    pub fn browser(&self) -> E2eResult<&dyn Browser> {
        self.browser
            .as_deref()
            .ok_or_else(|| E2eError::Environment("no browser available in this run".to_string()))
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    /// Parse a boolean environment entry; unknown spellings read as absent
    pub fn env_flag(&self, key: &str) -> Option<bool> {
        match self.env_value(key)?.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        }
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn baseline_dir(&self) -> PathBuf {
        match self.env_value(ENV_BASELINE_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => self.artifacts_dir.join("baselines"),
        }
    }

    /// Resolve `path` against the base URL; absolute URLs pass through
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if path.is_empty() {
            format!("{}/", base)
        } else if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }

    /// A fresh artifact path named after the command and the current time
    pub fn artifact_path(&self, command: &str, extension: &str) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
        self.artifacts_dir
            .join(format!("{}-{}.{}", sanitize(command), stamp, extension))
    }

    /// Accessor for the application's instrumentation object
    pub fn instrumentation(&self) -> E2eResult<Instrumentation<'_>> {
        let namespace = self
            .env_value(ENV_INSTRUMENTATION)
            .unwrap_or(Instrumentation::DEFAULT_NAMESPACE);
        Ok(Instrumentation::new(self.browser()?, namespace))
    }
}

impl std::fmt::Debug for TestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext")
            .field("browser", &self.browser.is_some())
            .field("env", &self.env)
            .field("artifacts_dir", &self.artifacts_dir)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// File-name safe form of a command name
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}
