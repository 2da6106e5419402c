//! Run configuration
//!
//! Loaded from `mapcheck.toml` when present; every field has a default so an
//! empty or missing file is valid. CLI flags override file values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Top-level run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Base URL of the application under test
    pub base_url: String,

    /// Directory for reports, screenshots and diff images
    pub artifacts_dir: PathBuf,

    /// Directory holding visual baselines
    pub baseline_dir: PathBuf,

    /// Browser settings
    pub browser: BrowserConfig,

    /// Default command budget
    pub commands: CommandDefaults,

    /// Global object the application exposes for white-box queries
    pub instrumentation_namespace: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            artifacts_dir: PathBuf::from("test-results"),
            baseline_dir: PathBuf::from("test-results/baselines"),
            browser: BrowserConfig::default(),
            commands: CommandDefaults::default(),
            instrumentation_namespace: "__MAP_TEST__".to_string(),
        }
    }
}

/// Browser launch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub kind: BrowserKind,
    pub headless: bool,
    pub viewport: Viewport,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            kind: BrowserKind::Chromium,
            headless: true,
            viewport: Viewport::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chromium => "chromium",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for BrowserKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "chromium" => Ok(BrowserKind::Chromium),
            "firefox" => Ok(BrowserKind::Firefox),
            "webkit" => Ok(BrowserKind::Webkit),
            other => Err(Error::InvalidConfig(format!("unknown browser: {}", other))),
        }
    }
}

/// Browser viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Budget applied to commands that do not set their own
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandDefaults {
    pub timeout_ms: u64,
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for CommandDefaults {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retries: 0,
            retry_delay_ms: 500,
        }
    }
}

impl RunConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            tracing::debug!("Loaded configuration from {}", path.display());
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.commands.timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "commands.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.instrumentation_namespace.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "instrumentation_namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
