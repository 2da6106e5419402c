//! Error types for the verification engine
//!
//! Every variant maps to an [`ErrorKind`], which drives the remediation hint
//! recorded in a failing `TestResult`.

use mapcheck_common::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    /// An operation exceeded its time budget
    #[error("{message} (timed out after {timeout_ms} ms)")]
    Timeout { message: String, timeout_ms: u64 },

    /// An expected condition was false
    #[error("{message}")]
    Assertion { kind: ErrorKind, message: String },

    /// Invalid or missing configuration, detected before or outside a check
    #[error("Environment error: {0}")]
    Environment(String),

    /// The application under test could not be reached
    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Unknown preset '{name}' (available: {})", .available.join(", "))]
    UnknownPreset { name: String, available: Vec<String> },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("Catalog parse error: {0}")]
    CatalogParse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Common(#[from] mapcheck_common::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

impl E2eError {
    pub fn assertion(kind: ErrorKind, message: impl Into<String>) -> Self {
        E2eError::Assertion {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::assertion(ErrorKind::NotFound, message)
    }

    /// Classification used for the remediation hint
    pub fn kind(&self) -> ErrorKind {
        match self {
            E2eError::Timeout { .. } => ErrorKind::Timeout,
            E2eError::Assertion { kind, .. } => *kind,
            E2eError::Environment(_) | E2eError::CatalogParse(_) => ErrorKind::Other,
            E2eError::UnknownPreset { .. } => ErrorKind::NotFound,
            E2eError::ExternalService(_) => ErrorKind::Network,
            E2eError::Browser(_) => ErrorKind::Other,
            E2eError::PlaywrightNotFound => ErrorKind::NotFound,
            E2eError::Io(e) => match e.kind() {
                std::io::ErrorKind::PermissionDenied => ErrorKind::Permission,
                std::io::ErrorKind::NotFound => ErrorKind::NotFound,
                std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
                _ => ErrorKind::Other,
            },
            E2eError::Http(e) if e.is_timeout() => ErrorKind::Timeout,
            E2eError::Http(e) if e.is_connect() || e.is_request() => ErrorKind::Network,
            E2eError::Http(e) => match e.status().map(|s| s.as_u16()) {
                Some(401) | Some(403) => ErrorKind::Permission,
                Some(404) => ErrorKind::NotFound,
                _ => ErrorKind::Network,
            },
            E2eError::Json(_) | E2eError::Yaml(_) | E2eError::Image(_) => ErrorKind::Other,
            E2eError::Common(_) => ErrorKind::Other,
        }
    }

    /// Whether `with_retry` may try again.
    ///
    /// Timeouts and transport failures are transient; a false assertion is
    /// not.
    pub fn is_retryable(&self) -> bool {
        match self {
            E2eError::Timeout { .. } | E2eError::ExternalService(_) => true,
            E2eError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}
