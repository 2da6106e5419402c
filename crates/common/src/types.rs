//! Core result types for mapcheck

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use uuid::Uuid;

/// Classification of a failure, assigned where the failure is raised.
///
/// Each kind maps to a fixed remediation hint, so the advice a report gives
/// does not depend on how an error message happens to be worded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    NotFound,
    Permission,
    Network,
    Performance,
    Security,
    Other,
}

impl ErrorKind {
    /// Short actionable hint for this kind of failure
    pub fn remediation(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => {
                "Operation timed out: check that the application responds, or raise the command timeout"
            }
            ErrorKind::NotFound => {
                "Expected element or resource is missing: verify selectors, layer names and that the page finished loading"
            }
            ErrorKind::Permission => {
                "Access was denied: check credentials and file system permissions for the run"
            }
            ErrorKind::Network => {
                "Could not reach the application: confirm the base URL and that the server is running"
            }
            ErrorKind::Performance => {
                "Response exceeded its time budget: profile the endpoint or revisit the threshold"
            }
            ErrorKind::Security => {
                "Safety rule violated: review the route and hazard data flagged in the report"
            }
            ErrorKind::Other => "Inspect the error details and captured artifacts for this command",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Permission => "permission",
            ErrorKind::Network => "network",
            ErrorKind::Performance => "performance",
            ErrorKind::Security => "security",
            ErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single recorded failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Everything a command gathered during one run, before timing is attached
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub failures: Vec<Failure>,
    pub warnings: Vec<String>,
    pub artifacts: Vec<PathBuf>,
    pub metadata: Map<String, Value>,
}

/// Outcome of running one command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// Name of the producing command
    pub name: String,

    pub success: bool,

    /// Wall-clock time spent inside `run`
    pub duration_ms: u64,

    #[serde(default)]
    pub errors: Vec<String>,

    #[serde(default)]
    pub warnings: Vec<String>,

    /// Files produced under the artifacts directory
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,

    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Whether an enclosing pipeline should stop after this result
    pub should_stop_pipeline: bool,

    pub critical_error: bool,

    /// Hint derived from the first error; present iff `errors` is non-empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,

    /// Kind of the first error; present iff `errors` is non-empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Unique id carried by failing results only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl TestResult {
    /// Assemble a result from a finished outcome.
    ///
    /// `success` is true exactly when no failure was recorded. `fail_fast`
    /// controls whether a failing result asks the pipeline to stop.
    pub fn from_outcome(
        name: impl Into<String>,
        outcome: Outcome,
        duration_ms: u64,
        fail_fast: bool,
    ) -> Self {
        let success = outcome.failures.is_empty();
        let first_kind = outcome.failures.first().map(|f| f.kind);

        Self {
            name: name.into(),
            success,
            duration_ms,
            errors: outcome.failures.into_iter().map(|f| f.message).collect(),
            warnings: outcome.warnings,
            artifacts: outcome.artifacts,
            metadata: outcome.metadata,
            should_stop_pipeline: !success && fail_fast,
            critical_error: !success,
            remediation: first_kind.map(|k| k.remediation().to_string()),
            error_kind: first_kind,
            issue_id: if success {
                None
            } else {
                Some(Uuid::new_v4().to_string())
            },
            timestamp: Utc::now(),
        }
    }

    /// A passing result with nothing attached
    pub fn passed(name: impl Into<String>, duration_ms: u64) -> Self {
        Self::from_outcome(name, Outcome::default(), duration_ms, true)
    }

    /// A failing result carrying one failure
    pub fn failed(name: impl Into<String>, failure: Failure, duration_ms: u64) -> Self {
        let outcome = Outcome {
            failures: vec![failure],
            ..Default::default()
        };
        Self::from_outcome(name, outcome, duration_ms, true)
    }

    pub fn first_error(&self) -> Option<&str> {
        self.errors.first().map(String::as_str)
    }

    /// Child results recorded by a composite command, empty for leaves
    pub fn nested_results(&self) -> Vec<TestResult> {
        self.metadata
            .get("results")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}
