//! Command contract and the shared leaf machinery
//!
//! A [`Command`] turns a [`TestContext`] into a [`TestResult`] and never
//! fails: every error is captured in the result. Leaf commands implement
//! [`Check`] and delegate `run` to [`BaseCommand::run`], which owns timing,
//! panic containment and result construction.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use mapcheck_common::types::Outcome;
use mapcheck_common::{CommandDefaults, ErrorKind, Failure, TestResult};

use crate::context::TestContext;
use crate::error::{E2eError, E2eResult};
use crate::primitives::{with_retry, with_timeout};

/// A named, self-contained unit of verification
#[async_trait]
pub trait Command: Send + Sync {
    /// Name, unique within a command tree
    fn name(&self) -> &str;

    /// Prefix this name, and those of any children, with `scope/`
    fn qualify(&mut self, scope: &str);

    /// Execute against `ctx`. Must not panic or leak errors; repeated runs
    /// must not depend on a previous run's leftovers.
    async fn run(&self, ctx: &TestContext) -> TestResult;

    /// Shape of the command and its configuration, used to compare trees
    fn describe(&self) -> String {
        self.name().to_string()
    }
}

/// Budget and policy shared by leaf commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandConfig {
    /// Budget for each guarded operation
    pub timeout_ms: u64,

    /// Extra attempts for transient failures
    pub retries: u32,

    /// Base of the exponential backoff between attempts
    pub retry_delay_ms: u64,

    /// Whether a failure of this command asks the pipeline to stop
    pub fail_fast: bool,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retries: 0,
            retry_delay_ms: 500,
            fail_fast: true,
        }
    }
}

impl From<&CommandDefaults> for CommandConfig {
    fn from(defaults: &CommandDefaults) -> Self {
        Self {
            timeout_ms: defaults.timeout_ms,
            retries: defaults.retries,
            retry_delay_ms: defaults.retry_delay_ms,
            fail_fast: true,
        }
    }
}

impl CommandConfig {
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Errors, warnings, artifacts and metadata gathered during one run.
///
/// Created when a run starts and consumed by [`Findings::into_result`], so
/// each run produces exactly one result with its duration measured from the
/// start.
#[derive(Debug)]
pub struct Findings {
    started: Instant,
    outcome: Outcome,
}

impl Findings {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            outcome: Outcome::default(),
        }
    }

    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.outcome.failures.push(Failure::new(kind, message));
    }

    pub fn record_error(&mut self, error: &E2eError) {
        self.fail(error.kind(), error.to_string());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.outcome.warnings.push(message.into());
    }

    pub fn artifact(&mut self, path: impl Into<PathBuf>) {
        self.outcome.artifacts.push(path.into());
    }

    pub fn artifacts(&self) -> &[PathBuf] {
        &self.outcome.artifacts
    }

    /// Attach diagnostic metadata; unserializable values are stored as null
    pub fn meta(&mut self, key: &str, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.outcome.metadata.insert(key.to_string(), value);
    }

    pub fn has_failures(&self) -> bool {
        !self.outcome.failures.is_empty()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn into_result(self, name: &str, fail_fast: bool) -> TestResult {
        let duration_ms = self.elapsed_ms();
        TestResult::from_outcome(name, self.outcome, duration_ms, fail_fast)
    }
}

/// The check a leaf command performs.
///
/// `Ok(())` with no recorded failure is a pass. An `Err` is recorded as a
/// failure by `BaseCommand::run`; checks may also record failures directly
/// and keep going to report several problems at once.
#[async_trait]
pub trait Check: Send + Sync {
    async fn check(&self, ctx: &TestContext, findings: &mut Findings) -> E2eResult<()>;
}

/// Name, budget and run harness shared by leaf commands
#[derive(Debug, Clone)]
pub struct BaseCommand {
    name: String,
    config: CommandConfig,
}

impl BaseCommand {
    pub fn new(name: impl Into<String>, config: CommandConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CommandConfig {
        &self.config
    }

    pub fn qualify(&mut self, scope: &str) {
        self.name = format!("{}/{}", scope, self.name);
    }

    /// [`with_timeout`] bound to this command's budget
    pub async fn execute_with_timeout<T, F>(&self, operation: F, message: &str) -> E2eResult<T>
    where
        F: Future<Output = E2eResult<T>>,
    {
        with_timeout(operation, self.config.timeout_ms, message).await
    }

    /// [`with_retry`] bound to this command's retry policy
    pub async fn execute_with_retry<T, F, Fut>(&self, operation: F) -> E2eResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = E2eResult<T>>,
    {
        with_retry(operation, self.config.retries, self.config.retry_delay_ms).await
    }

    /// Run `check` and turn whatever happens into a single result
    pub async fn run<C: Check + ?Sized>(&self, check: &C, ctx: &TestContext) -> TestResult {
        let mut findings = Findings::start();
        debug!("Running command: {}", self.name);

        let outcome = AssertUnwindSafe(check.check(ctx, &mut findings))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => findings.record_error(&e),
            Err(payload) => {
                warn!("Command {} panicked", self.name);
                findings.fail(
                    ErrorKind::Other,
                    format!("command panicked: {}", panic_message(payload.as_ref())),
                );
            }
        }

        let result = findings.into_result(&self.name, self.config.fail_fast);
        if result.success {
            info!("✓ {} ({} ms)", result.name, result.duration_ms);
        } else {
            warn!(
                "✗ {} - {}",
                result.name,
                result.first_error().unwrap_or("unknown error")
            );
        }
        result
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
