//! Composite command that sequences children under a fail-fast policy

use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use mapcheck_common::{ErrorKind, Failure, TestResult};

use crate::command::{panic_message, Command, Findings};
use crate::context::{TestContext, ENV_FAIL_FAST, ENV_STOP_ON_FIRST_FAILURE};
use crate::error::{E2eError, E2eResult};

/// Lifecycle of one macro run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroState {
    Idle,
    Running,
    /// Every child ran
    Completed,
    /// A failure stopped the loop before the last child
    StoppedEarly,
    Reported,
}

/// Everything a macro run produced
#[derive(Debug, Clone)]
pub struct MacroOutcome {
    /// Aggregate result with child details in its metadata
    pub summary: TestResult,

    /// Results of the children that ran, in order
    pub results: Vec<TestResult>,

    /// Final state of the run
    pub state: MacroState,
}

/// An ordered list of commands run as one
pub struct MacroCommand {
    name: String,
    description: String,
    children: Vec<Box<dyn Command>>,
    fail_fast: Option<bool>,
}

impl MacroCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            children: Vec::new(),
            fail_fast: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Pin the fail-fast policy; when unset it is read from the context
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = Some(fail_fast);
        self
    }

    pub fn set_fail_fast(&mut self, fail_fast: Option<bool>) {
        self.fail_fast = fail_fast;
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Append a child; names must be unique among siblings
    pub fn add(&mut self, child: Box<dyn Command>) -> E2eResult<()> {
        if self.children.iter().any(|c| c.name() == child.name()) {
            return Err(E2eError::Environment(format!(
                "command '{}' already exists in '{}'",
                child.name(),
                self.name
            )));
        }
        self.children.push(child);
        Ok(())
    }

    /// Builder form of [`MacroCommand::add`]
    pub fn with_child(mut self, child: impl Command + 'static) -> E2eResult<Self> {
        self.add(Box::new(child))?;
        Ok(self)
    }

    /// Detach the child called `name`
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Command>> {
        let index = self.children.iter().position(|c| c.name() == name)?;
        Some(self.children.remove(index))
    }

    /// Prefix every descendant's name with this macro's name
    pub fn scope_children(&mut self) {
        for child in &mut self.children {
            child.qualify(&self.name);
        }
    }

    pub fn children(&self) -> impl Iterator<Item = &dyn Command> + '_ {
        self.children.iter().map(|c| c.as_ref())
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Effective policy: explicit flag, then `failFast`, then
    /// `stopOnFirstFailure`, then on
    pub fn resolve_fail_fast(&self, ctx: &TestContext) -> bool {
        self.fail_fast
            .or_else(|| ctx.env_flag(ENV_FAIL_FAST))
            .or_else(|| ctx.env_flag(ENV_STOP_ON_FIRST_FAILURE))
            .unwrap_or(true)
    }

    /// Run every child in order and keep the individual results
    pub async fn run_detailed(&self, ctx: &TestContext) -> MacroOutcome {
        let mut state = MacroState::Idle;
        debug!("{}: {:?}", self.name, state);

        let fail_fast = self.resolve_fail_fast(ctx);
        let mut findings = Findings::start();
        let mut results: Vec<TestResult> = Vec::with_capacity(self.children.len());

        state = MacroState::Running;
        info!(
            "Running {} ({} command(s), fail-fast: {})",
            self.name,
            self.children.len(),
            fail_fast
        );

        for child in &self.children {
            let result = match AssertUnwindSafe(child.run(ctx)).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => {
                    warn!("Command {} panicked", child.name());
                    TestResult::failed(
                        child.name(),
                        Failure::new(
                            ErrorKind::Other,
                            format!("command panicked: {}", panic_message(payload.as_ref())),
                        ),
                        0,
                    )
                }
            };

            for artifact in &result.artifacts {
                findings.artifact(artifact.clone());
            }

            let failed = !result.success;
            if failed {
                let kind = result.error_kind.unwrap_or(ErrorKind::Other);
                let first = result.first_error().unwrap_or("failed without an error message");
                findings.fail(kind, format!("{}: {}", result.name, first));
            }
            results.push(result);

            if failed && fail_fast {
                state = MacroState::StoppedEarly;
                break;
            }
        }

        if state == MacroState::Running {
            state = MacroState::Completed;
        }

        let executed = results.len();
        if state == MacroState::StoppedEarly {
            info!(
                "{} stopped after {} of {} command(s)",
                self.name,
                executed,
                self.children.len()
            );
        }

        let children: Vec<serde_json::Value> = results
            .iter()
            .map(|r| json!({ "name": r.name, "success": r.success, "durationMs": r.duration_ms }))
            .collect();
        findings.meta("children", children);
        findings.meta("results", &results);
        findings.meta("executed", executed);
        findings.meta("total", self.children.len());
        findings.meta("failFast", fail_fast);
        findings.meta("state", state);

        let summary = findings.into_result(&self.name, fail_fast);
        state = MacroState::Reported;
        debug!("{}: {:?}", self.name, state);

        MacroOutcome {
            summary,
            results,
            state,
        }
    }
}

#[async_trait]
impl Command for MacroCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn qualify(&mut self, scope: &str) {
        self.name = format!("{}/{}", scope, self.name);
        for child in &mut self.children {
            child.qualify(scope);
        }
    }

    async fn run(&self, ctx: &TestContext) -> TestResult {
        self.run_detailed(ctx).await.summary
    }

    fn describe(&self) -> String {
        let children: Vec<String> = self
            .children
            .iter()
            .map(|c| c.describe().replace('\n', "\n  "))
            .collect();
        let mut out = format!("macro {} (fail_fast: {:?})", self.name, self.fail_fast);
        for child in children {
            out.push_str("\n  ");
            out.push_str(&child);
        }
        out
    }
}
