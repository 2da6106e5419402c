//! Run orchestration: validate, resolve a preset, execute it and report

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use mapcheck_common::TestResult;

use crate::browser::Browser;
use crate::command::Command;
use crate::context::{
    sanitize, TestContext, ENV_BASELINE_DIR, ENV_FAIL_FAST, ENV_INSTRUMENTATION,
    ENV_UPDATE_BASELINES,
};
use crate::error::{E2eError, E2eResult};
use crate::macro_command::{MacroCommand, MacroState};
use crate::presets::{PresetParams, PresetRegistry};

/// What to run and where
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub preset: String,

    pub base_url: String,

    /// Overrides the fail-fast policy of every macro without an explicit one
    pub fail_fast: Option<bool>,

    pub artifacts_dir: PathBuf,

    /// Baseline directory; `<artifacts_dir>/baselines` when unset
    pub baseline_dir: Option<PathBuf>,

    pub update_baselines: bool,

    pub instrumentation_namespace: Option<String>,

    pub params: PresetParams,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            preset: String::new(),
            base_url: "http://127.0.0.1:3000".to_string(),
            fail_fast: None,
            artifacts_dir: PathBuf::from("test-results"),
            baseline_dir: None,
            update_baselines: false,
            instrumentation_namespace: None,
            params: PresetParams::default(),
        }
    }
}

/// Outcome of a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub preset: String,
    pub success: bool,
    pub duration_ms: u64,

    /// Results of the preset's top-level children
    pub results: Vec<TestResult>,

    /// Aggregate result of the root macro
    pub summary: TestResult,

    pub state: MacroState,

    pub report_path: PathBuf,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            1
        }
    }

    /// One line per top-level child
    pub fn summary_lines(&self) -> Vec<String> {
        self.results
            .iter()
            .map(|r| {
                if r.success {
                    format!("✅ {} ({} ms)", r.name, r.duration_ms)
                } else {
                    format!(
                        "❌ {} ({} ms): {}",
                        r.name,
                        r.duration_ms,
                        r.first_error().unwrap_or("failed")
                    )
                }
            })
            .collect()
    }
}

/// A validated run with its command tree resolved, ready to execute
pub struct PreparedRun {
    options: RunOptions,
    tree: MacroCommand,
}

impl PreparedRun {
    pub fn tree(&self) -> &MacroCommand {
        &self.tree
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    fn context(&self, browser: Option<Arc<dyn Browser>>) -> TestContext {
        let options = &self.options;
        let mut ctx = TestContext::new(&options.base_url, &options.artifacts_dir);
        if let Some(browser) = browser {
            ctx = ctx.with_browser(browser);
        }
        if let Some(fail_fast) = options.fail_fast {
            ctx = ctx.with_env(ENV_FAIL_FAST, fail_fast.to_string());
        }
        if let Some(namespace) = &options.instrumentation_namespace {
            ctx = ctx.with_env(ENV_INSTRUMENTATION, namespace);
        }
        if let Some(dir) = &options.baseline_dir {
            ctx = ctx.with_env(ENV_BASELINE_DIR, dir.to_string_lossy());
        }
        if options.update_baselines {
            ctx = ctx.with_env(ENV_UPDATE_BASELINES, "true");
        }
        ctx
    }

    /// Run the tree and write the report
    pub async fn execute(self, browser: Option<Arc<dyn Browser>>) -> E2eResult<RunReport> {
        let ctx = self.context(browser);
        debug!("Context: {:?}", ctx);

        info!("Running preset {}", self.options.preset);
        let outcome = self.tree.run_detailed(&ctx).await;

        let report_path = write_report(
            &self.options.artifacts_dir,
            &self.options.preset,
            &outcome.results,
        )?;

        let summary = outcome.summary;
        Ok(RunReport {
            preset: self.options.preset,
            success: summary.success,
            duration_ms: summary.duration_ms,
            results: outcome.results,
            state: outcome.state,
            summary,
            report_path,
        })
    }
}

/// Resolves presets against a registry and runs them
pub struct Runner {
    registry: PresetRegistry,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(PresetRegistry::with_builtin())
    }
}

impl Runner {
    pub fn new(registry: PresetRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PresetRegistry {
        &self.registry
    }

    /// Validate options and build the preset's tree, before any browser work
    pub fn prepare(&self, options: RunOptions) -> E2eResult<PreparedRun> {
        if options.preset.trim().is_empty() {
            return Err(E2eError::Environment("no preset given".to_string()));
        }
        ensure_writable(&options.artifacts_dir)?;

        let tree = self.registry.build(&options.preset, &options.params)?;
        debug!("Resolved preset {}:\n{}", options.preset, tree.describe());

        Ok(PreparedRun { options, tree })
    }

    /// `prepare` then `execute`
    pub async fn run(
        &self,
        options: RunOptions,
        browser: Option<Arc<dyn Browser>>,
    ) -> E2eResult<RunReport> {
        self.prepare(options)?.execute(browser).await
    }
}

/// Create `dir` and prove it accepts files
fn ensure_writable(dir: &Path) -> E2eResult<()> {
    let probe = dir.join(".mapcheck-write-probe");
    std::fs::create_dir_all(dir)
        .and_then(|_| std::fs::write(&probe, b"ok"))
        .and_then(|_| std::fs::remove_file(&probe))
        .map_err(|e| {
            E2eError::Environment(format!(
                "artifacts directory {} is not writable: {}",
                dir.display(),
                e
            ))
        })
}

/// Write test results to a timestamped JSON file
fn write_report(dir: &Path, preset: &str, results: &[TestResult]) -> E2eResult<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
    let path = dir.join(format!("report-{}-{}.json", sanitize(preset), stamp));
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(&path, json)?;

    info!("Results written to: {}", path.display());
    Ok(path)
}
