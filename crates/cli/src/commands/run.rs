//! Run Command

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{debug, info, warn};

use mapcheck_common::{BrowserKind, RunConfig};
use mapcheck_e2e::{
    Browser, PlaywrightBrowser, PlaywrightConfig, PresetCatalog, PresetParams, PresetRegistry,
    RunOptions, Runner,
};

use crate::output::{print_report, print_warning, OutputFormat};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Preset to run (see `mapcheck presets`)
    pub preset: String,

    /// Base URL of the application under test
    #[arg(long, env = "MAPCHECK_BASE_URL")]
    pub base_url: Option<String>,

    /// Run the browser headless
    #[arg(long, overrides_with = "no_headless")]
    pub headless: bool,

    /// Show the browser window
    #[arg(long, overrides_with = "headless")]
    pub no_headless: bool,

    /// Stop a macro at its first failing command
    #[arg(long, overrides_with = "no_fail_fast")]
    pub fail_fast: bool,

    /// Run every command even after failures
    #[arg(long, overrides_with = "fail_fast")]
    pub no_fail_fast: bool,

    /// Browser engine (chromium, firefox, webkit)
    #[arg(long)]
    pub browser: Option<String>,

    /// Directory for reports and screenshots
    #[arg(long)]
    pub artifacts_dir: Option<PathBuf>,

    /// Directory holding visual baselines
    #[arg(long)]
    pub baseline_dir: Option<PathBuf>,

    /// Extra presets from a YAML file or directory
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Preset parameter, repeatable
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Seed missing baselines and replace mismatching ones
    #[arg(long)]
    pub update_baselines: bool,

    /// Per-operation timeout
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Retries for transient failures
    #[arg(long)]
    pub retries: Option<u32>,
}

fn flag(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

/// Fold flags over the file configuration
pub fn apply_overrides(config: &mut RunConfig, args: &RunArgs) -> Result<()> {
    if let Some(url) = &args.base_url {
        config.base_url = url.clone();
    }
    if let Some(headless) = flag(args.headless, args.no_headless) {
        config.browser.headless = headless;
    }
    if let Some(browser) = &args.browser {
        config.browser.kind = browser.parse::<BrowserKind>()?;
    }
    if let Some(dir) = &args.artifacts_dir {
        config.artifacts_dir = dir.clone();
    }
    if let Some(dir) = &args.baseline_dir {
        config.baseline_dir = dir.clone();
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.commands.timeout_ms = timeout_ms;
    }
    if let Some(retries) = args.retries {
        config.commands.retries = retries;
    }
    config.validate()?;
    Ok(())
}

/// Registry of built-in presets plus an optional catalog
pub fn load_registry(catalog: Option<&Path>) -> Result<PresetRegistry> {
    let mut registry = PresetRegistry::with_builtin();
    if let Some(path) = catalog {
        PresetCatalog::load(path)?
            .register_into(&mut registry)
            .with_context(|| format!("registering presets from {}", path.display()))?;
    }
    Ok(registry)
}

fn run_options(config: &RunConfig, args: &RunArgs) -> Result<RunOptions> {
    let mut params = PresetParams {
        timeout_ms: Some(config.commands.timeout_ms),
        retries: Some(config.commands.retries),
        retry_delay_ms: Some(config.commands.retry_delay_ms),
        ..Default::default()
    };
    for pair in &args.params {
        let (key, value) = PresetParams::parse_pair(pair)?;
        params.values.insert(key, value);
    }

    Ok(RunOptions {
        preset: args.preset.clone(),
        base_url: config.base_url.clone(),
        fail_fast: flag(args.fail_fast, args.no_fail_fast),
        artifacts_dir: config.artifacts_dir.clone(),
        baseline_dir: Some(config.baseline_dir.clone()),
        update_baselines: args.update_baselines,
        instrumentation_namespace: Some(config.instrumentation_namespace.clone()),
        params,
    })
}

/// Run a preset and return the process exit code
pub async fn execute(args: RunArgs, config_path: &Path, format: OutputFormat) -> Result<i32> {
    let mut config = RunConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    apply_overrides(&mut config, &args)?;
    debug!("Effective configuration: {:?}", config);

    let runner = Runner::new(load_registry(args.catalog.as_deref())?);
    let prepared = runner.prepare(run_options(&config, &args)?)?;

    let browser = match PlaywrightBrowser::launch(PlaywrightConfig {
        browser: config.browser.kind,
        headless: config.browser.headless,
        viewport: config.browser.viewport,
        ..Default::default()
    })
    .await
    {
        Ok(browser) => Some(Arc::new(browser)),
        Err(e) => {
            warn!("Browser unavailable, continuing without one: {}", e);
            print_warning(&format!("Browser unavailable: {}", e));
            None
        }
    };

    let handle = browser.clone().map(|b| b as Arc<dyn Browser>);
    let report = prepared.execute(handle).await;

    if let Some(browser) = browser {
        if let Err(e) = browser.close().await {
            warn!("Closing browser failed: {}", e);
        }
    }

    let report = report?;
    print_report(&report, format);
    info!("Exit code {}", report.exit_code());
    Ok(report.exit_code())
}
