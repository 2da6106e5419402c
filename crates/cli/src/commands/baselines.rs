//! Visual baseline listing

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use mapcheck_e2e::commands::VisualSnapshotOptions;
use mapcheck_e2e::VisualTester;

use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct BaselinesArgs {
    /// Directory holding visual baselines (defaults to the configured one)
    #[arg(long)]
    pub baseline_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct BaselineRow {
    pub name: String,
    pub path: String,
}

impl TableDisplay for BaselineRow {
    fn headers() -> Vec<&'static str> {
        vec!["Snapshot", "Path"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.name.clone(), self.path.clone()]
    }
}

pub fn rows(dir: PathBuf) -> Result<Vec<BaselineRow>> {
    let tester = VisualTester::new(dir, VisualSnapshotOptions::default().threshold_percent);
    Ok(tester
        .list_baselines()?
        .into_iter()
        .map(|name| BaselineRow {
            path: tester.baseline_path(&name).display().to_string(),
            name,
        })
        .collect())
}

pub fn execute(args: BaselinesArgs, default_dir: PathBuf, format: OutputFormat) -> Result<()> {
    let dir = args.baseline_dir.unwrap_or(default_dir);
    print_list(&rows(dir)?, format);
    Ok(())
}
