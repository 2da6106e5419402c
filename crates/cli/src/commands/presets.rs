//! Preset listing

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use mapcheck_e2e::PresetCatalog;

use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct PresetsArgs {
    /// Also list presets from a YAML file or directory
    #[arg(long)]
    pub catalog: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct PresetRow {
    pub name: String,
    pub description: String,
    pub source: String,
}

impl TableDisplay for PresetRow {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Description", "Source"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.description.clone(),
            self.source.clone(),
        ]
    }
}

pub fn rows(args: &PresetsArgs) -> Result<Vec<PresetRow>> {
    let from_catalog: HashSet<String> = match &args.catalog {
        Some(path) => PresetCatalog::load(path)?
            .presets()
            .iter()
            .map(|p| p.name.clone())
            .collect(),
        None => HashSet::new(),
    };
    let registry = super::run::load_registry(args.catalog.as_deref())?;

    Ok(registry
        .list()
        .map(|preset| PresetRow {
            name: preset.name().to_string(),
            description: preset.description().to_string(),
            source: if from_catalog.contains(preset.name()) {
                "catalog".to_string()
            } else {
                "builtin".to_string()
            },
        })
        .collect())
}

pub fn execute(args: PresetsArgs, format: OutputFormat) -> Result<()> {
    print_list(&rows(&args)?, format);
    Ok(())
}
