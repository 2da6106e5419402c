//! CLI Commands

pub mod baselines;
pub mod presets;
pub mod run;
