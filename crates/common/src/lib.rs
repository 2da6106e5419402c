//! mapcheck Common Library
//!
//! Shared value types for the mapcheck orchestration engine:
//! - `TestResult`, the outcome every command returns
//! - `ErrorKind` and its fixed remediation table
//! - Map feature geometry and route/hazard intersection
//! - The on-disk run configuration

pub mod config;
pub mod error;
pub mod geometry;
pub mod types;

// Re-export commonly used types
pub use config::{BrowserConfig, BrowserKind, CommandDefaults, RunConfig, Viewport};
pub use error::{Error, Result};
pub use geometry::{
    BoundingBox, BoundingBoxOverlap, ExactIntersection, Feature, Geometry, IntersectionStrategy,
};
pub use types::{ErrorKind, Failure, Outcome, TestResult};

/// mapcheck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "mapcheck.toml";
