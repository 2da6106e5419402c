//! mapcheck verification engine
//!
//! Command-pattern orchestration of end-to-end checks against a web map
//! application:
//! - Leaf commands (page load, layer order, visual snapshot, route safety,
//!   HTTP health) share timeout/retry primitives and a single
//!   error-containment boundary
//! - Macro commands sequence children under a fail-fast policy
//! - Named presets (built-in or from a YAML catalog) build command trees
//! - The runner resolves a preset, executes it and writes a JSON report
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Runner                                                     │
//! │    ├── prepare(options) -> PreparedRun                      │
//! │    │     └── PresetRegistry::build(name, params)            │
//! │    └── execute(browser) -> RunReport                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  MacroCommand                                               │
//! │    └── children: [Box<dyn Command>]                         │
//! │          ├── PageLoadCommand        ─┐                      │
//! │          ├── LayerOrderCommand       │ BaseCommand::run     │
//! │          ├── VisualSnapshotCommand   │  (timing, panics,    │
//! │          ├── RouteSafetyCommand      │   one TestResult)    │
//! │          └── HealthCheckCommand     ─┘                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Browser trait ── PlaywrightBrowser (node JSON-lines bridge)│
//! │  Instrumentation ── window.__MAP_TEST__                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod browser;
pub mod catalog;
pub mod command;
pub mod commands;
pub mod context;
pub mod error;
pub mod instrumentation;
pub mod macro_command;
pub mod playwright;
pub mod presets;
pub mod primitives;
pub mod runner;
pub mod visual;

pub use browser::{Browser, BrowserExt, ConsoleMessage, ListenerId};
pub use catalog::PresetCatalog;
pub use command::{BaseCommand, Check, Command, CommandConfig, Findings};
pub use context::TestContext;
pub use error::{E2eError, E2eResult};
pub use macro_command::{MacroCommand, MacroOutcome, MacroState};
pub use playwright::{PlaywrightBrowser, PlaywrightConfig};
pub use presets::{Preset, PresetParams, PresetRegistry};
pub use runner::{PreparedRun, RunOptions, RunReport, Runner};
pub use visual::{VisualDiff, VisualTester};
