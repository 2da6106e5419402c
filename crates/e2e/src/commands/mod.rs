//! Leaf commands
//!
//! Each leaf pairs a [`BaseCommand`](crate::command::BaseCommand) with its
//! options and implements [`Check`](crate::command::Check). Option structs
//! deserialize from catalog YAML with every field defaulted.

pub mod health;
pub mod layer_order;
pub mod page_load;
pub mod route_safety;
pub mod visual_snapshot;

pub use health::{EndpointCheck, HealthCheckCommand, HealthCheckOptions};
pub use layer_order::{resolve_layer, LayerOrderCommand, LayerOrderOptions};
pub use page_load::{PageLoadCommand, PageLoadOptions};
pub use route_safety::{RouteSafetyCommand, RouteSafetyOptions, RouteSource, StrategyKind};
pub use visual_snapshot::{VisualSnapshotCommand, VisualSnapshotOptions};
