//! # Maritime Voyage Simulator
//!
//! Simulates vessels sailing between real-world ports, broadcasts their
//! positions as AIS-style JSON lines over TCP, and ingests such a stream into
//! durable storage with validation and de-duplication.
//!
//! ## Quick Start
//!
//! ```rust
//! use maritime_sim::{BroadcastHub, BroadcastScheduler, PortCatalog, SchedulerConfig};
//!
//! let hub = BroadcastHub::default();
//! let mut updates = hub.subscribe();
//!
//! let mut scheduler =
//!     BroadcastScheduler::new(SchedulerConfig::default(), PortCatalog::default(), hub);
//! scheduler.add_vessel("123456789", 15.0).unwrap();
//!
//! scheduler.tick(chrono::Utc::now());
//! assert!(updates.try_recv().is_ok());
//! ```
//!
//! ## Architecture
//!
//! - [`geo`] - Great-circle math on latitude/longitude pairs
//! - [`ports`] - Catalog of named ports
//! - [`route`] - Waypoint routes between two points
//! - [`voyage`] - Per-vessel voyage state and position reports
//! - [`scheduler`] - Periodic broadcast loop and control commands
//! - [`broadcast`] / [`server`] - Fan-out to TCP subscribers
//! - [`ingestion`] / [`storage`] - Validating, de-duplicating batch persistence
//! - [`settings`] - Layered configuration for the binaries

pub mod broadcast;
pub mod geo;
pub mod ingestion;
pub mod ports;
pub mod protocol;
pub mod route;
pub mod scheduler;
pub mod server;
pub mod settings;
pub mod storage;
pub mod voyage;

// Re-export main public types for convenience
pub use broadcast::BroadcastHub;
pub use geo::Waypoint;
pub use ingestion::{IngestionConfig, IngestionPipeline, IngestionStats};
pub use ports::{Port, PortCatalog};
pub use protocol::{AivdmMessage, ControlCommand, ServerEvent};
pub use route::{Route, RouteGenerator};
pub use scheduler::{BroadcastScheduler, SchedulerConfig, SchedulerStats};
pub use settings::Settings;
pub use storage::{MemoryStorage, Storage};
pub use voyage::{Mmsi, PositionReport, VoyageSimulator};
