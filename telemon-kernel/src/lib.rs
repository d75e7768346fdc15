//! Telemon Kernel - Telemetry cache and time-series aggregation engine
//!
//! Sits between a key-value backing store (sorted sets of JSON snapshots per
//! host) and the consumers that render host dashboards:
//! - TTL cache tier in front of every store read, with explicit refresh
//! - Per-metric-group chart formatting (Memory, Network, Disk, IO, ...)
//! - Online/offline roster computation
//! - Background maintenance loop: proactive refresh and retention trimming

pub mod aggregate;
pub mod cache;
pub mod coerce;
pub mod config;
pub mod error;
pub mod health;
pub mod maintenance;
pub mod roster;
pub mod series;
pub mod service;
pub mod snapshot;
pub mod store;

pub use aggregate::{format_series, format_series_named, ChartPayload};
pub use config::{load_config, KernelConfig, StoreBackend};
pub use error::{KernelError, KernelResult};
pub use health::{HealthTracker, KernelHealth};
pub use maintenance::{MaintenanceLoop, TickReport};
pub use roster::{HostStatus, RosterPayload};
pub use series::TimeSeries;
pub use service::{HostDetail, ServiceSettings, SharedTelemetry, TelemetryService};
pub use snapshot::{MetricGroup, Snapshot};
pub use store::{BackingStore, FileStore, MemoryStore, ScoreBound, StoreKeys};
