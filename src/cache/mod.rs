//! Cache simulation.
//!
//! - **Geometry**: `sets:ways:lineBytes` parsing and address decomposition
//! - **Model**: one set-associative cache (LRU, dirty tracking, write-backs)
//! - **Miss registry**: lines being fetched, with coalescing
//! - **Requests**: miss and write-back traffic exchanged with the timing model
//! - **Hierarchy**: per-hart L1s, optional shared L2, vector bypass

pub mod geometry;
pub mod hierarchy;
pub mod miss_registry;
pub mod model;
pub mod request;

pub use geometry::{CacheGeometry, MAX_WAYS};
pub use hierarchy::{DataAccess, HierarchyConfig, MemoryHierarchy};
pub use miss_registry::{InFlightMiss, MissRegistry};
pub use model::{AccessOutcome, CacheLine, CacheModel, CacheStats, FillMode, VictimDescriptor, WritePolicy};
pub use request::{AccessKind, CacheRequest, Destination, MemoryLevel};
