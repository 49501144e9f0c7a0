//! Per-hart timing state and the operation executor.
//!
//! A [`HartState`] owns everything the core tracks for one hart: register
//! availability and pending sets, the vector configuration and the latency
//! table. Cache state lives in the shared
//! [`MemoryHierarchy`](crate::cache::MemoryHierarchy) and is passed in per step.
//!
//! # Step protocol
//!
//! ```text
//! legality ──trap──> Trap
//!    │
//! RAW checks ──busy──> Stalled      (pending set updated, events emitted)
//!    │
//! store gate ──wait──> Deferred
//!    │
//! cache accesses
//!    │
//! destination records
//!    │
//! Retired
//! ```
//!
//! Nothing is committed before the RAW checks and the store gate pass, so a
//! stalled or deferred instruction can be re-issued unchanged.

mod execute;
pub mod operation;

pub use operation::{Operation, Reg, Sources, VectorAddressing, VectorMemOp};

use crate::event::Event;
use crate::timing::{HazardStats, HazardTracker, LatencyTable, RegisterKind};
use crate::vector::{VectorConfig, VectorGeometry, VectorTrap};

/// Result of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The instruction completed; its destinations are recorded.
    Retired,
    /// A source register is busy. Re-issue once the hart can resume.
    Stalled,
    /// Scalar stores must drain first. Re-issue later.
    Deferred,
    /// Architectural exception; nothing was changed.
    Trap(VectorTrap),
}

impl StepOutcome {
    /// Whether the instruction made architectural progress.
    pub fn is_retired(&self) -> bool {
        matches!(self, StepOutcome::Retired)
    }
}

/// Per-hart execution counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HartStats {
    pub retired: u64,
    pub stalls: u64,
    pub deferrals: u64,
    pub traps: u64,
}

/// Timing state of one hart.
#[derive(Debug, Clone)]
pub struct HartState {
    id: usize,
    tracker: HazardTracker,
    vector: VectorConfig,
    latencies: LatencyTable,
    events: Vec<Event>,
    stats: HartStats,
}

impl HartState {
    /// Create a hart with every register ready.
    pub fn new(id: usize, geometry: VectorGeometry, latencies: LatencyTable) -> Self {
        Self {
            id,
            tracker: HazardTracker::new(id),
            vector: VectorConfig::new(geometry),
            latencies,
            events: Vec::new(),
            stats: HartStats::default(),
        }
    }

    /// Hart id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Hazard tracker.
    pub fn tracker(&self) -> &HazardTracker {
        &self.tracker
    }

    /// Vector configuration.
    pub fn vector(&self) -> &VectorConfig {
        &self.vector
    }

    /// Mutable vector configuration.
    pub fn vector_mut(&mut self) -> &mut VectorConfig {
        &mut self.vector
    }

    /// Latency table.
    pub fn latencies(&self) -> &LatencyTable {
        &self.latencies
    }

    /// Execution counters.
    pub fn stats(&self) -> HartStats {
        self.stats
    }

    /// Hazard counters.
    pub fn hazard_stats(&self) -> HazardStats {
        self.tracker.stats()
    }

    /// Drain events produced by previous steps.
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// A memory event for `reg` completed at `cycle`.
    ///
    /// Returns true when the hart has nothing left to wait for.
    pub fn acknowledge(&mut self, kind: RegisterKind, reg: usize, cycle: u64) -> bool {
        self.tracker.acknowledge(kind, reg, cycle)
    }

    /// A known-latency producer of `src` completed.
    ///
    /// Returns true when the hart has nothing left to wait for.
    pub fn resolve_known_latency(&mut self, kind: RegisterKind, src: usize) -> bool {
        self.tracker.resolve_known_latency(kind, src)
    }

    /// True when no register is pending.
    pub fn can_resume(&self) -> bool {
        self.tracker.can_resume()
    }

    /// Apply a vector length granted by an external vector unit.
    pub fn set_virtual_vector_length(&mut self, vvl: usize) {
        self.vector.set_granted_vl(vvl);
        log::debug!("hart {}: granted VL {} (now {})", self.id, vvl, self.vector.vl());
    }
}
