//! Simulator façade for the timing model.
//!
//! The timing model drives the harts one operation at a time, schedules the
//! returned events and calls back in when a request completes:
//!
//! ```text
//!  timing model                      Simulator
//!  ------------                      ---------
//!  simulate_one(hart, op, t) ──────> step + fetch
//!                            <────── outcome, events
//!  service_request(req, t)   ──────> fill line, maybe write-back
//!  acknowledge(hart, reg, t) ──────> pending count down
//!  can_resume(...)           ──────> known-latency stall resolved
//! ```

use anyhow::Context;

use crate::cache::{CacheRequest, MemoryHierarchy, VictimDescriptor};
use crate::config::Config;
use crate::error::ConfigError;
use crate::event::Event;
use crate::hart::{HartState, Operation, StepOutcome};
use crate::timing::{HazardStats, RegisterKind};

/// Bytes fetched per instruction.
const FETCH_BYTES: usize = 4;

/// What one call to [`Simulator::simulate_one`] produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SimStep {
    pub outcome: StepOutcome,
    /// Memory, dependency and fence events, in issue order.
    pub events: Vec<Event>,
}

/// All harts plus the shared memory hierarchy.
#[derive(Debug, Clone)]
pub struct Simulator {
    harts: Vec<HartState>,
    memory: MemoryHierarchy,
}

impl Simulator {
    /// Build a simulator from a configuration.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let num_harts = config.num_harts();
        if num_harts == 0 {
            return Err(ConfigError::NoHarts.into());
        }
        let hierarchy = config.hierarchy().context("Invalid cache configuration")?;
        let geometry = config.vector_geometry().context("Invalid vector unit configuration")?;
        let latencies = config.latency_table().context("Invalid latency configuration")?;

        let harts = (0..num_harts)
            .map(|id| HartState::new(id, geometry, latencies.clone()))
            .collect();
        log::info!(
            "hartsim: {} harts, VLEN={} ELEN={} SLEN={}",
            num_harts,
            geometry.vlen(),
            geometry.elen(),
            geometry.slen()
        );
        Ok(Self {
            harts,
            memory: MemoryHierarchy::new(num_harts, &hierarchy),
        })
    }

    /// Number of harts.
    pub fn num_harts(&self) -> usize {
        self.harts.len()
    }

    /// State of one hart.
    pub fn hart(&self, hart: usize) -> &HartState {
        &self.harts[hart]
    }

    /// Mutable state of one hart.
    pub fn hart_mut(&mut self, hart: usize) -> &mut HartState {
        &mut self.harts[hart]
    }

    /// Shared memory hierarchy.
    pub fn memory(&self) -> &MemoryHierarchy {
        &self.memory
    }

    /// Run one operation on `hart` at `cycle`.
    ///
    /// The instruction fetch is only charged once the instruction leaves the
    /// pipeline (retired or trapped); a stalled or deferred instruction is
    /// fetched when it is re-issued and completes.
    pub fn simulate_one(&mut self, hart: usize, pc: u64, op: &Operation, cycle: u64) -> SimStep {
        let state = &mut self.harts[hart];
        let outcome = state.step(pc, op, cycle, &mut self.memory);
        let mut events = state.take_events();

        if matches!(outcome, StepOutcome::Retired | StepOutcome::Trap(_)) {
            let fetch = self.memory.fetch(hart, pc, FETCH_BYTES);
            events.extend(fetch.requests.into_iter().map(Event::Memory));
        }
        events.extend(self.memory.take_outbound().into_iter().map(Event::Memory));

        log::trace!("hart {} pc 0x{:x} cycle {}: {:?}, {} events", hart, pc, cycle, outcome, events.len());
        SimStep { outcome, events }
    }

    /// A memory event for `reg` completed at `timestamp`.
    ///
    /// Returns true when the hart can resume.
    pub fn acknowledge(&mut self, hart: usize, kind: RegisterKind, reg: usize, timestamp: u64) -> bool {
        self.harts[hart].acknowledge(kind, reg, timestamp)
    }

    /// The known-latency producer of `src_reg` finished.
    ///
    /// Returns true when the hart can resume. The consumer's destination and
    /// latency are only traced.
    #[allow(clippy::too_many_arguments)]
    pub fn can_resume(
        &mut self,
        hart: usize,
        src_reg: usize,
        src_kind: RegisterKind,
        dest_reg: usize,
        dest_kind: RegisterKind,
        latency: u64,
        timestamp: u64,
    ) -> bool {
        log::trace!(
            "hart {}: {}{} ready for {}{} (latency {}) at {}",
            hart,
            src_kind.prefix(),
            src_reg,
            dest_kind.prefix(),
            dest_reg,
            latency,
            timestamp
        );
        self.harts[hart].resolve_known_latency(src_kind, src_reg)
    }

    /// Complete a cache request. Returns the write-back it caused, if any.
    ///
    /// Write-backs further down the hierarchy are reported with the events of
    /// the next [`simulate_one`](Self::simulate_one).
    pub fn service_request(&mut self, request: &CacheRequest, timestamp: u64) -> Option<CacheRequest> {
        log::trace!("service at {}: {}", timestamp, request);
        self.memory.service_request(request)
    }

    /// Install `addr`'s line in the hart's L1 data cache.
    pub fn victimize(&mut self, hart: usize, addr: u64) -> VictimDescriptor {
        self.memory.victimize(hart, addr)
    }

    /// Whether `hart` has scalar stores in flight.
    pub fn check_in_flight_scalar_stores(&self, hart: usize) -> bool {
        self.memory.scalar_stores_in_flight(hart) > 0
    }

    /// One scalar store of `hart` completed.
    pub fn decrement_in_flight_scalar_stores(&mut self, hart: usize) {
        self.memory.decrement_scalar_stores(hart);
    }

    /// Lines the hart's L1 data cache is still fetching.
    pub fn num_in_flight_l1_misses(&self, hart: usize) -> usize {
        self.memory.in_flight_l1_misses(hart)
    }

    /// L1 data hits over all harts.
    pub fn num_l1_data_hits(&self) -> u64 {
        self.memory.l1_data_hits()
    }

    /// Apply a vector length granted by an external vector unit.
    pub fn set_virtual_vector_length(&mut self, hart: usize, vvl: usize) {
        self.harts[hart].set_virtual_vector_length(vvl);
    }

    /// Hazard counters summed over all harts.
    pub fn hazard_stats(&self) -> HazardStats {
        let mut total = HazardStats::default();
        for hart in &self.harts {
            total.merge(&hart.hazard_stats());
        }
        total
    }

    /// Log cache reports and per-hart counters.
    pub fn log_stats(&self) {
        self.memory.log_stats();
        for hart in &self.harts {
            let stats = hart.stats();
            log::info!(
                "hart {}: retired {} stalls {} deferrals {} traps {}",
                hart.id(),
                stats.retired,
                stats.stalls,
                stats.deferrals,
                stats.traps
            );
        }
        log::info!("hazards: {:?}", self.hazard_stats());
    }
}
