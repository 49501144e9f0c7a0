//! Register hazard tracking for one hart.
//!
//! The interpreter calls into a [`HazardTracker`] before consuming a source
//! register and after producing a destination:
//!
//! ```text
//! begin_instruction(pc, latency)
//!   check_read(Integer, 3, cycle)        ; RAW check, memoized
//!   check_vector_group(8, 4, cycle)      ; OR across v8..v11
//!   ...                                  ; stall -> return without side effects
//!   record_write(Integer, 5, 0, At(c+1))
//! end_instruction()                      ; clears the memo
//! ```
//!
//! A stalled read puts the register in the hart's pending set. The scheduler
//! later clears it with [`HazardTracker::acknowledge`] (memory completions) or
//! [`HazardTracker::resolve_known_latency`] (compute results), and the hart may
//! resume once every pending set is empty.
//!
//! When the blocking register's availability is still [`Availability::Unknown`]
//! a [`DependencyEvent`] is emitted so the scheduler learns why the hart is
//! waiting. A finite availability emits nothing: the scheduler already holds
//! that timestamp.

use std::collections::BTreeSet;

use smallvec::SmallVec;

use super::availability::{Availability, RegisterAvailability, RegisterKind};

/// Type of data hazard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HazardType {
    /// Read After Write: reading before the producer's result is available.
    Raw,
    /// Write After Write: re-arming a register whose previous write is still pending.
    Waw,
}

/// Why an instruction stalled on a register whose resolution time is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyEvent {
    /// PC of the stalled instruction.
    pub pc: u64,
    /// Hart that stalled.
    pub hart_id: usize,
    /// Blocking register.
    pub register: usize,
    /// Register file of the blocking register.
    pub kind: RegisterKind,
    /// Cycle at which the stalled instruction may proceed (not known yet).
    pub target_cycle: Availability,
    /// Latency of the stalled instruction.
    pub instruction_latency: u64,
    /// Availability of the blocking register at check time.
    pub original_available_at: Availability,
}

/// Identity of the instruction currently being checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct InstructionInfo {
    pc: u64,
    latency: u64,
}

type Memo = SmallVec<[(usize, bool); 8]>;

/// Per-kind "already checked in this instruction" memo.
#[derive(Debug, Clone, Default)]
struct CheckMemo {
    integer: Memo,
    float: Memo,
    vector: Memo,
}

impl CheckMemo {
    fn get(&self, kind: RegisterKind) -> &Memo {
        match kind {
            RegisterKind::Integer => &self.integer,
            RegisterKind::Float => &self.float,
            RegisterKind::Vector => &self.vector,
        }
    }

    fn get_mut(&mut self, kind: RegisterKind) -> &mut Memo {
        match kind {
            RegisterKind::Integer => &mut self.integer,
            RegisterKind::Float => &mut self.float,
            RegisterKind::Vector => &mut self.vector,
        }
    }

    fn lookup(&self, kind: RegisterKind, reg: usize) -> Option<bool> {
        self.get(kind)
            .iter()
            .find(|(r, _)| *r == reg)
            .map(|(_, stalled)| *stalled)
    }

    fn clear(&mut self) {
        self.integer.clear();
        self.float.clear();
        self.vector.clear();
    }
}

/// Register hazard tracking for one hart.
#[derive(Debug, Clone)]
pub struct HazardTracker {
    hart_id: usize,
    integer: RegisterAvailability,
    float: RegisterAvailability,
    vector: RegisterAvailability,

    /// Registers this hart is waiting on, per file.
    pending_integer: BTreeSet<usize>,
    pending_float: BTreeSet<usize>,
    pending_vector: BTreeSet<usize>,

    memo: CheckMemo,
    current: InstructionInfo,
    events: Vec<DependencyEvent>,
    stats: HazardStats,
}

impl HazardTracker {
    /// Create a tracker with every register available at cycle 0.
    pub fn new(hart_id: usize) -> Self {
        Self {
            hart_id,
            integer: RegisterAvailability::integer(),
            float: RegisterAvailability::float(),
            vector: RegisterAvailability::vector(),
            pending_integer: BTreeSet::new(),
            pending_float: BTreeSet::new(),
            pending_vector: BTreeSet::new(),
            memo: CheckMemo::default(),
            current: InstructionInfo::default(),
            events: Vec::new(),
            stats: HazardStats::default(),
        }
    }

    /// Hart this tracker belongs to.
    pub fn hart_id(&self) -> usize {
        self.hart_id
    }

    /// Availability file for a register kind.
    pub fn file(&self, kind: RegisterKind) -> &RegisterAvailability {
        match kind {
            RegisterKind::Integer => &self.integer,
            RegisterKind::Float => &self.float,
            RegisterKind::Vector => &self.vector,
        }
    }

    fn file_mut(&mut self, kind: RegisterKind) -> &mut RegisterAvailability {
        match kind {
            RegisterKind::Integer => &mut self.integer,
            RegisterKind::Float => &mut self.float,
            RegisterKind::Vector => &mut self.vector,
        }
    }

    /// Registers of `kind` the hart is waiting on.
    pub fn pending(&self, kind: RegisterKind) -> &BTreeSet<usize> {
        match kind {
            RegisterKind::Integer => &self.pending_integer,
            RegisterKind::Float => &self.pending_float,
            RegisterKind::Vector => &self.pending_vector,
        }
    }

    fn pending_mut(&mut self, kind: RegisterKind) -> &mut BTreeSet<usize> {
        match kind {
            RegisterKind::Integer => &mut self.pending_integer,
            RegisterKind::Float => &mut self.pending_float,
            RegisterKind::Vector => &mut self.pending_vector,
        }
    }

    /// Start checking a new instruction.
    pub fn begin_instruction(&mut self, pc: u64, latency: u64) {
        self.current = InstructionInfo { pc, latency };
    }

    /// Would reading `reg` at `cycle` stall the current instruction?
    ///
    /// Only the first check of a register within one instruction has side
    /// effects; repeated checks return the memoized answer.
    pub fn check_read(&mut self, kind: RegisterKind, reg: usize, cycle: u64) -> bool {
        if let Some(stalled) = self.memo.lookup(kind, reg) {
            return stalled;
        }

        let available = self.file(kind).available_at(reg);
        let stalled = available.is_after(cycle);
        self.memo.get_mut(kind).push((reg, stalled));

        if stalled {
            self.stats.record(HazardType::Raw);
            if available.is_unknown() {
                self.stats.dependency_events += 1;
                self.events.push(DependencyEvent {
                    pc: self.current.pc,
                    hart_id: self.hart_id,
                    register: reg,
                    kind,
                    target_cycle: Availability::Unknown,
                    instruction_latency: self.current.latency,
                    original_available_at: available,
                });
            }
            self.pending_mut(kind).insert(reg);
            log::debug!(
                "hart {}: RAW on {}{} at cycle {} (available {})",
                self.hart_id,
                kind.prefix(),
                reg,
                cycle,
                available
            );
        }
        stalled
    }

    /// Check a vector register group `base..base+count`.
    ///
    /// Stalls if any register in the group is busy. Every register is
    /// checked so each busy one lands in the pending set.
    pub fn check_vector_group(&mut self, base: usize, count: usize, cycle: u64) -> bool {
        let mut stalled = false;
        for reg in base..base + count.max(1) {
            stalled |= self.check_read(RegisterKind::Vector, reg, cycle);
        }
        stalled
    }

    /// True if `reg` still has outstanding events from an earlier write.
    pub fn would_overwrite_pending(&self, kind: RegisterKind, reg: usize) -> bool {
        self.file(kind).pending_count(reg) > 0
    }

    /// Record the timing of a destination write.
    pub fn record_write(&mut self, kind: RegisterKind, reg: usize, pending_events: u8, availability: Availability) {
        if self.would_overwrite_pending(kind, reg) {
            self.stats.record(HazardType::Waw);
            log::debug!(
                "hart {}: WAW on {}{}, previous write still has {} pending events",
                self.hart_id,
                kind.prefix(),
                reg,
                self.file(kind).pending_count(reg)
            );
        }
        self.file_mut(kind).record_write(reg, pending_events, availability);
    }

    /// Record the same write timing for every register of a vector group.
    pub fn record_vector_group_write(&mut self, base: usize, count: usize, pending_events: u8, availability: Availability) {
        for reg in base..base + count.max(1) {
            self.record_write(RegisterKind::Vector, reg, pending_events, availability);
        }
    }

    /// Finish the current instruction, stalled or not.
    pub fn end_instruction(&mut self) {
        self.memo.clear();
    }

    /// Pull the dependency events produced since the last call.
    pub fn take_events(&mut self) -> Vec<DependencyEvent> {
        std::mem::take(&mut self.events)
    }

    /// One outstanding event for `reg` completed at `cycle`.
    ///
    /// Returns true when the hart has nothing left to wait for.
    pub fn acknowledge(&mut self, kind: RegisterKind, reg: usize, cycle: u64) -> bool {
        self.stats.acknowledgments += 1;
        if self.file_mut(kind).acknowledge(reg, cycle) {
            self.pending_mut(kind).remove(&reg);
        }
        self.can_resume()
    }

    /// A known-latency producer of `reg` completed.
    ///
    /// Returns true when the hart has nothing left to wait for.
    pub fn resolve_known_latency(&mut self, kind: RegisterKind, reg: usize) -> bool {
        self.pending_mut(kind).remove(&reg);
        self.can_resume()
    }

    /// True when no register of any kind is pending.
    pub fn can_resume(&self) -> bool {
        self.pending_integer.is_empty() && self.pending_float.is_empty() && self.pending_vector.is_empty()
    }

    /// Statistics.
    pub fn stats(&self) -> HazardStats {
        self.stats
    }

    /// Forget all timing state.
    pub fn reset(&mut self) {
        self.integer.reset();
        self.float.reset();
        self.vector.reset();
        self.pending_integer.clear();
        self.pending_float.clear();
        self.pending_vector.clear();
        self.memo.clear();
        self.events.clear();
        self.current = InstructionInfo::default();
        self.stats = HazardStats::default();
    }
}

/// Hazard statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HazardStats {
    /// Register reads that stalled.
    pub raw_hazards: u64,
    /// Writes that re-armed a register with pending events.
    pub waw_hazards: u64,
    /// Dependency events emitted.
    pub dependency_events: u64,
    /// Acknowledgments received.
    pub acknowledgments: u64,
}

impl HazardStats {
    /// Count one detected hazard.
    pub fn record(&mut self, hazard: HazardType) {
        match hazard {
            HazardType::Raw => self.raw_hazards += 1,
            HazardType::Waw => self.waw_hazards += 1,
        }
    }

    /// Merge another stats instance into this one.
    pub fn merge(&mut self, other: &HazardStats) {
        self.raw_hazards += other.raw_hazards;
        self.waw_hazards += other.waw_hazards;
        self.dependency_events += other.dependency_events;
        self.acknowledgments += other.acknowledgments;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_hazard() {
        let mut tracker = HazardTracker::new(0);
        tracker.begin_instruction(0x1000, 1);
        assert!(!tracker.check_read(RegisterKind::Integer, 5, 0));
        assert!(tracker.can_resume());
    }

    #[test]
    fn test_known_latency_stall_emits_no_event() {
        let mut tracker = HazardTracker::new(0);
        tracker.record_write(RegisterKind::Integer, 3, 0, Availability::At(12));

        tracker.begin_instruction(0x1004, 1);
        assert!(tracker.check_read(RegisterKind::Integer, 3, 10));
        assert!(tracker.take_events().is_empty());
        assert!(tracker.pending(RegisterKind::Integer).contains(&3));
        assert!(!tracker.can_resume());

        assert!(tracker.resolve_known_latency(RegisterKind::Integer, 3));
    }

    #[test]
    fn test_unknown_stall_emits_event() {
        let mut tracker = HazardTracker::new(2);
        tracker.record_write(RegisterKind::Float, 1, 1, Availability::Unknown);

        tracker.begin_instruction(0x2000, 4);
        assert!(tracker.check_read(RegisterKind::Float, 1, 50));

        let events = tracker.take_events();
        assert_eq!(events.len(), 1);
        let ev = events[0];
        assert_eq!(ev.pc, 0x2000);
        assert_eq!(ev.hart_id, 2);
        assert_eq!(ev.register, 1);
        assert_eq!(ev.kind, RegisterKind::Float);
        assert_eq!(ev.instruction_latency, 4);
        assert_eq!(ev.original_available_at, Availability::Unknown);
        assert_eq!(ev.target_cycle, Availability::Unknown);
    }

    #[test]
    fn test_stall_idempotent_within_instruction() {
        let mut tracker = HazardTracker::new(0);
        tracker.record_write(RegisterKind::Integer, 3, 1, Availability::Unknown);

        // x3 referenced through two operand fields
        tracker.begin_instruction(0x100, 1);
        let first = tracker.check_read(RegisterKind::Integer, 3, 10);
        let second = tracker.check_read(RegisterKind::Integer, 3, 10);
        assert!(first);
        assert_eq!(first, second);
        assert_eq!(tracker.take_events().len(), 1);
        assert_eq!(tracker.stats().raw_hazards, 1);
        tracker.end_instruction();

        // Re-issue: a fresh instruction checks again
        tracker.begin_instruction(0x100, 1);
        assert!(tracker.check_read(RegisterKind::Integer, 3, 11));
        assert_eq!(tracker.take_events().len(), 1);
    }

    #[test]
    fn test_memo_is_per_kind() {
        let mut tracker = HazardTracker::new(0);
        tracker.record_write(RegisterKind::Float, 3, 0, Availability::At(9));
        tracker.begin_instruction(0, 1);
        assert!(!tracker.check_read(RegisterKind::Integer, 3, 5));
        assert!(tracker.check_read(RegisterKind::Float, 3, 5));
    }

    #[test]
    fn test_vector_group_or() {
        let mut tracker = HazardTracker::new(0);
        // v10 busy inside the v8..v11 group
        tracker.record_write(RegisterKind::Vector, 10, 1, Availability::Unknown);

        tracker.begin_instruction(0x300, 2);
        assert!(tracker.check_vector_group(8, 4, 20));
        let pending: Vec<_> = tracker.pending(RegisterKind::Vector).iter().copied().collect();
        assert_eq!(pending, vec![10]);

        // A group not containing v10 proceeds
        tracker.end_instruction();
        tracker.begin_instruction(0x304, 2);
        assert!(!tracker.check_vector_group(12, 4, 20));
    }

    #[test]
    fn test_group_records_every_busy_register() {
        let mut tracker = HazardTracker::new(0);
        tracker.record_write(RegisterKind::Vector, 8, 0, Availability::At(30));
        tracker.record_write(RegisterKind::Vector, 11, 2, Availability::Unknown);

        tracker.begin_instruction(0, 1);
        assert!(tracker.check_vector_group(8, 4, 20));
        assert_eq!(tracker.pending(RegisterKind::Vector).len(), 2);
        assert_eq!(tracker.take_events().len(), 1);
    }

    #[test]
    fn test_acknowledge_resumes_only_when_all_clear() {
        let mut tracker = HazardTracker::new(0);
        tracker.record_write(RegisterKind::Integer, 4, 1, Availability::Unknown);
        tracker.record_write(RegisterKind::Vector, 2, 2, Availability::Unknown);

        tracker.begin_instruction(0, 1);
        assert!(tracker.check_read(RegisterKind::Integer, 4, 0));
        assert!(tracker.check_read(RegisterKind::Vector, 2, 0));
        tracker.end_instruction();

        assert!(!tracker.acknowledge(RegisterKind::Integer, 4, 10));
        assert!(!tracker.acknowledge(RegisterKind::Vector, 2, 11));
        assert!(tracker.acknowledge(RegisterKind::Vector, 2, 12));

        assert_eq!(
            tracker.file(RegisterKind::Vector).available_at(2),
            Availability::At(12)
        );
    }

    #[test]
    fn test_waw_counted() {
        let mut tracker = HazardTracker::new(0);
        tracker.record_write(RegisterKind::Integer, 6, 1, Availability::Unknown);
        assert!(tracker.would_overwrite_pending(RegisterKind::Integer, 6));
        tracker.record_write(RegisterKind::Integer, 6, 0, Availability::At(3));
        assert_eq!(tracker.stats().waw_hazards, 1);
        assert!(!tracker.would_overwrite_pending(RegisterKind::Integer, 6));
    }

    #[test]
    fn test_end_instruction_clears_memo() {
        let mut tracker = HazardTracker::new(0);
        tracker.begin_instruction(0, 1);
        assert!(!tracker.check_read(RegisterKind::Integer, 7, 0));
        tracker.end_instruction();

        // The register became busy between instructions
        tracker.record_write(RegisterKind::Integer, 7, 0, Availability::At(5));
        tracker.begin_instruction(4, 1);
        assert!(tracker.check_read(RegisterKind::Integer, 7, 1));
    }

    #[test]
    fn test_hazard_stats_merge() {
        let mut a = HazardStats {
            raw_hazards: 2,
            waw_hazards: 1,
            dependency_events: 1,
            acknowledgments: 3,
        };
        let b = HazardStats {
            raw_hazards: 5,
            waw_hazards: 0,
            dependency_events: 2,
            acknowledgments: 1,
        };
        a.merge(&b);
        assert_eq!(a.raw_hazards, 7);
        assert_eq!(a.waw_hazards, 1);
        assert_eq!(a.dependency_events, 3);
        assert_eq!(a.acknowledgments, 4);
    }

    #[test]
    fn test_reset() {
        let mut tracker = HazardTracker::new(0);
        tracker.record_write(RegisterKind::Integer, 4, 1, Availability::Unknown);
        tracker.begin_instruction(0, 1);
        tracker.check_read(RegisterKind::Integer, 4, 0);
        tracker.reset();
        assert!(tracker.can_resume());
        assert!(tracker.take_events().is_empty());
        assert_eq!(tracker.stats(), HazardStats::default());
    }
}
