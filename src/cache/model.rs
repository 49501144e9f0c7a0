//! Set-associative cache model.
//!
//! Models hit/miss, LRU order, dirty state and write-back generation. No
//! timing: the owning timing model decides when a miss resolves.
//!
//! # Line states
//!
//! ```text
//!            fill (load)            store hit
//! Invalid ----------------> Clean ------------> Dirty
//!    ^     fill (store, WB)                       |
//!    |  ----------------------------------------> |
//!    |                                            |
//!    +------------- eviction (write-back) --------+
//! ```
//!
//! # Fill modes
//!
//! - **Immediate**: a miss selects a victim and installs the line at once.
//! - **Deferred**: a miss only registers the line in the [`MissRegistry`];
//!   the line is installed by [`CacheModel::service_request`] when the timing
//!   model reports the fill complete.
//!
//! Both modes record the miss so in-flight counts stay meaningful until the
//! timing model services it.
//!
//! # Victim selection
//!
//! First invalid way in the set, else the way with the smallest `last_used`
//! (ties go to the lowest way).

use std::fmt;

use serde::{Deserialize, Serialize};

use super::geometry::CacheGeometry;
use super::miss_registry::MissRegistry;
use super::request::{AccessKind, CacheRequest};
use crate::error::ConfigResult;

/// Valid bit of an encoded victim descriptor.
pub const VICTIM_VALID: u64 = 1 << 63;

/// Dirty bit of an encoded victim descriptor.
pub const VICTIM_DIRTY: u64 = 1 << 62;

/// When stores reach the next level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Stores dirty the line; the next level sees it on eviction.
    #[default]
    WriteBack,
    /// Stores go straight through; lines never become dirty.
    WriteThrough,
}

/// When a missing line is installed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    /// Install on the missing access.
    Immediate,
    /// Install when the timing model services the miss.
    #[default]
    Deferred,
}

/// One way of one set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheLine {
    /// Line address held by this way.
    pub tag: u64,
    /// Holds data.
    pub valid: bool,
    /// Modified since fill.
    pub dirty: bool,
    /// Access counter value of the last touch.
    pub last_used: u64,
}

/// The line displaced by a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VictimDescriptor {
    /// Line address of the displaced line.
    pub line: u64,
    /// The way held data.
    pub valid: bool,
    /// The data was modified.
    pub dirty: bool,
}

impl VictimDescriptor {
    /// An empty way: nothing was displaced.
    pub const EMPTY: VictimDescriptor = VictimDescriptor {
        line: 0,
        valid: false,
        dirty: false,
    };

    /// Whether the displaced line has to be written back.
    #[inline]
    pub fn needs_writeback(&self) -> bool {
        self.valid && self.dirty
    }

    /// Pack as `line | VALID | DIRTY`.
    pub fn encode(&self) -> u64 {
        let mut word = self.line & !(VICTIM_VALID | VICTIM_DIRTY);
        if self.valid {
            word |= VICTIM_VALID;
        }
        if self.dirty {
            word |= VICTIM_DIRTY;
        }
        word
    }

    /// Unpack an encoded descriptor.
    pub fn decode(word: u64) -> Self {
        Self {
            line: word & !(VICTIM_VALID | VICTIM_DIRTY),
            valid: word & VICTIM_VALID != 0,
            dirty: word & VICTIM_DIRTY != 0,
        }
    }
}

/// Result of one access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessOutcome {
    /// The line was resident.
    pub hit: bool,
    /// Address of a dirty line evicted by this access (immediate fill only).
    pub writeback: Option<u64>,
}

/// Access counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub read_accesses: u64,
    pub write_accesses: u64,
    pub read_misses: u64,
    pub write_misses: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub writebacks: u64,
}

impl CacheStats {
    /// Misses over accesses, in percent.
    pub fn miss_rate(&self) -> f64 {
        let accesses = self.read_accesses + self.write_accesses;
        if accesses == 0 {
            return 0.0;
        }
        100.0 * (self.read_misses + self.write_misses) as f64 / accesses as f64
    }

    /// Merge another stats instance into this one.
    pub fn merge(&mut self, other: &CacheStats) {
        self.read_accesses += other.read_accesses;
        self.write_accesses += other.write_accesses;
        self.read_misses += other.read_misses;
        self.write_misses += other.write_misses;
        self.bytes_read += other.bytes_read;
        self.bytes_written += other.bytes_written;
        self.writebacks += other.writebacks;
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Bytes Read:     {}", self.bytes_read)?;
        writeln!(f, "Bytes Written:  {}", self.bytes_written)?;
        writeln!(f, "Read Accesses:  {}", self.read_accesses)?;
        writeln!(f, "Write Accesses: {}", self.write_accesses)?;
        writeln!(f, "Read Misses:    {}", self.read_misses)?;
        writeln!(f, "Write Misses:   {}", self.write_misses)?;
        writeln!(f, "Writebacks:     {}", self.writebacks)?;
        write!(f, "Miss Rate:      {:.3}%", self.miss_rate())
    }
}

/// A single set-associative cache.
#[derive(Debug, Clone)]
pub struct CacheModel {
    name: String,
    geometry: CacheGeometry,
    /// Set-major: way `w` of set `s` is at `s * ways + w`.
    lines: Vec<CacheLine>,
    counter: u64,
    write_policy: WritePolicy,
    fill_mode: FillMode,
    misses: MissRegistry,
    stats: CacheStats,
}

impl CacheModel {
    /// Create an empty cache.
    pub fn new(name: impl Into<String>, geometry: CacheGeometry, write_policy: WritePolicy, fill_mode: FillMode) -> Self {
        Self {
            name: name.into(),
            geometry,
            lines: vec![CacheLine::default(); geometry.sets() * geometry.ways()],
            counter: 0,
            write_policy,
            fill_mode,
            misses: MissRegistry::new(),
            stats: CacheStats::default(),
        }
    }

    /// Create a cache from a `sets:ways:lineBytes` string.
    pub fn from_spec(name: impl Into<String>, spec: &str, write_policy: WritePolicy, fill_mode: FillMode) -> ConfigResult<Self> {
        let geometry = CacheGeometry::parse(spec)?;
        Ok(Self::new(name, geometry, write_policy, fill_mode))
    }

    /// Name used in logs and reports (`I$`, `D$`, `L2$`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cache shape.
    pub fn geometry(&self) -> &CacheGeometry {
        &self.geometry
    }

    /// Write policy.
    pub fn write_policy(&self) -> WritePolicy {
        self.write_policy
    }

    /// Fill mode.
    pub fn fill_mode(&self) -> FillMode {
        self.fill_mode
    }

    /// Outstanding misses.
    pub fn miss_registry(&self) -> &MissRegistry {
        &self.misses
    }

    /// Counters.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn set_range(&self, addr: u64) -> std::ops::Range<usize> {
        let base = self.geometry.set_index(addr) * self.geometry.ways();
        base..base + self.geometry.ways()
    }

    fn find(&self, addr: u64) -> Option<usize> {
        let tag = self.geometry.line_address(addr);
        self.set_range(addr)
            .find(|&i| self.lines[i].valid && self.lines[i].tag == tag)
    }

    fn select_victim(&self, addr: u64) -> usize {
        let range = self.set_range(addr);
        if let Some(free) = range.clone().find(|&i| !self.lines[i].valid) {
            return free;
        }
        let mut victim = range.start;
        for i in range {
            if self.lines[i].last_used < self.lines[victim].last_used {
                victim = i;
            }
        }
        victim
    }

    fn tick(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    /// Whether the line holding `addr` is resident. Does not touch LRU state.
    pub fn probe(&self, addr: u64) -> bool {
        self.find(addr).is_some()
    }

    /// State of the line holding `addr`, if resident.
    pub fn line(&self, addr: u64) -> Option<CacheLine> {
        self.find(addr).map(|i| self.lines[i])
    }

    /// Look up `bytes` at `addr`.
    pub fn access(&mut self, addr: u64, bytes: usize, is_store: bool) -> AccessOutcome {
        if is_store {
            self.stats.write_accesses += 1;
            self.stats.bytes_written += bytes as u64;
        } else {
            self.stats.read_accesses += 1;
            self.stats.bytes_read += bytes as u64;
        }
        let now = self.tick();
        let dirty_on_store = is_store && self.write_policy == WritePolicy::WriteBack;

        if let Some(i) = self.find(addr) {
            let line = &mut self.lines[i];
            line.last_used = now;
            if dirty_on_store {
                line.dirty = true;
            }
            return AccessOutcome {
                hit: true,
                writeback: None,
            };
        }

        if is_store {
            self.stats.write_misses += 1;
        } else {
            self.stats.read_misses += 1;
        }
        let line_addr = self.geometry.line_address(addr);
        let fresh = self.misses.register_miss(line_addr, is_store);
        log::debug!(
            "{} {} miss 0x{:x}{}",
            self.name,
            if is_store { "write" } else { "read" },
            addr,
            if fresh { "" } else { " (coalesced)" }
        );

        let writeback = match self.fill_mode {
            FillMode::Deferred => None,
            FillMode::Immediate => {
                let victim = self.install(line_addr, now);
                if dirty_on_store {
                    if let Some(i) = self.find(line_addr) {
                        self.lines[i].dirty = true;
                    }
                }
                self.writeback_for(victim)
            }
        };
        AccessOutcome { hit: false, writeback }
    }

    fn writeback_for(&mut self, victim: VictimDescriptor) -> Option<u64> {
        if !victim.needs_writeback() {
            return None;
        }
        self.stats.writebacks += 1;
        log::debug!("{} write-back 0x{:x}", self.name, victim.line);
        Some(victim.line)
    }

    /// Evict a way in `addr`'s set and install `addr`'s line there, clean.
    fn install(&mut self, line_addr: u64, now: u64) -> VictimDescriptor {
        let way = self.select_victim(line_addr);
        let old = self.lines[way];
        self.lines[way] = CacheLine {
            tag: line_addr,
            valid: true,
            dirty: false,
            last_used: now,
        };
        if old.valid {
            VictimDescriptor {
                line: old.tag,
                valid: true,
                dirty: old.dirty,
            }
        } else {
            VictimDescriptor::EMPTY
        }
    }

    /// Select a victim for `addr`'s set and install `addr`'s line.
    ///
    /// Returns the displaced line. If the line is already resident nothing is
    /// displaced and the line is only touched.
    pub fn victimize(&mut self, addr: u64) -> VictimDescriptor {
        let now = self.tick();
        if let Some(i) = self.find(addr) {
            self.lines[i].last_used = now;
            return VictimDescriptor::EMPTY;
        }
        self.install(self.geometry.line_address(addr), now)
    }

    /// Accept a full-line write-back from the level above.
    ///
    /// The line is allocated without a fetch and left dirty under write-back.
    /// Returns the address of a dirty line displaced to make room.
    pub fn absorb_writeback(&mut self, addr: u64) -> Option<u64> {
        self.stats.write_accesses += 1;
        self.stats.bytes_written += self.geometry.line_bytes() as u64;
        let now = self.tick();
        let line_addr = self.geometry.line_address(addr);

        let victim = match self.find(line_addr) {
            Some(i) => {
                self.lines[i].last_used = now;
                VictimDescriptor::EMPTY
            }
            None => {
                self.stats.write_misses += 1;
                self.install(line_addr, now)
            }
        };
        if self.write_policy == WritePolicy::WriteBack {
            if let Some(i) = self.find(line_addr) {
                self.lines[i].dirty = true;
            }
        }
        self.writeback_for(victim)
    }

    /// Complete an outstanding miss.
    ///
    /// Installs the line if it is not yet resident and returns a write-back
    /// request when a dirty line was displaced. The write-back carries the
    /// original request's destination register.
    pub fn service_request(&mut self, request: &CacheRequest) -> Option<CacheRequest> {
        if request.kind == AccessKind::Writeback {
            return None;
        }
        let line_addr = self.geometry.line_address(request.address);
        let coalesced_store = self
            .misses
            .resolve_miss(line_addr)
            .map(|entry| entry.is_store)
            .unwrap_or(false);

        let writeback = if self.find(line_addr).is_some() {
            None
        } else {
            let victim = self.victimize(line_addr);
            self.writeback_for(victim).map(|addr| {
                CacheRequest::new(
                    addr,
                    self.geometry.line_bytes(),
                    AccessKind::Writeback,
                    request.level,
                    request.hart_id,
                )
                .with_pc(request.pc)
                .with_destination(request.destination)
            })
        };

        if (request.is_store() || coalesced_store) && self.write_policy == WritePolicy::WriteBack {
            if let Some(i) = self.find(line_addr) {
                self.lines[i].dirty = true;
            }
        }
        writeback
    }

    /// Invalidate every line and forget outstanding misses. Counters are kept.
    pub fn invalidate_all(&mut self) {
        self.lines.fill(CacheLine::default());
        self.misses.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::request::{Destination, MemoryLevel};
    use crate::timing::RegisterKind;

    fn small(fill: FillMode) -> CacheModel {
        CacheModel::from_spec("D$", "4:2:16", WritePolicy::WriteBack, fill).unwrap()
    }

    #[test]
    fn test_distinct_sets_all_miss() {
        let mut cache = small(FillMode::Immediate);
        for addr in [0x00, 0x10, 0x20, 0x30] {
            let outcome = cache.access(addr, 4, false);
            assert!(!outcome.hit);
            assert_eq!(outcome.writeback, None);
        }
        let stats = cache.stats();
        assert_eq!(stats.read_misses, 4);
        assert_eq!(stats.writebacks, 0);
        for addr in [0x00, 0x10, 0x20, 0x30] {
            assert!(cache.probe(addr));
        }
    }

    #[test]
    fn test_lru_eviction_with_writeback() {
        let mut cache = small(FillMode::Immediate);
        // 0x00, 0x40 and 0x80 all map to set 0
        assert!(!cache.access(0x00, 4, true).hit);
        assert!(!cache.access(0x40, 4, false).hit);

        let outcome = cache.access(0x80, 4, false);
        assert!(!outcome.hit);
        assert_eq!(outcome.writeback, Some(0x00));
        assert!(!cache.probe(0x00));
        assert!(cache.probe(0x40));
        assert!(cache.probe(0x80));
        assert_eq!(cache.stats().writebacks, 1);
    }

    #[test]
    fn test_lru_eviction_clean_victim() {
        let mut cache = small(FillMode::Immediate);
        cache.access(0x00, 4, false);
        cache.access(0x40, 4, false);
        let outcome = cache.access(0x80, 4, false);
        assert_eq!(outcome.writeback, None);
        assert!(!cache.probe(0x00));
    }

    #[test]
    fn test_lru_respects_recent_hit() {
        let mut cache = small(FillMode::Immediate);
        cache.access(0x00, 4, false);
        cache.access(0x40, 4, false);
        // Touch 0x00 again so 0x40 becomes LRU
        assert!(cache.access(0x00, 4, false).hit);
        cache.access(0x80, 4, false);
        assert!(cache.probe(0x00));
        assert!(!cache.probe(0x40));
    }

    #[test]
    fn test_no_duplicate_residency() {
        let mut cache = small(FillMode::Immediate);
        cache.access(0x04, 4, false);
        cache.access(0x08, 4, true);
        cache.victimize(0x0c);
        let resident = cache
            .lines
            .iter()
            .filter(|l| l.valid && l.tag == 0x00)
            .count();
        assert_eq!(resident, 1);
    }

    #[test]
    fn test_store_hit_dirties_under_write_back() {
        let mut cache = small(FillMode::Immediate);
        cache.access(0x10, 4, false);
        assert!(!cache.line(0x10).unwrap().dirty);
        cache.access(0x14, 4, true);
        assert!(cache.line(0x10).unwrap().dirty);
    }

    #[test]
    fn test_write_through_never_dirty() {
        let mut cache = CacheModel::from_spec("D$", "4:2:16", WritePolicy::WriteThrough, FillMode::Immediate).unwrap();
        cache.access(0x00, 4, true);
        cache.access(0x00, 4, true);
        assert!(!cache.line(0x00).unwrap().dirty);
        cache.access(0x40, 4, false);
        assert_eq!(cache.access(0x80, 4, false).writeback, None);
        assert_eq!(cache.stats().writebacks, 0);
    }

    #[test]
    fn test_direct_mapped() {
        let mut cache = CacheModel::from_spec("I$", "4:1:16", WritePolicy::WriteBack, FillMode::Immediate).unwrap();
        cache.access(0x00, 4, false);
        cache.access(0x40, 4, false);
        assert!(!cache.probe(0x00));
        assert!(cache.probe(0x40));
    }

    #[test]
    fn test_deferred_fill() {
        let mut cache = small(FillMode::Deferred);
        assert!(!cache.access(0x20, 8, false).hit);
        assert!(!cache.probe(0x20));
        assert_eq!(cache.miss_registry().count_in_flight(), 1);

        // Second miss coalesces but still reports a miss
        assert!(!cache.access(0x28, 8, false).hit);
        assert_eq!(cache.miss_registry().count_in_flight(), 1);
        assert_eq!(cache.stats().read_misses, 2);

        let req = CacheRequest::new(0x20, 16, AccessKind::Load, MemoryLevel::L1Data, 0);
        assert_eq!(cache.service_request(&req), None);
        assert!(cache.probe(0x28));
        assert_eq!(cache.miss_registry().count_in_flight(), 0);
        assert!(cache.access(0x20, 8, false).hit);
    }

    #[test]
    fn test_service_request_writeback_carries_destination() {
        let mut cache = small(FillMode::Deferred);
        let dest = Some(Destination {
            kind: RegisterKind::Integer,
            reg: 5,
        });

        // Fill set 0 with two lines, the first dirty
        cache.access(0x00, 4, true);
        let store = CacheRequest::new(0x00, 4, AccessKind::Store, MemoryLevel::L1Data, 0);
        assert_eq!(cache.service_request(&store), None);
        assert!(cache.line(0x00).unwrap().dirty);

        cache.access(0x40, 4, false);
        let load = CacheRequest::new(0x40, 4, AccessKind::Load, MemoryLevel::L1Data, 0);
        assert_eq!(cache.service_request(&load), None);

        cache.access(0x80, 4, false);
        let load = CacheRequest::new(0x80, 4, AccessKind::Load, MemoryLevel::L1Data, 0)
            .with_pc(0x400)
            .with_destination(dest);
        let wb = cache.service_request(&load).unwrap();
        assert_eq!(wb.address, 0x00);
        assert_eq!(wb.size, 16);
        assert_eq!(wb.kind, AccessKind::Writeback);
        assert_eq!(wb.destination, dest);
        assert_eq!(wb.pc, 0x400);
        assert_eq!(cache.stats().writebacks, 1);
    }

    #[test]
    fn test_coalesced_store_dirties_fill() {
        let mut cache = small(FillMode::Deferred);
        cache.access(0x30, 4, false);
        cache.access(0x34, 4, true);
        let load = CacheRequest::new(0x30, 4, AccessKind::Load, MemoryLevel::L1Data, 0);
        cache.service_request(&load);
        assert!(cache.line(0x30).unwrap().dirty);
    }

    #[test]
    fn test_service_resident_line_only_updates_dirty() {
        let mut cache = small(FillMode::Immediate);
        cache.access(0x00, 4, true);
        cache.access(0x40, 4, false);
        let store = CacheRequest::new(0x00, 4, AccessKind::Store, MemoryLevel::L1Data, 0);
        assert_eq!(cache.service_request(&store), None);
        assert!(cache.probe(0x40));
        assert_eq!(cache.miss_registry().count_in_flight(), 1);
    }

    #[test]
    fn test_writeback_conservation() {
        let mut cache = small(FillMode::Immediate);
        let mut emitted = 0;
        for i in 0..64u64 {
            let addr = (i % 12) * 0x40;
            if cache.access(addr, 4, i % 3 == 0).writeback.is_some() {
                emitted += 1;
            }
        }
        assert_eq!(emitted, cache.stats().writebacks);
        assert!(emitted > 0);
    }

    #[test]
    fn test_victimize_descriptor() {
        let mut cache = small(FillMode::Deferred);
        assert_eq!(cache.victimize(0x00), VictimDescriptor::EMPTY);
        cache.victimize(0x40);
        let store = CacheRequest::new(0x40, 4, AccessKind::Store, MemoryLevel::L1Data, 0);
        cache.service_request(&store);

        // 0x00 is LRU and clean
        let victim = cache.victimize(0x80);
        assert_eq!(victim, VictimDescriptor { line: 0x00, valid: true, dirty: false });

        // 0x40 is now LRU and dirty
        let victim = cache.victimize(0xc0);
        assert!(victim.needs_writeback());
        assert_eq!(victim.encode(), 0x40 | VICTIM_VALID | VICTIM_DIRTY);
        assert_eq!(VictimDescriptor::decode(victim.encode()), victim);
    }

    #[test]
    fn test_victimize_resident_line_evicts_nothing() {
        let mut cache = small(FillMode::Immediate);
        cache.access(0x00, 4, false);
        assert_eq!(cache.victimize(0x00), VictimDescriptor::EMPTY);
        assert!(cache.probe(0x00));
    }

    #[test]
    fn test_stats_report() {
        let mut cache = small(FillMode::Immediate);
        cache.access(0x00, 8, false);
        cache.access(0x00, 8, false);
        cache.access(0x10, 4, true);
        cache.access(0x10, 4, true);
        let stats = cache.stats();
        assert_eq!(stats.bytes_read, 16);
        assert_eq!(stats.bytes_written, 8);
        assert!((stats.miss_rate() - 50.0).abs() < 1e-9);
        let report = stats.to_string();
        assert!(report.contains("Read Misses:    1"));
        assert!(report.contains("Miss Rate:      50.000%"));
    }

    #[test]
    fn test_absorb_writeback() {
        let mut cache = small(FillMode::Deferred);
        assert_eq!(cache.absorb_writeback(0x44), None);
        assert!(cache.line(0x40).unwrap().dirty);
        assert_eq!(cache.miss_registry().count_in_flight(), 0);

        cache.absorb_writeback(0x80);
        // Set 0 is full of dirty lines; 0x40 is LRU
        assert_eq!(cache.absorb_writeback(0xc0), Some(0x40));
        assert_eq!(cache.stats().writebacks, 1);
    }

    #[test]
    fn test_invalidate_all() {
        let mut cache = small(FillMode::Deferred);
        cache.access(0x00, 4, false);
        cache.victimize(0x10);
        cache.invalidate_all();
        assert!(!cache.probe(0x10));
        assert_eq!(cache.miss_registry().count_in_flight(), 0);
    }
}
