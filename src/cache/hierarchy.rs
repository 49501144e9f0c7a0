//! Per-hart L1 caches over an optional shared L2.
//!
//! ```text
//!   hart 0            hart 1
//!  +-----+-----+     +-----+-----+
//!  | I$  | D$  |     | I$  | D$  |
//!  +--+--+--+--+     +--+--+--+--+
//!     |     |           |     |        line loads / write-backs
//!  +--v-----v-----------v-----v--+
//!  |             L2$             |     optional
//!  +--------------+--------------+
//!                 |
//!               memory
//! ```
//!
//! Every miss becomes a [`CacheRequest`] for the timing model. An L1 miss
//! that also misses in the L2 produces a second request for the L2 fill; the
//! two are serviced independently. An L2 miss on a line that is already being
//! fetched joins that fill. Only the first-level request names the
//! destination register, so the hart receives one acknowledgment per
//! missing access.
//!
//! Vector memory operations can skip the L1 and the L2. While a hart has
//! scalar stores in flight a vector load that skips the L1 must wait, or it
//! could read memory the store has not reached yet.

use smallvec::SmallVec;

use super::geometry::CacheGeometry;
use super::model::{CacheModel, CacheStats, FillMode, VictimDescriptor, WritePolicy};
use super::request::{AccessKind, CacheRequest, Destination, MemoryLevel};

/// Requests produced by one access.
pub type Requests = SmallVec<[CacheRequest; 4]>;

/// Shape and policies of the hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyConfig {
    pub icache: CacheGeometry,
    pub dcache: CacheGeometry,
    pub l2: Option<CacheGeometry>,
    /// Write policy of the L1 data caches. The L2 is always write-back.
    pub l1_write_policy: WritePolicy,
    pub fill_mode: FillMode,
    pub vector_bypass_l1: bool,
    pub vector_bypass_l2: bool,
}

/// Result of one data access.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataAccess {
    /// Satisfied by the first level consulted.
    pub hit: bool,
    /// Miss and write-back traffic for the timing model.
    pub requests: Requests,
}

#[derive(Debug, Clone)]
struct HartCaches {
    icache: CacheModel,
    dcache: CacheModel,
    scalar_stores_in_flight: usize,
    l1_data_hits: u64,
}

/// Cache hierarchy shared by all harts.
#[derive(Debug, Clone)]
pub struct MemoryHierarchy {
    harts: Vec<HartCaches>,
    l2: Option<CacheModel>,
    l1_write_policy: WritePolicy,
    vector_bypass_l1: bool,
    vector_bypass_l2: bool,
    /// Traffic produced while servicing requests, waiting to be collected.
    outbound: Vec<CacheRequest>,
}

impl MemoryHierarchy {
    /// Build caches for `num_harts` harts.
    pub fn new(num_harts: usize, config: &HierarchyConfig) -> Self {
        let harts = (0..num_harts)
            .map(|_| HartCaches {
                icache: CacheModel::new("I$", config.icache, WritePolicy::WriteBack, config.fill_mode),
                dcache: CacheModel::new("D$", config.dcache, config.l1_write_policy, config.fill_mode),
                scalar_stores_in_flight: 0,
                l1_data_hits: 0,
            })
            .collect();
        let l2 = config
            .l2
            .map(|geometry| CacheModel::new("L2$", geometry, WritePolicy::WriteBack, config.fill_mode));
        log::info!(
            "memory hierarchy: {} harts, I$ {} D$ {} L2$ {}",
            num_harts,
            config.icache,
            config.dcache,
            config.l2.map(|g| g.to_string()).unwrap_or_else(|| "none".to_string())
        );
        Self {
            harts,
            l2,
            l1_write_policy: config.l1_write_policy,
            vector_bypass_l1: config.vector_bypass_l1,
            vector_bypass_l2: config.vector_bypass_l2,
            outbound: Vec::new(),
        }
    }

    /// Number of harts served.
    pub fn num_harts(&self) -> usize {
        self.harts.len()
    }

    /// L1 instruction cache of a hart.
    pub fn icache(&self, hart: usize) -> &CacheModel {
        &self.harts[hart].icache
    }

    /// L1 data cache of a hart.
    pub fn dcache(&self, hart: usize) -> &CacheModel {
        &self.harts[hart].dcache
    }

    /// Shared L2, if configured.
    pub fn l2(&self) -> Option<&CacheModel> {
        self.l2.as_ref()
    }

    /// Whether vector memory operations skip the L1.
    pub fn vector_bypass_l1(&self) -> bool {
        self.vector_bypass_l1
    }

    /// Fetch `bytes` of instructions at `pc`.
    pub fn fetch(&mut self, hart: usize, pc: u64, bytes: usize) -> DataAccess {
        let cache = &mut self.harts[hart].icache;
        let already_in_flight = cache.miss_registry().contains(cache.geometry().line_address(pc));
        let outcome = cache.access(pc, bytes, false);
        let mut result = DataAccess {
            hit: outcome.hit,
            requests: Requests::new(),
        };
        if outcome.hit {
            return result;
        }

        let line_bytes = cache.geometry().line_bytes();
        let line = cache.geometry().line_address(pc);
        result.requests.push(
            CacheRequest::new(line, line_bytes, AccessKind::Fetch, MemoryLevel::L1Instruction, hart).with_pc(pc),
        );
        if !already_in_flight {
            self.fill_from_l2(hart, pc, line, line_bytes, &mut result.requests);
        }
        result
    }

    /// Scalar load or store through the hart's L1 data cache.
    pub fn data_access(
        &mut self,
        hart: usize,
        pc: u64,
        addr: u64,
        bytes: usize,
        is_store: bool,
        destination: Option<Destination>,
    ) -> DataAccess {
        let result = self.l1_data_access(hart, pc, addr, bytes, is_store, destination);
        if !result.hit && is_store {
            self.harts[hart].scalar_stores_in_flight += 1;
        }
        result
    }

    /// Vector element access, honoring the bypass settings.
    pub fn vector_access(
        &mut self,
        hart: usize,
        pc: u64,
        addr: u64,
        bytes: usize,
        is_store: bool,
        destination: Option<Destination>,
    ) -> DataAccess {
        if !self.vector_bypass_l1 {
            return self.l1_data_access(hart, pc, addr, bytes, is_store, destination);
        }
        let kind = if is_store { AccessKind::Store } else { AccessKind::Load };

        let mut result = DataAccess::default();
        match self.l2.as_mut() {
            Some(l2) if !self.vector_bypass_l2 => {
                let outcome = l2.access(addr, bytes, is_store);
                result.hit = outcome.hit;
                if !outcome.hit {
                    let line = l2.geometry().line_address(addr);
                    let line_bytes = l2.geometry().line_bytes();
                    result.requests.push(
                        CacheRequest::new(line, line_bytes, kind, MemoryLevel::L2, hart)
                            .with_pc(pc)
                            .with_destination(destination),
                    );
                }
                if let Some(victim) = outcome.writeback {
                    result.requests.push(self.l2_writeback(victim, hart, pc));
                }
            }
            _ => {
                result.requests.push(
                    CacheRequest::new(addr, bytes, kind, MemoryLevel::Main, hart)
                        .with_pc(pc)
                        .with_destination(destination),
                );
            }
        }
        result
    }

    fn l1_data_access(
        &mut self,
        hart: usize,
        pc: u64,
        addr: u64,
        bytes: usize,
        is_store: bool,
        destination: Option<Destination>,
    ) -> DataAccess {
        let caches = &mut self.harts[hart];
        let cache = &mut caches.dcache;
        let line = cache.geometry().line_address(addr);
        let line_bytes = cache.geometry().line_bytes();
        let already_in_flight = cache.miss_registry().contains(line);
        let outcome = cache.access(addr, bytes, is_store);

        let mut result = DataAccess {
            hit: outcome.hit,
            requests: Requests::new(),
        };
        if outcome.hit {
            caches.l1_data_hits += 1;
        } else {
            let kind = if is_store { AccessKind::Store } else { AccessKind::Load };
            result.requests.push(
                CacheRequest::new(line, line_bytes, kind, MemoryLevel::L1Data, hart)
                    .with_pc(pc)
                    .with_destination(destination),
            );
        }
        if let Some(victim) = outcome.writeback {
            let wb = CacheRequest::new(victim, line_bytes, AccessKind::Writeback, MemoryLevel::L1Data, hart)
                .with_pc(pc)
                .with_destination(destination);
            result.requests.push(wb);
            if let Some(spill) = self.spill_to_l2(victim, hart, pc) {
                result.requests.push(spill);
            }
        }
        if !outcome.hit && !already_in_flight {
            self.fill_from_l2(hart, pc, line, line_bytes, &mut result.requests);
        }
        if is_store && self.l1_write_policy == WritePolicy::WriteThrough {
            self.write_through(hart, pc, addr, bytes, &mut result.requests);
        }
        result
    }

    /// Look up a missing L1 line in the L2.
    fn fill_from_l2(&mut self, hart: usize, pc: u64, line: u64, line_bytes: usize, requests: &mut Requests) {
        let Some(l2) = self.l2.as_mut() else {
            return;
        };
        let l2_line = l2.geometry().line_address(line);
        let already_in_flight = l2.miss_registry().contains(l2_line);
        let outcome = l2.access(line, line_bytes, false);
        if !outcome.hit && !already_in_flight {
            let l2_bytes = l2.geometry().line_bytes();
            requests.push(CacheRequest::new(l2_line, l2_bytes, AccessKind::Load, MemoryLevel::L2, hart).with_pc(pc));
        }
        if let Some(victim) = outcome.writeback {
            requests.push(self.l2_writeback(victim, hart, pc));
        }
    }

    /// Forward a write-through store to the L2.
    fn write_through(&mut self, hart: usize, pc: u64, addr: u64, bytes: usize, requests: &mut Requests) {
        let Some(l2) = self.l2.as_mut() else {
            return;
        };
        let l2_line = l2.geometry().line_address(addr);
        let already_in_flight = l2.miss_registry().contains(l2_line);
        let outcome = l2.access(addr, bytes, true);
        if !outcome.hit && !already_in_flight {
            let l2_bytes = l2.geometry().line_bytes();
            requests.push(CacheRequest::new(l2_line, l2_bytes, AccessKind::Store, MemoryLevel::L2, hart).with_pc(pc));
        }
        if let Some(victim) = outcome.writeback {
            requests.push(self.l2_writeback(victim, hart, pc));
        }
    }

    /// Hand an L1 write-back to the L2. Returns the L2's own write-back, if any.
    fn spill_to_l2(&mut self, line: u64, hart: usize, pc: u64) -> Option<CacheRequest> {
        let victim = self.l2.as_mut()?.absorb_writeback(line)?;
        Some(self.l2_writeback(victim, hart, pc))
    }

    fn l2_writeback(&self, line: u64, hart: usize, pc: u64) -> CacheRequest {
        let bytes = self.l2.as_ref().map(|l2| l2.geometry().line_bytes()).unwrap_or(0);
        CacheRequest::new(line, bytes, AccessKind::Writeback, MemoryLevel::L2, hart).with_pc(pc)
    }

    /// Complete a miss reported earlier.
    ///
    /// Returns the write-back of a dirty line displaced by the fill. Traffic
    /// this causes further down (an L2 write-back of its own) is queued and
    /// collected with [`take_outbound`](Self::take_outbound).
    pub fn service_request(&mut self, request: &CacheRequest) -> Option<CacheRequest> {
        let hart = request.hart_id;
        let writeback = match request.level {
            MemoryLevel::L1Instruction => self.harts.get_mut(hart)?.icache.service_request(request),
            MemoryLevel::L1Data => self.harts.get_mut(hart)?.dcache.service_request(request),
            MemoryLevel::L2 => return self.l2.as_mut()?.service_request(request),
            MemoryLevel::Main => return None,
        };
        if let Some(wb) = &writeback {
            if let Some(spill) = self.spill_to_l2(wb.address, hart, wb.pc) {
                self.outbound.push(spill);
            }
        }
        writeback
    }

    /// Install `addr`'s line in the hart's L1 data cache, returning the line
    /// it displaced.
    pub fn victimize(&mut self, hart: usize, addr: u64) -> VictimDescriptor {
        self.harts[hart].dcache.victimize(addr)
    }

    /// Drain traffic queued by [`service_request`](Self::service_request).
    pub fn take_outbound(&mut self) -> Vec<CacheRequest> {
        std::mem::take(&mut self.outbound)
    }

    /// Scalar stores of `hart` still in flight.
    pub fn scalar_stores_in_flight(&self, hart: usize) -> usize {
        self.harts[hart].scalar_stores_in_flight
    }

    /// The timing model retired one scalar store of `hart`.
    pub fn decrement_scalar_stores(&mut self, hart: usize) {
        let count = &mut self.harts[hart].scalar_stores_in_flight;
        if *count == 0 {
            log::warn!("hart {}: scalar store completion with none in flight", hart);
            return;
        }
        *count -= 1;
    }

    /// Whether a vector load of `hart` has to wait for scalar stores.
    pub fn must_defer_vector_load(&self, hart: usize) -> bool {
        self.vector_bypass_l1 && self.harts[hart].scalar_stores_in_flight > 0
    }

    /// Lines the hart's L1 data cache is still fetching.
    pub fn in_flight_l1_misses(&self, hart: usize) -> usize {
        self.harts[hart].dcache.miss_registry().count_in_flight()
    }

    /// L1 data hits summed over all harts.
    pub fn l1_data_hits(&self) -> u64 {
        self.harts.iter().map(|h| h.l1_data_hits).sum()
    }

    /// Counters of every L1 data cache combined.
    pub fn l1_data_stats(&self) -> CacheStats {
        let mut total = CacheStats::default();
        for hart in &self.harts {
            total.merge(&hart.dcache.stats());
        }
        total
    }

    /// Log every cache's report.
    pub fn log_stats(&self) {
        for (id, hart) in self.harts.iter().enumerate() {
            log::info!("hart {} {}\n{}", id, hart.icache.name(), hart.icache.stats());
            log::info!("hart {} {}\n{}", id, hart.dcache.name(), hart.dcache.stats());
        }
        if let Some(l2) = &self.l2 {
            log::info!("{}\n{}", l2.name(), l2.stats());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::RegisterKind;

    fn config(l2: bool, fill_mode: FillMode) -> HierarchyConfig {
        HierarchyConfig {
            icache: CacheGeometry::parse("4:2:16").unwrap(),
            dcache: CacheGeometry::parse("4:2:16").unwrap(),
            l2: l2.then(|| CacheGeometry::parse("16:4:16").unwrap()),
            l1_write_policy: WritePolicy::WriteBack,
            fill_mode,
            vector_bypass_l1: false,
            vector_bypass_l2: false,
        }
    }

    fn dest(reg: usize) -> Option<Destination> {
        Some(Destination {
            kind: RegisterKind::Integer,
            reg,
        })
    }

    #[test]
    fn test_l1_miss_without_l2() {
        let mut mem = MemoryHierarchy::new(1, &config(false, FillMode::Deferred));
        let access = mem.data_access(0, 0x100, 0x2004, 4, false, dest(5));
        assert!(!access.hit);
        assert_eq!(access.requests.len(), 1);
        let req = access.requests[0];
        assert_eq!(req.address, 0x2000);
        assert_eq!(req.size, 16);
        assert_eq!(req.level, MemoryLevel::L1Data);
        assert_eq!(req.destination, dest(5));
        assert_eq!(mem.in_flight_l1_misses(0), 1);

        assert_eq!(mem.service_request(&req), None);
        assert_eq!(mem.in_flight_l1_misses(0), 0);
        assert!(mem.data_access(0, 0x104, 0x2008, 4, false, dest(6)).hit);
        assert_eq!(mem.l1_data_hits(), 1);
    }

    #[test]
    fn test_l1_and_l2_miss_chain() {
        let mut mem = MemoryHierarchy::new(2, &config(true, FillMode::Deferred));
        let access = mem.data_access(1, 0, 0x40, 8, false, dest(3));
        assert_eq!(access.requests.len(), 2);
        assert_eq!(access.requests[0].level, MemoryLevel::L1Data);
        assert_eq!(access.requests[1].level, MemoryLevel::L2);
        assert_eq!(access.requests[1].destination, None);

        // Coalesced L1 miss does not go to the L2 again
        let again = mem.data_access(1, 0, 0x48, 8, false, dest(4));
        assert_eq!(again.requests.len(), 1);
        assert_eq!(mem.l2().unwrap().stats().read_accesses, 1);

        // Other hart's L1 is separate
        assert_eq!(mem.in_flight_l1_misses(0), 0);
        assert_eq!(mem.in_flight_l1_misses(1), 1);
    }

    #[test]
    fn test_shared_l2_fill_issued_once() {
        let mut mem = MemoryHierarchy::new(2, &config(true, FillMode::Deferred));
        let first = mem.data_access(0, 0, 0x40, 8, false, dest(3));
        let second = mem.data_access(1, 0, 0x40, 8, false, dest(4));

        let l2_fills: Vec<_> = first
            .requests
            .iter()
            .chain(second.requests.iter())
            .filter(|r| r.level == MemoryLevel::L2)
            .copied()
            .collect();
        assert_eq!(l2_fills.len(), 1);
        assert_eq!(second.requests.len(), 1);
        assert_eq!(second.requests[0].destination, dest(4));

        let l2 = mem.l2().unwrap();
        assert_eq!(l2.stats().read_accesses, 2);
        assert_eq!(l2.miss_registry().count_in_flight(), 1);

        mem.service_request(&l2_fills[0]);
        assert_eq!(mem.l2().unwrap().miss_registry().count_in_flight(), 0);
    }

    #[test]
    fn test_write_through_store_joins_l2_fill() {
        let mut cfg = config(true, FillMode::Deferred);
        cfg.l1_write_policy = WritePolicy::WriteThrough;
        let mut mem = MemoryHierarchy::new(2, &cfg);
        let first = mem.data_access(0, 0, 0x20, 4, true, None);
        let second = mem.data_access(1, 0, 0x24, 4, true, None);
        let l2_requests = first
            .requests
            .iter()
            .chain(second.requests.iter())
            .filter(|r| r.level == MemoryLevel::L2)
            .count();
        assert_eq!(l2_requests, 1);
        assert_eq!(mem.l2().unwrap().stats().write_accesses, 2);
    }

    #[test]
    fn test_l2_hit_after_fill() {
        let mut mem = MemoryHierarchy::new(2, &config(true, FillMode::Deferred));
        let access = mem.data_access(0, 0, 0x40, 8, false, None);
        for req in &access.requests {
            mem.service_request(req);
        }
        // Hart 1 misses its own L1 but hits the shared L2
        let access = mem.data_access(1, 0, 0x40, 8, false, None);
        assert!(!access.hit);
        assert_eq!(access.requests.len(), 1);
        assert_eq!(access.requests[0].level, MemoryLevel::L1Data);
    }

    #[test]
    fn test_writeback_spills_into_l2() {
        let mut mem = MemoryHierarchy::new(1, &config(true, FillMode::Immediate));
        mem.data_access(0, 0, 0x00, 4, true, None);
        mem.data_access(0, 0, 0x40, 4, false, None);
        let access = mem.data_access(0, 0, 0x80, 4, false, dest(9));
        let wb = access
            .requests
            .iter()
            .find(|r| r.kind == AccessKind::Writeback)
            .copied()
            .unwrap();
        assert_eq!(wb.address, 0x00);
        assert_eq!(wb.level, MemoryLevel::L1Data);
        assert_eq!(wb.destination, dest(9));
        assert!(mem.l2().unwrap().line(0x00).unwrap().dirty);
    }

    #[test]
    fn test_scalar_store_gate() {
        let mut cfg = config(false, FillMode::Deferred);
        cfg.vector_bypass_l1 = true;
        let mut mem = MemoryHierarchy::new(1, &cfg);

        assert!(!mem.must_defer_vector_load(0));
        mem.data_access(0, 0, 0x100, 8, true, None);
        assert_eq!(mem.scalar_stores_in_flight(0), 1);
        assert!(mem.must_defer_vector_load(0));

        mem.decrement_scalar_stores(0);
        assert!(!mem.must_defer_vector_load(0));
        // Extra completions are ignored
        mem.decrement_scalar_stores(0);
        assert_eq!(mem.scalar_stores_in_flight(0), 0);
    }

    #[test]
    fn test_gate_needs_bypass() {
        let mut mem = MemoryHierarchy::new(1, &config(false, FillMode::Deferred));
        mem.data_access(0, 0, 0x100, 8, true, None);
        assert!(!mem.must_defer_vector_load(0));
    }

    #[test]
    fn test_vector_bypass_levels() {
        let mut cfg = config(true, FillMode::Deferred);
        cfg.vector_bypass_l1 = true;
        let mut mem = MemoryHierarchy::new(1, &cfg);
        let access = mem.vector_access(0, 0, 0x1000, 4, false, None);
        assert_eq!(access.requests[0].level, MemoryLevel::L2);
        assert_eq!(mem.dcache(0).stats().read_accesses, 0);

        cfg.vector_bypass_l2 = true;
        let mut mem = MemoryHierarchy::new(1, &cfg);
        let access = mem.vector_access(0, 0, 0x1004, 4, false, None);
        assert_eq!(access.requests.len(), 1);
        assert_eq!(access.requests[0].level, MemoryLevel::Main);
        assert_eq!(access.requests[0].address, 0x1004);
        assert_eq!(mem.service_request(&access.requests[0]), None);
    }

    #[test]
    fn test_vector_without_bypass_uses_l1() {
        let mut mem = MemoryHierarchy::new(1, &config(false, FillMode::Deferred));
        let access = mem.vector_access(0, 0, 0x1000, 4, true, None);
        assert_eq!(access.requests[0].level, MemoryLevel::L1Data);
        // Vector stores are not scalar stores
        assert_eq!(mem.scalar_stores_in_flight(0), 0);
    }

    #[test]
    fn test_fetch_miss() {
        let mut mem = MemoryHierarchy::new(1, &config(false, FillMode::Immediate));
        let access = mem.fetch(0, 0x8000_0004, 4);
        assert!(!access.hit);
        assert_eq!(access.requests[0].kind, AccessKind::Fetch);
        assert_eq!(access.requests[0].address, 0x8000_0000);
        assert!(mem.fetch(0, 0x8000_0008, 4).hit);
    }

    #[test]
    fn test_write_through_forwards_stores() {
        let mut cfg = config(true, FillMode::Immediate);
        cfg.l1_write_policy = WritePolicy::WriteThrough;
        let mut mem = MemoryHierarchy::new(1, &cfg);
        mem.data_access(0, 0, 0x20, 4, false, None);
        mem.data_access(0, 0, 0x20, 4, true, None);
        assert_eq!(mem.l2().unwrap().stats().write_accesses, 1);
        assert!(!mem.dcache(0).line(0x20).unwrap().dirty);
    }

    #[test]
    fn test_service_spill_is_queued() {
        let mut mem = MemoryHierarchy::new(1, &config(true, FillMode::Deferred));
        // Dirty 0x00 in the L1, then force it out through service_request
        for addr in [0x00u64, 0x40, 0x80] {
            let access = mem.data_access(0, 0, addr, 4, addr == 0x00, None);
            let l1_req = access.requests[0];
            mem.service_request(&l1_req);
        }
        let stats = mem.dcache(0).stats();
        assert_eq!(stats.writebacks, 1);
        // L2 had room, so nothing spills further
        assert!(mem.take_outbound().is_empty());
        assert!(mem.l2().unwrap().line(0x00).unwrap().dirty);
    }
}
