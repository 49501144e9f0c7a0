//! Memory requests exchanged with the timing model.
//!
//! A [`CacheRequest`] is produced for every miss (and every write-back) and
//! handed to the owning timing model. When the timing model decides the data
//! has arrived it passes the same request back through
//! `Simulator::service_request`, which installs the line.

use std::fmt;

use crate::timing::RegisterKind;

/// What a request does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    /// Data read.
    Load,
    /// Data write.
    Store,
    /// Instruction fetch.
    Fetch,
    /// Dirty line eviction.
    Writeback,
}

impl AccessKind {
    /// True for kinds that modify memory.
    pub fn is_write(self) -> bool {
        matches!(self, AccessKind::Store | AccessKind::Writeback)
    }
}

/// The structure a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLevel {
    /// Private L1 instruction cache.
    L1Instruction,
    /// Private L1 data cache.
    L1Data,
    /// Shared L2.
    L2,
    /// Main memory (both cache levels bypassed).
    Main,
}

/// Register waiting on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Destination {
    /// Register file.
    pub kind: RegisterKind,
    /// Register number.
    pub reg: usize,
}

/// One memory request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheRequest {
    /// Line-aligned (misses) or exact (bypass) address.
    pub address: u64,
    /// Bytes transferred.
    pub size: usize,
    /// Load, store, fetch or write-back.
    pub kind: AccessKind,
    /// Structure that missed or that evicted.
    pub level: MemoryLevel,
    /// Hart that issued the access.
    pub hart_id: usize,
    /// PC of the issuing instruction.
    pub pc: u64,
    /// Register whose availability depends on this request.
    pub destination: Option<Destination>,
}

impl CacheRequest {
    /// Build a request with no destination register.
    pub fn new(address: u64, size: usize, kind: AccessKind, level: MemoryLevel, hart_id: usize) -> Self {
        Self {
            address,
            size,
            kind,
            level,
            hart_id,
            pc: 0,
            destination: None,
        }
    }

    /// Attach the issuing PC.
    pub fn with_pc(mut self, pc: u64) -> Self {
        self.pc = pc;
        self
    }

    /// Attach the dependent register.
    pub fn with_destination(mut self, destination: Option<Destination>) -> Self {
        self.destination = destination;
        self
    }

    /// Whether this request was caused by a store.
    pub fn is_store(&self) -> bool {
        self.kind == AccessKind::Store
    }
}

impl fmt::Display for CacheRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {:?} 0x{:x} ({} bytes) hart {} pc 0x{:x}",
            self.level, self.kind, self.address, self.size, self.hart_id, self.pc
        )?;
        if let Some(dest) = self.destination {
            write!(f, " -> {}{}", dest.kind.prefix(), dest.reg)?;
        }
        Ok(())
    }
}
