//! Per-register availability tracking.
//!
//! Each register file (integer, floating-point, vector) keeps, per physical
//! register, the cycle at which its last write becomes visible and the number
//! of asynchronous events (memory misses, multi-beat fills) still outstanding
//! for that write.
//!
//! ```text
//! record_write(r5, 3, Unknown)   pending=3  available=Unknown
//! acknowledge(r5, 100) -> false  pending=2
//! acknowledge(r5, 105) -> false  pending=1
//! acknowledge(r5, 110) -> true   pending=0  available=At(110)
//! ```
//!
//! Completions can arrive in any order, so a countdown is kept rather than a
//! flag. A newer write re-arms the register and later acknowledgments count
//! against the newer write.

use std::fmt;

/// Number of integer registers.
pub const NUM_INT_REGS: usize = 32;

/// Number of floating-point registers.
pub const NUM_FLOAT_REGS: usize = 32;

/// Register file a register belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterKind {
    Integer,
    Float,
    Vector,
}

impl RegisterKind {
    /// Assembly prefix (`x`, `f`, `v`).
    pub fn prefix(self) -> char {
        match self {
            RegisterKind::Integer => 'x',
            RegisterKind::Float => 'f',
            RegisterKind::Vector => 'v',
        }
    }
}

/// When a register's value becomes usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Availability {
    /// Resolution is asynchronous and not known yet.
    Unknown,
    /// Usable from this cycle on.
    At(u64),
}

impl Availability {
    /// True if a reader at `cycle` would have to wait.
    #[inline]
    pub fn is_after(self, cycle: u64) -> bool {
        match self {
            Availability::Unknown => true,
            Availability::At(ready) => ready > cycle,
        }
    }

    /// The concrete cycle, if known.
    #[inline]
    pub fn cycle(self) -> Option<u64> {
        match self {
            Availability::Unknown => None,
            Availability::At(ready) => Some(ready),
        }
    }

    /// Whether the resolution time is still unknown.
    #[inline]
    pub fn is_unknown(self) -> bool {
        matches!(self, Availability::Unknown)
    }
}

impl Default for Availability {
    fn default() -> Self {
        Availability::At(0)
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Availability::Unknown => write!(f, "unknown"),
            Availability::At(cycle) => write!(f, "@{}", cycle),
        }
    }
}

/// Availability timestamps and pending-event counters for one register file.
#[derive(Clone)]
pub struct RegisterAvailability {
    kind: RegisterKind,
    available_at: Vec<Availability>,
    pending: Vec<u8>,
    /// Register 0 ignores writes and is always ready.
    hardwired_zero: bool,
}

impl RegisterAvailability {
    /// Create a file of `count` registers, all available at cycle 0.
    pub fn new(kind: RegisterKind, count: usize, hardwired_zero: bool) -> Self {
        Self {
            kind,
            available_at: vec![Availability::default(); count],
            pending: vec![0; count],
            hardwired_zero,
        }
    }

    /// Integer file (x0 hard-wired).
    pub fn integer() -> Self {
        Self::new(RegisterKind::Integer, NUM_INT_REGS, true)
    }

    /// Floating-point file.
    pub fn float() -> Self {
        Self::new(RegisterKind::Float, NUM_FLOAT_REGS, false)
    }

    /// Vector file.
    pub fn vector() -> Self {
        Self::new(RegisterKind::Vector, crate::vector::NUM_VECTOR_REGS, false)
    }

    /// Which register file this is.
    pub fn kind(&self) -> RegisterKind {
        self.kind
    }

    /// Number of registers tracked.
    pub fn len(&self) -> usize {
        self.available_at.len()
    }

    /// Whether the file tracks no registers.
    pub fn is_empty(&self) -> bool {
        self.available_at.is_empty()
    }

    /// Availability of `reg`. Registers outside the file read as ready.
    #[inline]
    pub fn available_at(&self, reg: usize) -> Availability {
        self.available_at.get(reg).copied().unwrap_or_default()
    }

    /// Outstanding events for `reg`.
    #[inline]
    pub fn pending_count(&self, reg: usize) -> u8 {
        self.pending.get(reg).copied().unwrap_or(0)
    }

    /// True if `reg` can be read at `cycle` without stalling.
    #[inline]
    pub fn is_ready(&self, reg: usize, cycle: u64) -> bool {
        !self.available_at(reg).is_after(cycle)
    }

    /// Record the timing of a write to `reg`.
    ///
    /// `pending_events` is the number of asynchronous completions the value
    /// depends on. When it is zero the availability must be concrete.
    pub fn record_write(&mut self, reg: usize, pending_events: u8, availability: Availability) {
        if self.hardwired_zero && reg == 0 {
            return;
        }
        if reg >= self.len() {
            log::warn!("write to {}{} outside the register file ignored", self.kind.prefix(), reg);
            return;
        }
        if pending_events == 0 && availability.is_unknown() {
            log::warn!(
                "{}{} written with unknown availability and no pending events; it will never resolve",
                self.kind.prefix(),
                reg
            );
        }
        self.pending[reg] = pending_events;
        self.available_at[reg] = availability;
    }

    /// One outstanding event for `reg` completed at `cycle`.
    ///
    /// Returns true when this was the last one and the register is now
    /// available at `cycle`.
    pub fn acknowledge(&mut self, reg: usize, cycle: u64) -> bool {
        match self.pending_count(reg) {
            0 => {
                log::warn!(
                    "acknowledge for {}{} at cycle {} with no pending events",
                    self.kind.prefix(),
                    reg,
                    cycle
                );
                false
            }
            1 => {
                self.pending[reg] = 0;
                self.available_at[reg] = Availability::At(cycle);
                true
            }
            n => {
                self.pending[reg] = n - 1;
                false
            }
        }
    }

    /// Make every register available at cycle 0 again.
    pub fn reset(&mut self) {
        self.available_at.fill(Availability::default());
        self.pending.fill(0);
    }
}

impl fmt::Debug for RegisterAvailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only registers that are not trivially ready
        let busy: Vec<_> = (0..self.len())
            .filter(|&r| self.pending[r] != 0 || self.available_at[r] != Availability::default())
            .collect();

        if busy.is_empty() {
            return write!(f, "RegisterAvailability({:?}) {{ all ready }}", self.kind);
        }
        write!(f, "RegisterAvailability({:?}) {{ ", self.kind)?;
        for (i, reg) in busy.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(
                f,
                "{}{}: {} pending={}",
                self.kind.prefix(),
                reg,
                self.available_at[*reg],
                self.pending[*reg]
            )?;
        }
        write!(f, " }}")
    }
}
