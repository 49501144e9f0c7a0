//! Events handed to the timing model after each simulated instruction.

use std::fmt;

use crate::cache::CacheRequest;
use crate::timing::DependencyEvent;

/// Something the timing model has to schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Cache miss, write-back or bypassing vector access.
    Memory(CacheRequest),
    /// A stall whose resolution time is not known yet.
    Dependency(DependencyEvent),
    /// The hart executed a fence.
    Fence {
        /// Hart that fenced.
        hart_id: usize,
        /// Cycle of the fence.
        cycle: u64,
    },
}

impl Event {
    /// Hart the event belongs to.
    pub fn hart_id(&self) -> usize {
        match self {
            Event::Memory(req) => req.hart_id,
            Event::Dependency(dep) => dep.hart_id,
            Event::Fence { hart_id, .. } => *hart_id,
        }
    }

    /// The memory request, if this is one.
    pub fn as_memory(&self) -> Option<&CacheRequest> {
        match self {
            Event::Memory(req) => Some(req),
            _ => None,
        }
    }
}

impl From<CacheRequest> for Event {
    fn from(req: CacheRequest) -> Self {
        Event::Memory(req)
    }
}

impl From<DependencyEvent> for Event {
    fn from(dep: DependencyEvent) -> Self {
        Event::Dependency(dep)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Memory(req) => write!(f, "memory: {}", req),
            Event::Dependency(dep) => write!(
                f,
                "dependency: hart {} pc 0x{:x} waits on {}{}",
                dep.hart_id,
                dep.pc,
                dep.kind.prefix(),
                dep.register
            ),
            Event::Fence { hart_id, cycle } => write!(f, "fence: hart {} at cycle {}", hart_id, cycle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{AccessKind, MemoryLevel};
    use crate::timing::{Availability, RegisterKind};

    #[test]
    fn test_event_hart_and_display() {
        let req = CacheRequest::new(0x40, 16, AccessKind::Load, MemoryLevel::L1Data, 3);
        let ev = Event::from(req);
        assert_eq!(ev.hart_id(), 3);
        assert_eq!(ev.as_memory(), Some(&req));

        let dep = Event::from(DependencyEvent {
            pc: 0x10,
            hart_id: 1,
            register: 7,
            kind: RegisterKind::Vector,
            target_cycle: Availability::Unknown,
            instruction_latency: 2,
            original_available_at: Availability::Unknown,
        });
        assert_eq!(dep.hart_id(), 1);
        assert!(dep.as_memory().is_none());
        assert_eq!(dep.to_string(), "dependency: hart 1 pc 0x10 waits on v7");

        let fence = Event::Fence { hart_id: 0, cycle: 9 };
        assert_eq!(fence.to_string(), "fence: hart 0 at cycle 9");
    }
}
