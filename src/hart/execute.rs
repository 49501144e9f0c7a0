//! Operation executor.
//!
//! One handler per operation class, dispatched with a single `match`.

use smallvec::SmallVec;

use super::operation::{Operation, Reg, VectorAddressing, VectorMemOp};
use super::{HartState, StepOutcome};
use crate::cache::{DataAccess, MemoryHierarchy};
use crate::event::Event;
use crate::timing::{Availability, OpClass, RegisterKind};
use crate::vector::{element_active, locate_in_group, striped_index, AvlRequest, VectorTrap, NUM_VECTOR_REGS};

/// Largest `nf * LMUL` a segment access may span.
const MAX_SEGMENT_REGS: usize = NUM_VECTOR_REGS / 4;

/// Register group sizes of a vector arithmetic op: (vd, vs2, vs1).
fn arith_groups(class: OpClass, lmul: usize) -> (usize, usize, usize) {
    match class {
        OpClass::VecMask => (1, 1, 1),
        OpClass::VecReduction => (1, lmul, 1),
        _ => (lmul, lmul, lmul),
    }
}

impl HartState {
    /// Drive one operation through the check, access, record sequence.
    pub fn step(&mut self, pc: u64, op: &Operation, cycle: u64, mem: &mut MemoryHierarchy) -> StepOutcome {
        let latency = self.latency_of(op);
        self.tracker.begin_instruction(pc, latency);

        let outcome = self.execute(pc, op, cycle, latency, mem);

        self.tracker.end_instruction();
        self.events
            .extend(self.tracker.take_events().into_iter().map(Event::from));

        match outcome {
            StepOutcome::Retired => {
                if op.is_vector() {
                    self.vector.complete_instruction();
                }
                self.stats.retired += 1;
            }
            StepOutcome::Stalled => self.stats.stalls += 1,
            StepOutcome::Deferred => self.stats.deferrals += 1,
            StepOutcome::Trap(trap) => {
                log::debug!("hart {}: {} at pc 0x{:x} trapped: {}", self.id, op.name(), pc, trap);
                self.stats.traps += 1;
            }
        }
        outcome
    }

    fn execute(&mut self, pc: u64, op: &Operation, cycle: u64, latency: u64, mem: &mut MemoryHierarchy) -> StepOutcome {
        if let Err(trap) = self.check_legality(op) {
            return StepOutcome::Trap(trap);
        }
        if self.check_sources(op, cycle) {
            return StepOutcome::Stalled;
        }
        if matches!(op, Operation::VectorLoad(_)) && mem.must_defer_vector_load(self.id) {
            log::debug!(
                "hart {}: vector load at pc 0x{:x} waits for {} scalar stores",
                self.id,
                pc,
                mem.scalar_stores_in_flight(self.id)
            );
            return StepOutcome::Deferred;
        }

        match op {
            Operation::Int { rd, .. } => {
                self.tracker
                    .record_write(RegisterKind::Integer, *rd, 0, Availability::At(cycle + latency));
            }
            Operation::Fp { dest, .. } => {
                self.tracker
                    .record_write(dest.kind, dest.index, 0, Availability::At(cycle + latency));
            }
            Operation::Load { dest, addr, bytes, .. } => {
                let destination = (!dest.is_zero()).then(|| (*dest).into());
                let access = mem.data_access(self.id, pc, *addr, *bytes, false, destination);
                let misses = u8::from(!access.hit);
                self.push_requests(access);
                let availability = if misses > 0 {
                    Availability::Unknown
                } else {
                    Availability::At(cycle + latency)
                };
                self.tracker.record_write(dest.kind, dest.index, misses, availability);
            }
            Operation::Store { addr, bytes, .. } => {
                let access = mem.data_access(self.id, pc, *addr, *bytes, true, None);
                self.push_requests(access);
            }
            Operation::VectorArith { class, vd, .. } => {
                let (dest_group, _, _) = arith_groups(*class, self.vector.lmul());
                self.tracker
                    .record_vector_group_write(*vd, dest_group, 0, Availability::At(cycle + latency));
            }
            Operation::VectorLoad(vmem) => self.vector_load(pc, vmem, cycle, latency, mem),
            Operation::VectorStore(vmem) => self.vector_store(pc, vmem, mem),
            Operation::VSetVl {
                rd,
                rs1,
                avl,
                sew_bits,
                lmul,
            } => {
                let request = match (*rs1, *rd) {
                    (0, 0) => AvlRequest::KeepCurrent,
                    (0, _) => AvlRequest::Maximum,
                    _ => AvlRequest::Requested(*avl),
                };
                if let Err(trap) = self.vector.set_vl(request, *sew_bits, *lmul) {
                    return StepOutcome::Trap(trap);
                }
                self.tracker
                    .record_write(RegisterKind::Integer, *rd, 0, Availability::At(cycle + latency));
            }
            Operation::Fence => self.events.push(Event::Fence {
                hart_id: self.id,
                cycle,
            }),
        }
        StepOutcome::Retired
    }

    /// Latency the instruction would have on a hit / with its sources ready.
    fn latency_of(&self, op: &Operation) -> u64 {
        let vl = self.vector.vl();
        match op {
            Operation::Int { class, mnemonic, .. }
            | Operation::Fp { class, mnemonic, .. }
            | Operation::VectorArith { class, mnemonic, .. } => {
                self.latencies.instruction_latency(*class, *mnemonic, vl)
            }
            Operation::Load { .. } | Operation::Store { .. } => self.latencies.memory_hit(),
            Operation::VectorLoad(_) | Operation::VectorStore(_) => self.latencies.memory_hit(),
            Operation::VSetVl { .. } => self.latencies.latency(OpClass::IntAlu, 0),
            Operation::Fence => 0,
        }
    }

    fn check_legality(&self, op: &Operation) -> Result<(), VectorTrap> {
        let lmul = self.vector.lmul();
        match op {
            Operation::VectorArith { class, vd, vs2, vs1, .. } => {
                let (dest_group, vs2_group, vs1_group) = arith_groups(*class, lmul);
                self.vector.check_group(*vd, dest_group)?;
                self.vector.check_group(*vs2, vs2_group)?;
                if let Some(reg) = vs1.filter(|r| r.kind == RegisterKind::Vector) {
                    self.vector.check_group(reg.index, vs1_group)?;
                }
                Ok(())
            }
            Operation::VectorLoad(vmem) | Operation::VectorStore(vmem) => {
                let bits = vmem.element_bytes * 8;
                if vmem.element_bytes == 0 || bits > self.vector.sew().bits() {
                    return Err(VectorTrap::ElementTooWide { bits });
                }
                self.vector.check_operand(vmem.reg)?;
                let span = vmem.nf.max(1) * lmul;
                if span > MAX_SEGMENT_REGS || vmem.reg + span > NUM_VECTOR_REGS {
                    return Err(VectorTrap::GroupOutOfRange {
                        base: vmem.reg,
                        count: span,
                    });
                }
                if let VectorAddressing::Indexed { vs2, .. } = &vmem.addressing {
                    self.vector.check_operand(*vs2)?;
                }
                Ok(())
            }
            Operation::VSetVl { sew_bits, lmul, .. } => self.vector.validate_vtype(*sew_bits, *lmul).map(|_| ()),
            _ => Ok(()),
        }
    }

    /// Run every RAW check of `op`. Returns true if any source is busy.
    ///
    /// All sources are checked even after the first busy one so that each
    /// busy register ends up in the pending set.
    fn check_sources(&mut self, op: &Operation, cycle: u64) -> bool {
        let lmul = self.vector.lmul();
        let mut stalled = false;
        match op {
            Operation::Int { sources, .. } | Operation::Fp { sources, .. } => {
                for src in sources {
                    stalled |= self.check_reg(*src, cycle);
                }
            }
            Operation::Load { base, .. } => {
                stalled |= self.check_reg(Reg::x(*base), cycle);
            }
            Operation::Store { src, base, .. } => {
                stalled |= self.check_reg(Reg::x(*base), cycle);
                stalled |= self.check_reg(*src, cycle);
            }
            Operation::VectorArith {
                class, vs2, vs1, masked, ..
            } => {
                let (_, vs2_group, vs1_group) = arith_groups(*class, lmul);
                stalled |= self.tracker.check_vector_group(*vs2, vs2_group, cycle);
                match vs1 {
                    Some(reg) if reg.kind == RegisterKind::Vector => {
                        stalled |= self.tracker.check_vector_group(reg.index, vs1_group, cycle);
                    }
                    Some(reg) => stalled |= self.check_reg(*reg, cycle),
                    None => {}
                }
                if *masked {
                    stalled |= self.check_reg(Reg::v(0), cycle);
                }
            }
            Operation::VectorLoad(vmem) => {
                stalled |= self.check_vector_mem_sources(vmem, cycle);
            }
            Operation::VectorStore(vmem) => {
                stalled |= self.check_vector_mem_sources(vmem, cycle);
                stalled |= self
                    .tracker
                    .check_vector_group(vmem.reg, vmem.nf.max(1) * lmul, cycle);
            }
            Operation::VSetVl { rs1, .. } => {
                stalled |= self.check_reg(Reg::x(*rs1), cycle);
            }
            Operation::Fence => {}
        }
        stalled
    }

    fn check_vector_mem_sources(&mut self, vmem: &VectorMemOp, cycle: u64) -> bool {
        let mut stalled = self.check_reg(Reg::x(vmem.rs1), cycle);
        match &vmem.addressing {
            VectorAddressing::UnitStride => {}
            VectorAddressing::Strided { rs2, .. } => stalled |= self.check_reg(Reg::x(*rs2), cycle),
            VectorAddressing::Indexed { vs2, .. } => {
                stalled |= self.tracker.check_vector_group(*vs2, self.vector.lmul(), cycle);
            }
        }
        if vmem.mask.is_some() {
            stalled |= self.check_reg(Reg::v(0), cycle);
        }
        stalled
    }

    #[inline]
    fn check_reg(&mut self, reg: Reg, cycle: u64) -> bool {
        self.tracker.check_read(reg.kind, reg.index, cycle)
    }

    fn push_requests(&mut self, access: DataAccess) {
        self.events.extend(access.requests.into_iter().map(Event::Memory));
    }

    /// Active (element, field) pairs of a vector memory op with their
    /// destination physical register.
    fn vector_elements(&self, vmem: &VectorMemOp) -> Vec<(u64, usize)> {
        let geometry = *self.vector.geometry();
        let sew = self.vector.sew().bits();
        let lmul = self.vector.lmul();
        let per_register = self.vector.elements_per_register();
        let nf = vmem.nf.max(1);
        let mask = vmem.mask.as_deref().unwrap_or(&[]);

        let mut elements = Vec::new();
        for i in self.vector.active_elements() {
            if !element_active(mask, i, sew, lmul, vmem.mask.is_some()) {
                continue;
            }
            let slot = striped_index(i, geometry.vlen(), geometry.slen(), sew, lmul);
            for field in 0..nf {
                let loc = locate_in_group(vmem.reg + field * lmul, slot, per_register);
                elements.push((vmem.element_address(i, field), loc.register));
            }
        }
        elements
    }

    fn vector_load(&mut self, pc: u64, vmem: &VectorMemOp, cycle: u64, latency: u64, mem: &mut MemoryHierarchy) {
        let span = vmem.nf.max(1) * self.vector.lmul();
        let mut misses: SmallVec<[u32; 8]> = SmallVec::from_elem(0, span);

        for (addr, register) in self.vector_elements(vmem) {
            let access = mem.vector_access(self.id, pc, addr, vmem.element_bytes, false, Some(Reg::v(register).into()));
            if !access.hit {
                misses[register - vmem.reg] += 1;
            }
            self.push_requests(access);
        }

        for (offset, count) in misses.into_iter().enumerate() {
            let pending = u8::try_from(count).unwrap_or_else(|_| {
                log::warn!(
                    "hart {}: v{} waits on {} misses, more than the pending counter holds",
                    self.id,
                    vmem.reg + offset,
                    count
                );
                u8::MAX
            });
            let availability = if pending > 0 {
                Availability::Unknown
            } else {
                Availability::At(cycle + latency)
            };
            self.tracker
                .record_write(RegisterKind::Vector, vmem.reg + offset, pending, availability);
        }
    }

    fn vector_store(&mut self, pc: u64, vmem: &VectorMemOp, mem: &mut MemoryHierarchy) {
        for (addr, _) in self.vector_elements(vmem) {
            let access = mem.vector_access(self.id, pc, addr, vmem.element_bytes, true, None);
            self.push_requests(access);
        }
    }
}
