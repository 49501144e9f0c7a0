//! Operations driven through the timing core.
//!
//! The functional interpreter decodes and executes an instruction, then
//! describes what it touched as an [`Operation`]: registers read and written,
//! effective addresses, vector element layout. Values never cross this
//! boundary, only timing-relevant facts.
//!
//! | Variant | Reads | Writes | Memory |
//! |---------|-------|--------|--------|
//! | `Int` | sources | `rd` | - |
//! | `Fp` | sources | `dest` | - |
//! | `Load` | `base` | `dest` | one access |
//! | `Store` | `base`, `src` | - | one access |
//! | `VectorArith` | `vs2`, `vs1`, `v0` if masked | `vd` group | - |
//! | `VectorLoad` | `rs1`, stride/index, `v0` if masked | `nf` groups from `vd` | one per active element and field |
//! | `VectorStore` | `rs1`, stride/index, `v0` if masked, `nf` groups from `vs3` | - | one per active element and field |
//! | `VSetVl` | `rs1` | `rd` | - |
//! | `Fence` | - | - | - |

use smallvec::{smallvec, SmallVec};

use crate::cache::Destination;
use crate::timing::{OpClass, RegisterKind};

/// An architectural register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg {
    pub kind: RegisterKind,
    pub index: usize,
}

impl Reg {
    /// Integer register `x{index}`.
    pub const fn x(index: usize) -> Self {
        Self {
            kind: RegisterKind::Integer,
            index,
        }
    }

    /// Floating-point register `f{index}`.
    pub const fn f(index: usize) -> Self {
        Self {
            kind: RegisterKind::Float,
            index,
        }
    }

    /// Vector register `v{index}`.
    pub const fn v(index: usize) -> Self {
        Self {
            kind: RegisterKind::Vector,
            index,
        }
    }

    /// Whether this is `x0`, which never carries a dependency.
    pub fn is_zero(&self) -> bool {
        self.kind == RegisterKind::Integer && self.index == 0
    }
}

impl From<Reg> for Destination {
    fn from(reg: Reg) -> Self {
        Destination {
            kind: reg.kind,
            reg: reg.index,
        }
    }
}

/// Source operand list.
pub type Sources = SmallVec<[Reg; 3]>;

/// How a vector memory operation generates element addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VectorAddressing {
    /// Consecutive elements, fields interleaved.
    UnitStride,
    /// Element `i` at `base + i * stride`; the stride comes from `rs2`.
    Strided { rs2: usize, stride: i64 },
    /// Element `i` at `base + offsets[i]`; the offsets come from `vs2`.
    Indexed { vs2: usize, offsets: Vec<u64> },
}

/// A vector load or store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorMemOp {
    /// `vd` for loads, `vs3` for stores.
    pub reg: usize,
    /// Base address register.
    pub rs1: usize,
    /// Value of `rs1`.
    pub base_addr: u64,
    pub addressing: VectorAddressing,
    /// Bytes per memory element.
    pub element_bytes: usize,
    /// Fields per segment (1 for non-segment accesses).
    pub nf: usize,
    /// Contents of `v0` when masked.
    pub mask: Option<Vec<u64>>,
}

impl VectorMemOp {
    /// Unit-stride, unmasked, single field.
    pub fn unit_stride(reg: usize, rs1: usize, base_addr: u64, element_bytes: usize) -> Self {
        Self {
            reg,
            rs1,
            base_addr,
            addressing: VectorAddressing::UnitStride,
            element_bytes,
            nf: 1,
            mask: None,
        }
    }

    /// Address of field `field` of element `index`.
    pub fn element_address(&self, index: usize, field: usize) -> u64 {
        let eb = self.element_bytes as u64;
        let (offset, field_offset) = match &self.addressing {
            VectorAddressing::UnitStride => (0, (index * self.nf + field) as u64 * eb),
            VectorAddressing::Strided { stride, .. } => ((index as i64).wrapping_mul(*stride) as u64, field as u64 * eb),
            VectorAddressing::Indexed { offsets, .. } => {
                (offsets.get(index).copied().unwrap_or(0), field as u64 * eb)
            }
        };
        self.base_addr.wrapping_add(offset).wrapping_add(field_offset)
    }
}

/// One instruction as seen by the timing core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Integer ALU, multiply or divide.
    Int {
        class: OpClass,
        rd: usize,
        sources: Sources,
        mnemonic: Option<&'static str>,
    },
    /// Scalar floating point. Sources may include integer registers.
    Fp {
        class: OpClass,
        dest: Reg,
        sources: Sources,
        mnemonic: Option<&'static str>,
    },
    /// Scalar load into an integer or float register.
    Load { dest: Reg, base: usize, addr: u64, bytes: usize },
    /// Scalar store from an integer or float register.
    Store { src: Reg, base: usize, addr: u64, bytes: usize },
    /// Vector arithmetic. `vs1` may be a vector, integer or float operand.
    VectorArith {
        class: OpClass,
        vd: usize,
        vs2: usize,
        vs1: Option<Reg>,
        masked: bool,
        mnemonic: Option<&'static str>,
    },
    VectorLoad(VectorMemOp),
    VectorStore(VectorMemOp),
    /// `vsetvl`/`vsetvli`. `avl` is the value of `rs1`.
    VSetVl {
        rd: usize,
        rs1: usize,
        avl: usize,
        sew_bits: usize,
        lmul: usize,
    },
    Fence,
}

impl Operation {
    /// Integer operation `rd = f(rs1, rs2)`.
    pub fn int(class: OpClass, rd: usize, rs1: usize, rs2: usize) -> Self {
        Operation::Int {
            class,
            rd,
            sources: smallvec![Reg::x(rs1), Reg::x(rs2)],
            mnemonic: None,
        }
    }

    /// Attach the decoded mnemonic, used to look up per-instruction
    /// latencies. Ignored by memory, `vset*` and fence operations.
    pub fn with_mnemonic(mut self, name: &'static str) -> Self {
        match &mut self {
            Operation::Int { mnemonic, .. }
            | Operation::Fp { mnemonic, .. }
            | Operation::VectorArith { mnemonic, .. } => *mnemonic = Some(name),
            _ => {}
        }
        self
    }

    /// Decoded mnemonic, if the interpreter supplied one.
    pub fn mnemonic(&self) -> Option<&'static str> {
        match self {
            Operation::Int { mnemonic, .. }
            | Operation::Fp { mnemonic, .. }
            | Operation::VectorArith { mnemonic, .. } => *mnemonic,
            _ => None,
        }
    }

    /// Short mnemonic-like name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Int { .. } => "int",
            Operation::Fp { .. } => "fp",
            Operation::Load { .. } => "load",
            Operation::Store { .. } => "store",
            Operation::VectorArith { .. } => "varith",
            Operation::VectorLoad(_) => "vload",
            Operation::VectorStore(_) => "vstore",
            Operation::VSetVl { .. } => "vsetvl",
            Operation::Fence => "fence",
        }
    }

    /// Whether this operation uses the vector unit.
    pub fn is_vector(&self) -> bool {
        matches!(
            self,
            Operation::VectorArith { .. } | Operation::VectorLoad(_) | Operation::VectorStore(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reg_constructors() {
        assert!(Reg::x(0).is_zero());
        assert!(!Reg::f(0).is_zero());
        assert!(!Reg::v(0).is_zero());
        let dest: Destination = Reg::f(3).into();
        assert_eq!(dest.kind, RegisterKind::Float);
        assert_eq!(dest.reg, 3);
    }

    #[test]
    fn test_unit_stride_segment_addresses() {
        let mut op = VectorMemOp::unit_stride(8, 10, 0x1000, 4);
        assert_eq!(op.element_address(0, 0), 0x1000);
        assert_eq!(op.element_address(3, 0), 0x100c);

        // Two fields: e0f0 e0f1 e1f0 e1f1 ...
        op.nf = 2;
        assert_eq!(op.element_address(1, 0), 0x1008);
        assert_eq!(op.element_address(1, 1), 0x100c);
    }

    #[test]
    fn test_strided_addresses() {
        let op = VectorMemOp {
            addressing: VectorAddressing::Strided { rs2: 11, stride: -16 },
            ..VectorMemOp::unit_stride(8, 10, 0x1000, 8)
        };
        assert_eq!(op.element_address(2, 0), 0x1000 - 32);
        assert_eq!(op.element_address(2, 1), 0x1000 - 24);
    }

    #[test]
    fn test_indexed_addresses() {
        let op = VectorMemOp {
            addressing: VectorAddressing::Indexed {
                vs2: 4,
                offsets: vec![0x40, 0x0, 0x100],
            },
            ..VectorMemOp::unit_stride(8, 10, 0x2000, 2)
        };
        assert_eq!(op.element_address(0, 0), 0x2040);
        assert_eq!(op.element_address(2, 0), 0x2100);
    }

    #[test]
    fn test_operation_helpers() {
        let op = Operation::int(OpClass::IntAlu, 1, 2, 3);
        assert_eq!(op.name(), "int");
        assert_eq!(op.mnemonic(), None);
        assert_eq!(op.with_mnemonic("add").mnemonic(), Some("add"));
        assert_eq!(Operation::Fence.with_mnemonic("fence").mnemonic(), None);
        assert!(!Operation::int(OpClass::IntAlu, 1, 2, 3).is_vector());
        assert!(Operation::VectorLoad(VectorMemOp::unit_stride(0, 1, 0, 1)).is_vector());
    }
}
