//! Vector unit configuration state.
//!
//! `VectorGeometry` holds the hardware constants fixed at startup (VLEN, ELEN,
//! SLEN). `VectorConfig` holds the architectural state mutated by the `vset*`
//! family: selected element width, register grouping, active length and the
//! resume index used for precise-trap restart.
//!
//! Invariant maintained by every mutator: `vstart <= vl <= vlmax()`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ConfigError, ConfigResult};

/// Number of architectural vector registers.
pub const NUM_VECTOR_REGS: usize = 32;

/// Largest supported register-group multiplier.
pub const MAX_LMUL: usize = 8;

/// Selected element width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sew {
    E8,
    E16,
    E32,
    E64,
}

impl Sew {
    /// Decode an element width given in bits.
    pub fn from_bits(bits: usize) -> Option<Self> {
        match bits {
            8 => Some(Sew::E8),
            16 => Some(Sew::E16),
            32 => Some(Sew::E32),
            64 => Some(Sew::E64),
            _ => None,
        }
    }

    /// Width in bits.
    #[inline]
    pub fn bits(self) -> usize {
        match self {
            Sew::E8 => 8,
            Sew::E16 => 16,
            Sew::E32 => 32,
            Sew::E64 => 64,
        }
    }

    /// Width in bytes.
    #[inline]
    pub fn bytes(self) -> usize {
        self.bits() / 8
    }
}

/// Architectural exception raised by a vector instruction.
///
/// The core never unwinds interpreter state itself: it declines the operation
/// and hands one of these back so the caller can raise the trap.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VectorTrap {
    /// `vset*` requested an unsupported SEW/LMUL combination.
    #[error("illegal vector configuration: SEW={sew_bits} LMUL={lmul}")]
    IllegalConfiguration {
        /// Requested element width in bits.
        sew_bits: usize,
        /// Requested group multiplier.
        lmul: usize,
    },

    /// Register number is not a multiple of the group size.
    #[error("v{reg} is not aligned to a {group}-register group")]
    MisalignedGroup {
        /// Offending register.
        reg: usize,
        /// Required group size.
        group: usize,
    },

    /// Register group runs past the end of the register file.
    #[error("register group v{base} spanning {count} registers exceeds the register file")]
    GroupOutOfRange {
        /// First register of the group.
        base: usize,
        /// Registers in the group.
        count: usize,
    },

    /// Memory element wider than the selected element width.
    #[error("memory element width {bits} exceeds SEW")]
    ElementTooWide {
        /// Requested element width in bits.
        bits: usize,
    },
}

/// Immutable hardware parameters of the vector unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorGeometry {
    vlen: usize,
    elen: usize,
    slen: usize,
}

impl VectorGeometry {
    /// Validate and build a geometry.
    ///
    /// `slen` of `None` means no striping (SLEN = VLEN).
    pub fn new(vlen: usize, elen: usize, slen: Option<usize>) -> ConfigResult<Self> {
        if vlen < 8 || !vlen.is_power_of_two() {
            return Err(ConfigError::InvalidVlen(vlen));
        }
        if Sew::from_bits(elen).is_none() || elen > vlen {
            return Err(ConfigError::InvalidElen { elen, vlen });
        }
        let slen = slen.unwrap_or(vlen);
        if !slen.is_power_of_two() || slen > vlen || slen < 8 {
            return Err(ConfigError::InvalidSlen { slen, vlen });
        }
        Ok(Self { vlen, elen, slen })
    }

    /// Vector register width in bits.
    #[inline]
    pub fn vlen(&self) -> usize {
        self.vlen
    }

    /// Maximum element width in bits.
    #[inline]
    pub fn elen(&self) -> usize {
        self.elen
    }

    /// Striping distance in bits.
    #[inline]
    pub fn slen(&self) -> usize {
        self.slen
    }

    /// Vector register width in bytes.
    #[inline]
    pub fn vlenb(&self) -> usize {
        self.vlen / 8
    }

    /// Maximum vector length for a SEW/LMUL pair.
    #[inline]
    pub fn vlmax(&self, sew: Sew, lmul: usize) -> usize {
        (self.vlen / sew.bits()) * lmul
    }
}

/// Requested application vector length for `vsetvl`/`vsetvli`.
///
/// Mirrors the three encodings of the instruction's `rd`/`rs1` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvlRequest {
    /// `rd == x0, rs1 == x0`: keep the current VL (clamped to the new VLMAX).
    KeepCurrent,
    /// `rd != x0, rs1 == x0`: use VLMAX.
    Maximum,
    /// `rs1 != x0`: the value held in rs1.
    Requested(usize),
}

/// Architectural vector configuration of one hart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorConfig {
    geometry: VectorGeometry,
    sew: Sew,
    lmul: usize,
    vl: usize,
    vstart: usize,
}

impl VectorConfig {
    /// Reset state: SEW=8, LMUL=1, VL=0, VSTART=0.
    pub fn new(geometry: VectorGeometry) -> Self {
        Self {
            geometry,
            sew: Sew::E8,
            lmul: 1,
            vl: 0,
            vstart: 0,
        }
    }

    /// Hardware parameters.
    pub fn geometry(&self) -> &VectorGeometry {
        &self.geometry
    }

    /// Selected element width.
    pub fn sew(&self) -> Sew {
        self.sew
    }

    /// Register-group multiplier.
    pub fn lmul(&self) -> usize {
        self.lmul
    }

    /// Active vector length in elements.
    pub fn vl(&self) -> usize {
        self.vl
    }

    /// Resume index.
    pub fn vstart(&self) -> usize {
        self.vstart
    }

    /// Mask bit stride, `SEW / LMUL`.
    pub fn mlen(&self) -> usize {
        self.sew.bits() / self.lmul
    }

    /// Maximum vector length under the current SEW/LMUL.
    pub fn vlmax(&self) -> usize {
        self.geometry.vlmax(self.sew, self.lmul)
    }

    /// Check a requested SEW/LMUL pair against the hardware.
    pub fn validate_vtype(&self, sew_bits: usize, lmul: usize) -> Result<Sew, VectorTrap> {
        let sew = match Sew::from_bits(sew_bits) {
            Some(sew) if sew_bits <= self.geometry.elen => sew,
            _ => return Err(VectorTrap::IllegalConfiguration { sew_bits, lmul }),
        };
        if !lmul.is_power_of_two() || lmul > MAX_LMUL {
            return Err(VectorTrap::IllegalConfiguration { sew_bits, lmul });
        }
        Ok(sew)
    }

    /// SEW-wide element slots per physical register.
    pub fn elements_per_register(&self) -> usize {
        self.geometry.vlen / self.sew.bits()
    }

    /// Execute a `vset*` instruction. Returns the granted VL.
    ///
    /// An unsupported SEW/LMUL leaves the configuration untouched.
    pub fn set_vl(&mut self, avl: AvlRequest, sew_bits: usize, lmul: usize) -> Result<usize, VectorTrap> {
        let sew = self.validate_vtype(sew_bits, lmul)?;
        let vlmax = self.geometry.vlmax(sew, lmul);
        let vl = match avl {
            AvlRequest::KeepCurrent => self.vl.min(vlmax),
            AvlRequest::Maximum => vlmax,
            AvlRequest::Requested(requested) => requested.min(vlmax),
        };

        self.sew = sew;
        self.lmul = lmul;
        self.vl = vl;
        self.vstart = 0;
        log::debug!("vset: SEW={} LMUL={} VL={} (VLMAX={})", sew_bits, lmul, vl, vlmax);
        Ok(vl)
    }

    /// Apply a vector length granted by an external vector unit.
    ///
    /// The grant is clamped to VLMAX and VSTART is pulled down if needed.
    pub fn set_granted_vl(&mut self, granted: usize) {
        self.vl = granted.min(self.vlmax());
        self.vstart = self.vstart.min(self.vl);
    }

    /// Record the element index a trapping instruction should resume from.
    pub fn set_vstart(&mut self, vstart: usize) {
        self.vstart = vstart.min(self.vl);
    }

    /// Mark the current vector instruction as fully completed.
    pub fn complete_instruction(&mut self) {
        self.vstart = 0;
    }

    /// Element indices the current instruction still has to process.
    pub fn active_elements(&self) -> std::ops::Range<usize> {
        self.vstart..self.vl
    }

    /// Check that `reg` starts a legal group of `group` registers.
    pub fn check_group(&self, reg: usize, group: usize) -> Result<(), VectorTrap> {
        if group > 1 && reg % group != 0 {
            return Err(VectorTrap::MisalignedGroup { reg, group });
        }
        if reg + group > NUM_VECTOR_REGS {
            return Err(VectorTrap::GroupOutOfRange { base: reg, count: group });
        }
        Ok(())
    }

    /// Check a register group under the current LMUL.
    pub fn check_operand(&self, reg: usize) -> Result<(), VectorTrap> {
        self.check_group(reg, self.lmul)
    }
}
