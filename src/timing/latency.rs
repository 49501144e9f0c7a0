//! Instruction latency tables.
//!
//! Base latencies assume a vector unit wide enough to consume the whole
//! vector length at once. [`LaneModel`] scales vector latencies down to a
//! finite number of lanes.
//!
//! # Latency Categories
//!
//! | Class | Default | Notes |
//! |-------|---------|-------|
//! | IntAlu | 1 cycle | add, logic, shift, compare |
//! | IntMul | 3 cycles | |
//! | IntDiv | 20 cycles | not pipelined |
//! | FpAdd / FpMul | 4 cycles | |
//! | FpFma | 5 cycles | |
//! | FpDiv | 20 cycles | |
//! | VecAlu / VecMask | 2 cycles | per chunk |
//! | VecMul / VecFp | 4 cycles | per chunk |
//! | VecReduction / VecPermute | 6 / 3 cycles | |
//! | Memory (L1 hit) | 2 cycles | misses resolve asynchronously |
//!
//! # Lane chunking
//!
//! ```text
//! VL = 20, lanes = 8  ->  chunks = ceil(20 / 8) = 3
//!
//!   FullWidth   : base
//!   Pipelined   : base + chunks - 1
//!   Serialized  : base * chunks
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Integer ALU latency: 1 cycle
pub const LATENCY_INT_ALU: u64 = 1;

/// Integer multiply: 3 cycles
pub const LATENCY_INT_MUL: u64 = 3;

/// Integer divide: 20 cycles
pub const LATENCY_INT_DIV: u64 = 20;

/// FP add/subtract/convert: 4 cycles
pub const LATENCY_FP_ADD: u64 = 4;

/// FP multiply: 4 cycles
pub const LATENCY_FP_MUL: u64 = 4;

/// FP fused multiply-add: 5 cycles
pub const LATENCY_FP_FMA: u64 = 5;

/// FP divide/sqrt: 20 cycles
pub const LATENCY_FP_DIV: u64 = 20;

/// Vector integer ALU: 2 cycles
pub const LATENCY_VEC_ALU: u64 = 2;

/// Vector integer multiply: 4 cycles
pub const LATENCY_VEC_MUL: u64 = 4;

/// Vector divide: 24 cycles
pub const LATENCY_VEC_DIV: u64 = 24;

/// Vector floating point: 4 cycles
pub const LATENCY_VEC_FP: u64 = 4;

/// Vector reduction: 6 cycles
pub const LATENCY_VEC_REDUCTION: u64 = 6;

/// Vector permute/slide/gather: 3 cycles
pub const LATENCY_VEC_PERMUTE: u64 = 3;

/// Vector mask logic: 2 cycles
pub const LATENCY_VEC_MASK: u64 = 2;

/// Load-to-use latency of an L1 hit: 2 cycles
pub const LATENCY_L1_HIT: u64 = 2;

/// Default lanes per vector unit.
pub const DEFAULT_LANES_PER_VPU: usize = 8;

/// Operation class used for latency lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpClass {
    IntAlu,
    IntMul,
    IntDiv,
    FpAdd,
    FpMul,
    FpDiv,
    FpFma,
    VecAlu,
    VecMul,
    VecDiv,
    VecFp,
    VecReduction,
    VecPermute,
    VecMask,
}

impl OpClass {
    /// Every class, in declaration order.
    pub const ALL: [OpClass; 14] = [
        OpClass::IntAlu,
        OpClass::IntMul,
        OpClass::IntDiv,
        OpClass::FpAdd,
        OpClass::FpMul,
        OpClass::FpDiv,
        OpClass::FpFma,
        OpClass::VecAlu,
        OpClass::VecMul,
        OpClass::VecDiv,
        OpClass::VecFp,
        OpClass::VecReduction,
        OpClass::VecPermute,
        OpClass::VecMask,
    ];

    /// True for classes executed by the vector unit.
    pub fn is_vector(self) -> bool {
        matches!(
            self,
            OpClass::VecAlu
                | OpClass::VecMul
                | OpClass::VecDiv
                | OpClass::VecFp
                | OpClass::VecReduction
                | OpClass::VecPermute
                | OpClass::VecMask
        )
    }

    fn default_latency(self) -> u64 {
        match self {
            OpClass::IntAlu => LATENCY_INT_ALU,
            OpClass::IntMul => LATENCY_INT_MUL,
            OpClass::IntDiv => LATENCY_INT_DIV,
            OpClass::FpAdd => LATENCY_FP_ADD,
            OpClass::FpMul => LATENCY_FP_MUL,
            OpClass::FpDiv => LATENCY_FP_DIV,
            OpClass::FpFma => LATENCY_FP_FMA,
            OpClass::VecAlu => LATENCY_VEC_ALU,
            OpClass::VecMul => LATENCY_VEC_MUL,
            OpClass::VecDiv => LATENCY_VEC_DIV,
            OpClass::VecFp => LATENCY_VEC_FP,
            OpClass::VecReduction => LATENCY_VEC_REDUCTION,
            OpClass::VecPermute => LATENCY_VEC_PERMUTE,
            OpClass::VecMask => LATENCY_VEC_MASK,
        }
    }
}

/// How vector latency grows when VL exceeds the lane count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanePolicy {
    /// Base latency regardless of VL.
    #[default]
    FullWidth,
    /// One extra cycle per additional chunk.
    Pipelined,
    /// Each chunk pays the full base latency.
    Serialized,
}

/// Vector lane configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneModel {
    /// Elements processed per cycle.
    pub lanes_per_vpu: usize,
    /// Scaling policy.
    pub policy: LanePolicy,
}

impl Default for LaneModel {
    fn default() -> Self {
        Self {
            lanes_per_vpu: DEFAULT_LANES_PER_VPU,
            policy: LanePolicy::FullWidth,
        }
    }
}

impl LaneModel {
    /// Number of lane-wide chunks needed for `vl` elements (at least 1).
    #[inline]
    pub fn chunks(&self, vl: usize) -> u64 {
        let lanes = self.lanes_per_vpu.max(1);
        vl.div_ceil(lanes).max(1) as u64
    }

    /// Scale a base latency for `vl` active elements.
    pub fn scale(&self, base: u64, vl: usize) -> u64 {
        let chunks = self.chunks(vl);
        match self.policy {
            LanePolicy::FullWidth => base,
            LanePolicy::Pipelined => base + chunks - 1,
            LanePolicy::Serialized => base * chunks,
        }
    }
}

/// Lookup table for operation latencies.
#[derive(Debug, Clone)]
pub struct LatencyTable {
    by_class: [u64; OpClass::ALL.len()],
    /// Per-mnemonic overrides loaded from an external table.
    by_mnemonic: HashMap<String, u64>,
    memory_hit: u64,
    lanes: LaneModel,
}

impl LatencyTable {
    /// Table with the built-in defaults.
    pub fn new(lanes: LaneModel) -> Self {
        let mut by_class = [0; OpClass::ALL.len()];
        for class in OpClass::ALL {
            by_class[class as usize] = class.default_latency();
        }
        Self {
            by_class,
            by_mnemonic: HashMap::new(),
            memory_hit: LATENCY_L1_HIT,
            lanes,
        }
    }

    /// Table with per-mnemonic entries, e.g. `("vfmacc.vv", 6)`.
    pub fn from_pairs<I, S>(lanes: LaneModel, pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let mut table = Self::new(lanes);
        table.by_mnemonic = pairs.into_iter().map(|(name, lat)| (name.into(), lat)).collect();
        table
    }

    /// Override the base latency of a class.
    pub fn set(&mut self, class: OpClass, latency: u64) {
        self.by_class[class as usize] = latency;
    }

    /// Override the L1 hit latency.
    pub fn set_memory_hit(&mut self, latency: u64) {
        self.memory_hit = latency;
    }

    /// Load-to-use latency of an L1 hit.
    #[inline]
    pub fn memory_hit(&self) -> u64 {
        self.memory_hit
    }

    /// Lane model in use.
    pub fn lanes(&self) -> LaneModel {
        self.lanes
    }

    /// Base latency of a class.
    #[inline]
    pub fn base(&self, class: OpClass) -> u64 {
        self.by_class[class as usize]
    }

    /// Base latency of a mnemonic, if the external table has it.
    pub fn mnemonic(&self, name: &str) -> Option<u64> {
        self.by_mnemonic.get(name).copied()
    }

    /// Effective latency of a class for `vl` active elements.
    ///
    /// Scalar classes ignore `vl`.
    pub fn latency(&self, class: OpClass, vl: usize) -> u64 {
        self.scaled(class, self.base(class), vl)
    }

    /// Effective latency of one instruction. A mnemonic entry replaces the
    /// class base latency; vector classes are still scaled by the lane model.
    pub fn instruction_latency(&self, class: OpClass, mnemonic: Option<&str>, vl: usize) -> u64 {
        let base = mnemonic
            .and_then(|name| self.mnemonic(name))
            .unwrap_or_else(|| self.base(class));
        self.scaled(class, base, vl)
    }

    fn scaled(&self, class: OpClass, base: u64, vl: usize) -> u64 {
        if class.is_vector() {
            self.lanes.scale(base, vl)
        } else {
            base
        }
    }
}

impl Default for LatencyTable {
    fn default() -> Self {
        Self::new(LaneModel::default())
    }
}
