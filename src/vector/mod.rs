//! Vector unit geometry and element addressing.
//!
//! - [`addressing`]: logical element → (physical register, slot) mapping,
//!   mask bit layout and SLEN striping
//! - [`config`]: SEW / LMUL / VL / VSTART state and the `vset*` transition
//!
//! Hazards on vector registers are tracked per whole physical register; this
//! module is what turns an element index into that register.

pub mod addressing;
pub mod config;

pub use addressing::{
    element_active, elements_per_register, locate_element, locate_in_group, mask_position, striped_index,
    ElementLocation, MaskPosition,
};
pub use config::{AvlRequest, Sew, VectorConfig, VectorGeometry, VectorTrap, MAX_LMUL, NUM_VECTOR_REGS};
