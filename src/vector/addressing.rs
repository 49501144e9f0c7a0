//! Vector element addressing.
//!
//! Maps a logical element of a register group to the physical register that
//! holds it and the element slot inside that register. Elements are laid out
//! little-endian: element 0 occupies the lowest-addressed bytes of the first
//! register in the group.
//!
//! ```text
//! VLEN = 128, SEW = 32  ->  4 elements per register
//!
//!   v8:  [e0 e1 e2 e3]
//!   v9:  [e4 e5 e6 e7]      element 6 -> (v9, slot 2, byte 8)
//! ```
//!
//! The mask for element `i` lives in `v0` at bit `i * MLEN`, with
//! `MLEN = SEW / LMUL`.

use crate::error::{ConfigError, ConfigResult};

/// Physical location of one vector element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementLocation {
    /// Physical vector register holding the element.
    pub register: usize,
    /// Element slot within that register.
    pub offset: usize,
}

impl ElementLocation {
    /// Byte offset of the element inside its register.
    #[inline]
    pub fn byte_offset(&self, element_bytes: usize) -> usize {
        self.offset * element_bytes
    }
}

/// Position of an element's mask bit in the 64-bit words of `v0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskPosition {
    /// 64-bit word index within `v0`.
    pub word: usize,
    /// Bit within that word.
    pub bit: u32,
}

/// Number of `element_bytes`-wide elements in one physical register.
pub fn elements_per_register(vlen_bits: usize, element_bytes: usize) -> ConfigResult<usize> {
    if vlen_bits == 0 || vlen_bits % 8 != 0 {
        return Err(ConfigError::InvalidVlen(vlen_bits));
    }
    let register_bytes = vlen_bits / 8;
    if element_bytes == 0 || element_bytes > register_bytes {
        return Err(ConfigError::InvalidElementWidth {
            element_bytes,
            vlen: vlen_bits,
        });
    }
    Ok(register_bytes / element_bytes)
}

/// Locate element `index` of the group starting at logical register `vreg`.
pub fn locate_element(
    vreg: usize,
    index: usize,
    vlen_bits: usize,
    element_bytes: usize,
) -> ConfigResult<ElementLocation> {
    let per_register = elements_per_register(vlen_bits, element_bytes)?;
    Ok(locate_in_group(vreg, index, per_register))
}

/// Locate element `index` given an already validated per-register count.
#[inline]
pub fn locate_in_group(vreg: usize, index: usize, per_register: usize) -> ElementLocation {
    ElementLocation {
        register: vreg + index / per_register,
        offset: index % per_register,
    }
}

/// Mask bit position of element `index` for the given SEW and LMUL.
#[inline]
pub fn mask_position(index: usize, sew_bits: usize, lmul: usize) -> MaskPosition {
    let mlen = sew_bits / lmul.max(1);
    let bit_index = mlen * index;
    MaskPosition {
        word: bit_index / 64,
        bit: (bit_index % 64) as u32,
    }
}

/// Whether element `index` participates in a (possibly masked) operation.
///
/// Unmasked operations touch every element. Mask bits beyond the supplied
/// words read as zero.
pub fn element_active(mask: &[u64], index: usize, sew_bits: usize, lmul: usize, masked: bool) -> bool {
    if !masked {
        return true;
    }
    let pos = mask_position(index, sew_bits, lmul);
    mask.get(pos.word)
        .map(|word| (word >> pos.bit) & 1 == 1)
        .unwrap_or(false)
}

/// Element index inside a register group after SLEN striping.
///
/// With `slen_bits == vlen_bits` this is the identity; narrower SLEN
/// interleaves strips of each register across the group.
pub fn striped_index(index: usize, vlen_bits: usize, slen_bits: usize, sew_bits: usize, lmul: usize) -> usize {
    let elems_per_strip = (slen_bits / sew_bits).max(1);
    let elems_per_vreg = vlen_bits / sew_bits;
    let elems_per_lane = lmul.max(1) * elems_per_strip;
    let strip = index / elems_per_lane;
    let in_strip = index % elems_per_strip;
    let lmul_index = (index % elems_per_lane) / elems_per_strip;
    lmul_index * elems_per_vreg + strip * elems_per_strip + in_strip
}
