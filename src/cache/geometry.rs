//! Cache geometry and address decomposition.
//!
//! ```text
//!  63                      log2(line)+log2(sets)   log2(line)        0
//! +-----------------------+-----------------------+------------------+
//! |          tag          |       set index       |   line offset    |
//! +-----------------------+-----------------------+------------------+
//! ```
//!
//! The stored tag is the full line address (`addr & !line_mask`), so a
//! victim's address can be rebuilt from the tag alone.

use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, ConfigResult};

/// Largest supported associativity.
pub const MAX_WAYS: usize = 64;

/// Smallest supported line size in bytes.
pub const MIN_LINE_BYTES: usize = 8;

/// Validated cache shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheGeometry {
    sets: usize,
    ways: usize,
    line_bytes: usize,
    line_shift: u32,
}

impl CacheGeometry {
    /// Validate a `sets x ways x line_bytes` cache.
    pub fn new(sets: usize, ways: usize, line_bytes: usize) -> ConfigResult<Self> {
        if !sets.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                field: "sets",
                value: sets,
            });
        }
        if ways == 0 || ways > MAX_WAYS {
            return Err(ConfigError::WaysOutOfRange {
                max: MAX_WAYS,
                value: ways,
            });
        }
        if !line_bytes.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                field: "line size",
                value: line_bytes,
            });
        }
        if line_bytes < MIN_LINE_BYTES {
            return Err(ConfigError::LineTooSmall {
                min: MIN_LINE_BYTES,
                value: line_bytes,
            });
        }
        Ok(Self {
            sets,
            ways,
            line_bytes,
            line_shift: line_bytes.trailing_zeros(),
        })
    }

    /// Parse a `sets:ways:lineBytes` string.
    pub fn parse(spec: &str) -> ConfigResult<Self> {
        let malformed = || ConfigError::MalformedGeometry(spec.to_string());
        let mut fields = spec.trim().split(':');
        let mut next = || -> ConfigResult<usize> {
            fields
                .next()
                .and_then(|f| f.trim().parse::<usize>().ok())
                .ok_or_else(malformed)
        };
        let sets = next()?;
        let ways = next()?;
        let line_bytes = next()?;
        if fields.next().is_some() {
            return Err(malformed());
        }
        Self::new(sets, ways, line_bytes)
    }

    /// Number of sets.
    #[inline]
    pub fn sets(&self) -> usize {
        self.sets
    }

    /// Associativity.
    #[inline]
    pub fn ways(&self) -> usize {
        self.ways
    }

    /// Line size in bytes.
    #[inline]
    pub fn line_bytes(&self) -> usize {
        self.line_bytes
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.sets * self.ways * self.line_bytes
    }

    /// `addr` rounded down to its line.
    #[inline]
    pub fn line_address(&self, addr: u64) -> u64 {
        addr & !(self.line_bytes as u64 - 1)
    }

    /// Set that `addr` maps to.
    #[inline]
    pub fn set_index(&self, addr: u64) -> usize {
        ((addr >> self.line_shift) as usize) & (self.sets - 1)
    }
}

impl FromStr for CacheGeometry {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CacheGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.sets, self.ways, self.line_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_geometry() {
        let g = CacheGeometry::parse("64:4:64").unwrap();
        assert_eq!(g.sets(), 64);
        assert_eq!(g.ways(), 4);
        assert_eq!(g.line_bytes(), 64);
        assert_eq!(g.capacity(), 16 * 1024);
        assert_eq!(g.to_string(), "64:4:64");

        let g: CacheGeometry = "1:1:8".parse().unwrap();
        assert_eq!(g.ways(), 1);
    }

    #[test]
    fn test_malformed_geometry() {
        for bad in ["", "64", "64:4", "64:4:64:1", "a:4:64", "64:-1:64"] {
            assert!(
                matches!(CacheGeometry::parse(bad), Err(ConfigError::MalformedGeometry(_))),
                "{bad:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_geometry_constraints() {
        assert_eq!(
            CacheGeometry::new(3, 1, 64),
            Err(ConfigError::NotPowerOfTwo { field: "sets", value: 3 })
        );
        assert_eq!(
            CacheGeometry::new(4, 0, 64),
            Err(ConfigError::WaysOutOfRange { max: MAX_WAYS, value: 0 })
        );
        assert_eq!(
            CacheGeometry::new(4, 65, 64),
            Err(ConfigError::WaysOutOfRange { max: MAX_WAYS, value: 65 })
        );
        assert_eq!(
            CacheGeometry::new(4, 2, 48),
            Err(ConfigError::NotPowerOfTwo { field: "line size", value: 48 })
        );
        assert_eq!(
            CacheGeometry::new(4, 2, 4),
            Err(ConfigError::LineTooSmall { min: 8, value: 4 })
        );
        assert!(CacheGeometry::new(4, MAX_WAYS, 8).is_ok());
    }

    #[test]
    fn test_address_decomposition() {
        let g = CacheGeometry::new(4, 2, 16).unwrap();
        assert_eq!(g.line_address(0x1234), 0x1230);
        // 0x1234 >> 4 = 0x123, & 3 = 3
        assert_eq!(g.set_index(0x1234), 3);
        assert_eq!(g.set_index(0x00), 0);
        assert_eq!(g.set_index(0x40), 0);
        assert_eq!(g.set_index(0x10), 1);
    }
}
