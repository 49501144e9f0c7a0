//! Configuration errors shared by the cache and vector models.
//!
//! Everything here is fatal at construction time: a simulator built from a
//! bad geometry string or an inconsistent vector unit never starts. Runtime
//! outcomes (stalls, backpressure, vector traps) are not errors and live with
//! the code that produces them.

use thiserror::Error;

/// Result alias for fallible constructors.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Invalid simulator configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Cache geometry string is not of the form `sets:ways:lineBytes`.
    #[error("malformed cache geometry `{0}`: expected sets:ways:lineBytes")]
    MalformedGeometry(String),

    /// A geometry field must be a power of two.
    #[error("cache {field} must be a power of two, got {value}")]
    NotPowerOfTwo {
        /// Field name (`sets` or `line size`).
        field: &'static str,
        /// The rejected value.
        value: usize,
    },

    /// Line size below the minimum supported block.
    #[error("cache line size must be at least {min} bytes, got {value}")]
    LineTooSmall {
        /// Minimum line size in bytes.
        min: usize,
        /// The rejected value.
        value: usize,
    },

    /// Associativity outside the structural slot budget.
    #[error("cache ways must be between 1 and {max}, got {value}")]
    WaysOutOfRange {
        /// Maximum supported associativity.
        max: usize,
        /// The rejected value.
        value: usize,
    },

    /// VLEN is not a power of two of at least one byte.
    #[error("VLEN must be a power of two of at least 8 bits, got {0}")]
    InvalidVlen(usize),

    /// ELEN is unsupported or wider than VLEN.
    #[error("ELEN must be 8, 16, 32 or 64 and no wider than VLEN ({vlen}), got {elen}")]
    InvalidElen {
        /// Configured maximum element width in bits.
        elen: usize,
        /// Configured vector register width in bits.
        vlen: usize,
    },

    /// SLEN must divide VLEN.
    #[error("SLEN must be a power of two no wider than VLEN ({vlen}), got {slen}")]
    InvalidSlen {
        /// Configured striping distance in bits.
        slen: usize,
        /// Configured vector register width in bits.
        vlen: usize,
    },

    /// Element width cannot be addressed in a register of this width.
    #[error("element width of {element_bytes} bytes does not fit a {vlen}-bit register")]
    InvalidElementWidth {
        /// Element width in bytes.
        element_bytes: usize,
        /// Vector register width in bits.
        vlen: usize,
    },

    /// Lane count must be positive.
    #[error("lanes per vector unit must be at least 1")]
    NoLanes,

    /// At least one hart is required.
    #[error("simulator needs at least one hart")]
    NoHarts,
}
