//! Register timing for one hart.
//!
//! - **Availability**: per-register ready cycle and pending-event countdown
//! - **Hazards**: RAW detection, pending sets, dependency events
//! - **Latency**: per-class base latencies and the vector lane model
//!
//! # Usage
//!
//! ```ignore
//! use hartsim::timing::{Availability, HazardTracker, RegisterKind};
//!
//! let mut tracker = HazardTracker::new(0);
//! tracker.record_write(RegisterKind::Integer, 5, 1, Availability::Unknown);
//! tracker.begin_instruction(0x1000, 1);
//! assert!(tracker.check_read(RegisterKind::Integer, 5, 10));
//! ```

pub mod availability;
pub mod hazards;
pub mod latency;

pub use availability::{Availability, RegisterAvailability, RegisterKind, NUM_FLOAT_REGS, NUM_INT_REGS};
pub use hazards::{DependencyEvent, HazardStats, HazardTracker, HazardType};
pub use latency::{LaneModel, LanePolicy, LatencyTable, OpClass};
