//! hartsim library
//!
//! Cycle-approximate timing core for RISC-V harts with vector extensions:
//! register hazard tracking, set-associative cache models and the vector
//! configuration an external timing model needs to schedule instructions.

pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod hart;
pub mod sim;
pub mod timing;
pub mod vector;

pub use config::Config;
pub use error::{ConfigError, ConfigResult};
pub use event::Event;
pub use hart::{HartState, Operation, StepOutcome};
pub use sim::{SimStep, Simulator};
