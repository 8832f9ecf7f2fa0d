//! Motion pipeline: planner blocks, the bounded block queue and the
//! tick-driven stepper engine, plus the kinematics adapters they consume.

pub mod kinematics;
pub mod planner;
pub mod stepper;

pub use planner::{PlannerBlock, PlannerQueue};
pub use stepper::{Stepper, StepperConfig, StepperPhase};

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MotionError {
    #[error("planner queue full")]
    QueueFull,
    #[error("planner block failed validation")]
    InvalidBlock,
}

/// Snapshot of queue occupancy for status reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub length: usize,
    pub capacity: usize,
    pub high_water: usize,
}
