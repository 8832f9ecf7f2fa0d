//! Motion-control core for a small 2-axis CNC engraver.
//!
//! The crate turns a byte stream of G-code into timed step pulses:
//! [`protocol`] frames bytes into normalized lines and intercepts the four
//! real-time commands, [`gcode`] parses and executes lines against modal
//! state, [`arc`] expands circular moves into chord segments, [`motion`]
//! holds planner blocks and drives the stepper engine, and [`supervisor`]
//! owns the whole pipeline behind a latching state machine.
//!
//! Hardware access goes through the [`hal::Hal`] trait and coordinate
//! transforms through [`motion::kinematics::Kinematics`]; both are
//! capability records owned by the supervisor, so the core has no global
//! state and runs unchanged against the simulated HAL used in tests.

pub mod arc;
pub mod config;
pub mod gcode;
pub mod hal;
pub mod motion;
pub mod protocol;
pub mod supervisor;
pub mod web;

pub use config::{load_config, Config};
pub use protocol::{CompletedLine, LineStatus, Protocol, RealtimeCommand};
pub use supervisor::{AlarmCode, Supervisor, SystemState};
