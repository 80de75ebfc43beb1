//! Process controllers for home climate control.
//!
//! A process controller is a stateful function from a process-variable
//! stream to a control-status stream. The arithmetic lives in a
//! [`ControlLaw`]; [`ProcessController`] wraps a law with a setpoint and the
//! streaming/failure semantics shared by every law.
//!
//! # Laws
//!
//! - **Hysteresis**: `±1` output with a dead band around the setpoint
//! - **PID**: proportional/integral/derivative with an integral saturation guard,
//!   derivative computed from the real interval between samples

pub mod controller;
pub mod error;
pub mod hysteresis;
pub mod law;
pub mod pid;

pub use controller::{HysteresisController, PidController, ProcessController};
pub use error::{ControlError, ControlResult};
pub use hysteresis::{Hysteresis, HysteresisThresholds};
pub use law::{ControlLaw, Status};
pub use pid::{Pid, PidGains, PidState, PidTerms};
