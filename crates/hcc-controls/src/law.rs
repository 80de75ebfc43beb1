//! The control law seam.

use hcc_core::Timestamp;
use serde::{Deserialize, Serialize};

/// Per-tick controller output, carrying the setpoint that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Status<O> {
    pub setpoint: f64,
    pub error: Option<f64>,
    pub signal: O,
}

/// The arithmetic of a controller, free of streams and failure handling.
///
/// Called only with usable process variables; total failures never reach a law.
pub trait ControlLaw: Send + 'static {
    fn compute(&mut self, setpoint: f64, pv: f64, timestamp: Timestamp) -> Status<f64>;

    /// Hook for laws that keep state tied to the setpoint.
    fn setpoint_changed(&mut self, _old: f64, _new: f64) {}
}
