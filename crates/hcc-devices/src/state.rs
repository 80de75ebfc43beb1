use std::fmt::Debug;

use serde::{Deserialize, Serialize};

/// What a device state can be made of.
pub trait StateValue: Clone + PartialEq + Debug + Send + Sync + 'static {}

impl<T: Clone + PartialEq + Debug + Send + Sync + 'static> StateValue for T {}

/// Requested vs. actual state of one device.
///
/// `actual` reflects the last state confirmed by the hardware, `requested` the
/// last one commanded; they diverge while a command is in transit or failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState<T> {
    pub id: String,
    pub available: bool,
    pub requested: Option<T>,
    pub actual: Option<T>,
    /// Commands accepted but not yet confirmed or discarded.
    pub queue_depth: usize,
}

impl<T: PartialEq> DeviceState<T> {
    /// Requested and actual agree.
    pub fn is_settled(&self) -> bool {
        self.requested.is_some() && self.requested == self.actual
    }
}

/// State of a variable output device: on/off plus output level in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutputCommand {
    pub on: bool,
    pub output: f64,
}

impl OutputCommand {
    pub fn off() -> Self {
        Self {
            on: false,
            output: 0.0,
        }
    }
}
