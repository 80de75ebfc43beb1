//! Device layer: the CQRS switch model and HVAC units built on top of it.
//!
//! A device separates what was asked for (`requested`, set synchronously by
//! [`CqrsDevice::set_state`]) from what is actually true (`actual`, set only by
//! driver feedback). Outbound commands are shaped by two timing policies:
//!
//! - **Pace**: at most one command per window, rapid changes coalesce, latest wins
//! - **Heartbeat**: the last command is re-sent after a period of silence
//!
//! HVAC devices compose one to three switches into a mode-aware unit.

pub mod cqrs;
pub mod driver;
pub mod error;
pub mod hvac;
pub mod state;

pub use cqrs::{CLOSE_ACK_TIMEOUT, CqrsDevice, ManagedDevice, Switch, SwitchConfig};
pub use driver::{DeviceDriver, DriverEvent, NullDriver, OutboundCommand, SENT_HISTORY};
pub use error::{DeviceError, DeviceResult, DriverError};
pub use hvac::{
    HeatPump, HvacDevice, HvacDeviceKind, HvacDeviceStatus, Reversal, StatusKind,
    SwitchableHvacDevice, VariableHvacDevice,
};
pub use state::{DeviceState, OutputCommand, StateValue};
