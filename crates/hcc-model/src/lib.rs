//! Zone model for home climate control.
//!
//! - [`Thermostat`]: PID controller plus hysteresis renderer, sensor sample in,
//!   calling status out
//! - [`Zone`]: a thermostat with user settings, schedule periods and an
//!   optional [`Economizer`]
//! - [`UnitDirector`]: many zone statuses in, one HVAC unit command out
//! - [`StatusCollector`]: health snapshot of everything it is pointed at

pub mod director;
pub mod economizer;
pub mod error;
pub mod settings;
pub mod status;
pub mod thermostat;
pub mod zone;

pub use director::{Feed, UnitDirector};
pub use economizer::{
    Economizer, EconomizerSettings, EconomizerState, EconomizerStatus, EconomizerStrategy,
};
pub use error::{ModelError, ModelResult};
pub use settings::{PeriodSettings, SetpointRange, ZoneSettings};
pub use status::{EntityHealth, EntityKind, StatusCollector, SystemStatus};
pub use thermostat::{CallingStatus, Thermostat};
pub use zone::{Zone, ZoneStatus};
