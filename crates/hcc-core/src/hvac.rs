//! HVAC vocabulary shared by zones, directors and devices.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::numeric::ensure_unit_interval;

/// Operating mode. Ordered `Heating < Off < Cooling` (−1, 0, 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HvacMode {
    Heating = -1,
    Off = 0,
    Cooling = 1,
}

impl HvacMode {
    /// Arithmetic sign of the mode: −1, 0 or 1.
    pub fn sign(self) -> f64 {
        f64::from(self as i8)
    }

    pub fn opposite(self) -> Self {
        match self {
            HvacMode::Heating => HvacMode::Cooling,
            HvacMode::Off => HvacMode::Off,
            HvacMode::Cooling => HvacMode::Heating,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HvacMode::Heating => "heating",
            HvacMode::Off => "off",
            HvacMode::Cooling => "cooling",
        }
    }
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HvacMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heating" | "heat" => Ok(HvacMode::Heating),
            "off" => Ok(HvacMode::Off),
            "cooling" | "cool" => Ok(HvacMode::Cooling),
            other => Err(CoreError::Unknown {
                what: "HVAC mode",
                value: other.to_string(),
            }),
        }
    }
}

/// Command for an HVAC unit.
///
/// Absent fields mean "keep whatever was there before"; see [`HvacCommand::reconcile`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HvacCommand {
    pub mode: Option<HvacMode>,
    /// Normalized effort in `[0, 1]`.
    pub demand: Option<f64>,
    /// Normalized fan speed in `[0, 1]`.
    pub fan_speed: Option<f64>,
}

impl HvacCommand {
    pub fn new(
        mode: Option<HvacMode>,
        demand: Option<f64>,
        fan_speed: Option<f64>,
    ) -> CoreResult<Self> {
        if let Some(d) = demand {
            ensure_unit_interval(d, "demand")?;
        }
        if let Some(f) = fan_speed {
            ensure_unit_interval(f, "fan_speed")?;
        }
        Ok(Self {
            mode,
            demand,
            fan_speed,
        })
    }

    /// Change the mode only, leaving demand and fan speed alone.
    pub fn mode_only(mode: HvacMode) -> Self {
        Self {
            mode: Some(mode),
            demand: None,
            fan_speed: None,
        }
    }

    /// Everything off, mode untouched.
    pub fn shutdown() -> Self {
        Self {
            mode: None,
            demand: Some(0.0),
            fan_speed: Some(0.0),
        }
    }

    pub fn is_mode_only(&self) -> bool {
        self.mode.is_some() && self.demand.is_none() && self.fan_speed.is_none()
    }

    /// Fields present in `self` win, absent ones are taken from `previous`.
    pub fn reconcile(&self, previous: &HvacCommand) -> HvacCommand {
        HvacCommand {
            mode: self.mode.or(previous.mode),
            demand: self.demand.or(previous.demand),
            fan_speed: self.fan_speed.or(previous.fan_speed),
        }
    }

    /// The compressor/burner is asked to do work.
    pub fn is_running(&self) -> bool {
        self.demand.unwrap_or(0.0) > 0.0
    }

    /// Anything at all (running or fan) is asked to be on.
    pub fn is_on(&self) -> bool {
        self.demand.unwrap_or(0.0) + self.fan_speed.unwrap_or(0.0) > 0.0
    }
}
