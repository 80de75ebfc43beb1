//! User intent for a zone.

use serde::{Deserialize, Serialize};

use crate::economizer::EconomizerSettings;
use crate::error::{ModelError, ModelResult};

/// Inclusive setpoint bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetpointRange {
    pub min: f64,
    pub max: f64,
}

impl SetpointRange {
    pub fn new(min: f64, max: f64) -> ModelResult<Self> {
        if !min.is_finite() || !max.is_finite() || min >= max {
            return Err(ModelError::InvalidArg {
                what: "setpoint range must be finite with min < max",
            });
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, setpoint: f64) -> bool {
        (self.min..=self.max).contains(&setpoint)
    }

    pub fn check(&self, setpoint: f64) -> ModelResult<f64> {
        if self.contains(setpoint) {
            Ok(setpoint)
        } else {
            Err(ModelError::SetpointOutOfRange {
                setpoint,
                min: self.min,
                max: self.max,
            })
        }
    }
}

impl Default for SetpointRange {
    fn default() -> Self {
        Self {
            min: 10.0,
            max: 40.0,
        }
    }
}

/// Zone settings. Absent fields mean "not specified": defaults apply, and a
/// partial update leaves the current value alone (see [`ZoneSettings::merge`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ZoneSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setpoint: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voting: Option<bool>,
    /// Schedule changes are ignored while on hold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump_priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub economizer: Option<EconomizerSettings>,
}

impl ZoneSettings {
    /// Enabled, voting, not on hold, no dump priority.
    pub fn with_setpoint(setpoint: f64) -> Self {
        Self {
            enabled: Some(true),
            setpoint: Some(setpoint),
            voting: Some(true),
            hold: Some(false),
            dump_priority: Some(0),
            economizer: None,
        }
    }

    /// Fields present in `update` win.
    pub fn merge(&self, update: &ZoneSettings) -> ZoneSettings {
        ZoneSettings {
            enabled: update.enabled.or(self.enabled),
            setpoint: update.setpoint.or(self.setpoint),
            voting: update.voting.or(self.voting),
            hold: update.hold.or(self.hold),
            dump_priority: update.dump_priority.or(self.dump_priority),
            economizer: update.economizer.clone().or_else(|| self.economizer.clone()),
        }
    }

    /// Same user visible settings; hold and dump priority are ignored.
    pub fn same(&self, other: &ZoneSettings) -> bool {
        self.enabled == other.enabled
            && self.setpoint == other.setpoint
            && self.voting == other.voting
            && self.economizer == other.economizer
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn is_voting(&self) -> bool {
        self.voting.unwrap_or(true)
    }

    pub fn is_on_hold(&self) -> bool {
        self.hold.unwrap_or(false)
    }

    pub fn dump_priority(&self) -> i32 {
        self.dump_priority.unwrap_or(0)
    }
}

/// Settings handed down by a schedule for the active period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PeriodSettings {
    pub period: String,
    pub settings: ZoneSettings,
}
