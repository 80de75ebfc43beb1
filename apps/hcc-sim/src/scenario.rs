//! Scenario file: what to build and which sensor readings to play.

use std::collections::BTreeSet;
use std::path::Path;

use hcc_controls::PidGains;
use hcc_core::HvacMode;
use hcc_devices::{HvacDeviceKind, Reversal};
use hcc_model::{EconomizerSettings, ZoneSettings};
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};

fn default_settle_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Scenario {
    pub unit: UnitConfig,
    pub zones: Vec<ZoneConfig>,
    #[serde(default)]
    pub readings: Vec<Reading>,
    /// How long to keep running after the last reading.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UnitConfig {
    pub name: String,
    pub mode: HvacMode,
    pub device: DeviceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceConfig {
    pub id: String,
    pub kind: HvacDeviceKind,
    /// Single mode kinds only.
    #[serde(default)]
    pub mode: Option<HvacMode>,
    #[serde(default)]
    pub inverted: bool,
    #[serde(default)]
    pub reversal: Reversal,
    #[serde(default)]
    pub max_power: Option<f64>,
    #[serde(default)]
    pub band_count: Option<u32>,
    #[serde(default)]
    pub mode_change_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ZoneConfig {
    pub name: String,
    pub sensor: String,
    pub setpoint: f64,
    /// Defaults to the unit mode.
    #[serde(default)]
    pub mode: Option<HvacMode>,
    pub gains: PidGains,
    #[serde(default)]
    pub settings: ZoneSettings,
    #[serde(default)]
    pub economizer: Option<EconomizerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EconomizerConfig {
    pub device: DeviceConfig,
    pub ambient_sensor: String,
    pub settings: EconomizerSettings,
}

/// One scripted sensor sample. No value means the sensor fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Reading {
    pub at_ms: u64,
    pub sensor: String,
    #[serde(default)]
    pub value: Option<f64>,
}

impl Scenario {
    pub fn load(path: &Path) -> SimResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> SimResult<Self> {
        let scenario: Scenario = serde_yaml::from_str(text)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Cross references only; each entity validates itself on construction.
    pub fn validate(&self) -> SimResult<()> {
        if self.zones.is_empty() {
            return Err(SimError::Invalid("no zones".into()));
        }

        let mut zones = BTreeSet::new();
        let mut devices = BTreeSet::from([self.unit.device.id.as_str()]);
        let mut sensors = BTreeSet::new();
        for zone in &self.zones {
            if !zones.insert(zone.name.as_str()) {
                return Err(SimError::Invalid(format!("duplicate zone {}", zone.name)));
            }
            sensors.insert(zone.sensor.as_str());
            if let Some(economizer) = &zone.economizer {
                if !devices.insert(economizer.device.id.as_str()) {
                    return Err(SimError::Invalid(format!(
                        "duplicate device {}",
                        economizer.device.id
                    )));
                }
                sensors.insert(economizer.ambient_sensor.as_str());
            }
        }

        if let Some(reading) = self
            .readings
            .iter()
            .find(|r| !sensors.contains(r.sensor.as_str()))
        {
            return Err(SimError::Invalid(format!(
                "reading at {}ms is for unknown sensor {}",
                reading.at_ms, reading.sensor
            )));
        }
        Ok(())
    }

    /// Every sensor address the scenario refers to.
    pub fn sensors(&self) -> BTreeSet<String> {
        let mut sensors = BTreeSet::new();
        for zone in &self.zones {
            sensors.insert(zone.sensor.clone());
            if let Some(economizer) = &zone.economizer {
                sensors.insert(economizer.ambient_sensor.clone());
            }
        }
        sensors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_ZONES: &str = include_str!("../scenarios/two-zones.yaml");

    #[test]
    fn bundled_scenario_is_valid() {
        let scenario = Scenario::parse(TWO_ZONES).unwrap();
        assert_eq!(scenario.zones.len(), 2);
        assert_eq!(scenario.unit.device.kind, HvacDeviceKind::HeatPump);
        assert!(scenario.sensors().contains("outdoor"));
        let den = &scenario.zones[0];
        assert!(den.economizer.is_some());
        assert_eq!(den.settings.dump_priority(), 1);
    }

    #[test]
    fn unknown_sensor_is_refused() {
        let text = r#"
unit:
  name: main
  mode: cooling
  device: { id: ac, kind: switchable, mode: cooling }
zones:
  - name: den
    sensor: den-temp
    setpoint: 22
    gains: { p: 1, i: 0, d: 0, saturation_limit: 0 }
readings:
  - { at-ms: 0, sensor: attic-temp, value: 30 }
"#;
        assert!(matches!(Scenario::parse(text), Err(SimError::Invalid(_))));
    }

    #[test]
    fn duplicate_zone_is_refused() {
        let text = r#"
unit:
  name: main
  mode: heating
  device: { id: boiler, kind: switchable, mode: heating }
zones:
  - { name: den, sensor: a, setpoint: 20, gains: { p: 1, i: 0, d: 0, saturation_limit: 0 } }
  - { name: den, sensor: b, setpoint: 20, gains: { p: 1, i: 0, d: 0, saturation_limit: 0 } }
"#;
        assert!(Scenario::parse(text).is_err());
    }
}
