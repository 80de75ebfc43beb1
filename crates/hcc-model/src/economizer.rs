//! Economizer: use outdoor air instead of the HVAC when it is good enough.
//!
//! The economizer watches the indoor temperature of its zone and an ambient
//! (outdoor) temperature, derives a combined signal from the two and decides
//! whether its own HVAC device (a fan, a damper) should run. While it runs,
//! the zone's demand on the main unit is suppressed unless the settings ask
//! to keep the HVAC on.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use futures::StreamExt;
use hcc_controls::{
    Hysteresis, HysteresisController, HysteresisThresholds, Pid, PidController, PidGains,
};
use hcc_core::{Addressable, Flux, HvacCommand, HvacMode, Signal, Timestamp};
use hcc_devices::HvacDevice;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::{ModelError, ModelResult};
use crate::thermostat::CallingStatus;
use crate::zone::ZoneStatus;

/// Sensors may report as rarely as once a minute; anything older than this is stale.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

/// Renderer dead band half-width for the PID strategy.
const HYSTERESIS: f64 = 1.0;

fn default_p() -> f64 {
    1.0
}

fn default_i() -> f64 {
    0.000004
}

fn default_saturation_limit() -> f64 {
    1.1
}

/// How the combined signal becomes an on/off decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EconomizerStrategy {
    /// On while the combined signal is positive.
    Simple,
    /// Combined signal through a PID and a ±1 hysteresis renderer.
    #[default]
    Pid,
}

impl fmt::Display for EconomizerStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EconomizerStrategy::Simple => "simple",
            EconomizerStrategy::Pid => "pid",
        })
    }
}

impl FromStr for EconomizerStrategy {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(EconomizerStrategy::Simple),
            "pid" => Ok(EconomizerStrategy::Pid),
            other => Err(ModelError::Unknown {
                what: "economizer strategy",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EconomizerSettings {
    pub mode: HvacMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// How much better the ambient air must be before it is worth using.
    pub changeover_delta: f64,
    /// Indoor temperature at which the economizer backs off.
    pub target_temperature: f64,
    /// Keep the main unit running while the economizer is on.
    #[serde(default)]
    pub keep_hvac_on: bool,
    #[serde(default = "default_p")]
    pub p: f64,
    #[serde(default = "default_i")]
    pub i: f64,
    #[serde(default = "default_saturation_limit")]
    pub saturation_limit: f64,
    #[serde(default)]
    pub strategy: EconomizerStrategy,
}

impl EconomizerSettings {
    pub fn new(mode: HvacMode, changeover_delta: f64, target_temperature: f64) -> ModelResult<Self> {
        let settings = Self {
            mode,
            enabled: Some(true),
            changeover_delta,
            target_temperature,
            keep_hvac_on: false,
            p: default_p(),
            i: default_i(),
            saturation_limit: default_saturation_limit(),
            strategy: EconomizerStrategy::default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn with_strategy(mut self, strategy: EconomizerStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_keep_hvac_on(mut self, keep_hvac_on: bool) -> Self {
        self.keep_hvac_on = keep_hvac_on;
        self
    }

    pub fn validate(&self) -> ModelResult<()> {
        if self.mode == HvacMode::Off {
            return Err(ModelError::InvalidArg {
                what: "economizer mode can't be off",
            });
        }
        if !self.changeover_delta.is_finite() || self.changeover_delta < 0.0 {
            return Err(ModelError::InvalidArg {
                what: "changeover delta must be finite and non-negative",
            });
        }
        if !self.target_temperature.is_finite() {
            return Err(ModelError::InvalidArg {
                what: "target temperature must be finite",
            });
        }
        self.gains()?;
        Ok(())
    }

    pub fn gains(&self) -> ModelResult<PidGains> {
        Ok(PidGains::new(self.p, self.i, 0.0, self.saturation_limit)?)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Only the user adjustable part (enabled flag, delta, target) is taken
    /// from `update`. Mode, gains and strategy are fixed at construction.
    pub fn merge(&self, update: &EconomizerSettings) -> EconomizerSettings {
        EconomizerSettings {
            enabled: update.enabled.or(self.enabled),
            changeover_delta: update.changeover_delta,
            target_temperature: update.target_temperature,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EconomizerState {
    Off,
    /// Running, main unit suppressed.
    On,
    /// Running, main unit left alone.
    Hold,
}

impl EconomizerState {
    pub fn is_active(self) -> bool {
        self != EconomizerState::Off
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EconomizerStatus {
    pub settings: EconomizerSettings,
    pub ambient: Option<Signal<f64>>,
    /// Combined signal, absent when there was nothing to combine.
    pub sample: Option<f64>,
    pub demand: f64,
    pub state: EconomizerState,
    pub calling: bool,
    pub uptime: Option<Duration>,
}

/// Positive when the ambient air helps, adjusted down as the indoor
/// temperature approaches the target.
pub fn combined_signal(mode: HvacMode, delta: f64, target: f64, indoor: f64, ambient: f64) -> f64 {
    let (ambient_delta, target_delta) = if mode == HvacMode::Cooling {
        (indoor - (ambient + delta), indoor - target)
    } else {
        (ambient - (indoor + delta), target - indoor)
    };

    let adjustment = if target_delta > delta || ambient_delta < 0.0 {
        0.0
    } else if delta == 0.0 {
        ambient_delta
    } else {
        let k = (delta - target_delta) / delta;
        ambient_delta * k
    };

    ambient_delta - adjustment
}

enum Decider {
    Simple,
    Pid {
        controller: PidController,
        renderer: HysteresisController,
    },
}

impl Decider {
    fn new(name: &str, settings: &EconomizerSettings) -> ModelResult<Self> {
        Ok(match settings.strategy {
            EconomizerStrategy::Simple => Decider::Simple,
            EconomizerStrategy::Pid => Decider::Pid {
                controller: PidController::new(
                    format!("(controller) {name}"),
                    0.0,
                    Pid::new(settings.gains()?),
                )?,
                renderer: HysteresisController::new(
                    format!("(renderer) {name}"),
                    0.0,
                    Hysteresis::new(HysteresisThresholds::symmetric(HYSTERESIS)?),
                )?,
            },
        })
    }

    /// On/off and the demand behind it.
    fn decide(&self, combined: &Signal<f64>) -> (bool, f64) {
        let value = combined.value().copied().unwrap_or(0.0);
        match self {
            Decider::Simple => (value > 0.0, value),
            Decider::Pid {
                controller,
                renderer,
            } => {
                let control = controller.step(combined);
                let Some(signal) = control.value().map(|s| s.signal) else {
                    return (self.force_off(combined.timestamp()), 0.0);
                };
                let rendered = renderer.step(&control.derive(signal));
                let on = rendered.value().is_some_and(|r| r.signal == 1.0);
                (on, signal)
            }
        }
    }

    /// Drive the renderer to off without touching the PID state.
    fn force_off(&self, timestamp: Timestamp) -> bool {
        if let Decider::Pid { renderer, .. } = self {
            renderer.step(&Signal::new(timestamp, -1.0));
        }
        false
    }

    fn reset(&self) {
        if let Decider::Pid {
            controller,
            renderer,
        } = self
        {
            controller.configure(Pid::reset);
            renderer.configure(Hysteresis::reset);
        }
    }
}

enum Assessment {
    Disabled,
    Unusable(&'static str),
    Stale,
    Ready(Signal<f64>),
}

struct Core {
    settings: EconomizerSettings,
    decider: Decider,
    indoor: Option<Signal<f64, String>>,
    ambient: Option<Signal<f64>>,
    state: Option<EconomizerState>,
    status: EconomizerStatus,
}

impl Core {
    fn assess(&self, now: Timestamp, timeout: TimeDelta) -> Assessment {
        if !self.settings.is_enabled() {
            return Assessment::Disabled;
        }
        let (Some(indoor), Some(ambient)) = (&self.indoor, &self.ambient) else {
            return Assessment::Unusable("incomplete");
        };
        let (Some(&inside), Some(&outside)) = (indoor.value(), ambient.value()) else {
            return Assessment::Unusable("no value");
        };
        if indoor.is_error() || ambient.is_error() {
            return Assessment::Unusable("error signals");
        }
        let stale = now - timeout;
        if indoor.timestamp() < stale || ambient.timestamp() < stale {
            return Assessment::Stale;
        }

        let settings = &self.settings;
        let combined = combined_signal(
            settings.mode,
            settings.changeover_delta,
            settings.target_temperature,
            inside,
            outside,
        );
        let timestamp = indoor.timestamp().max(ambient.timestamp());
        Assessment::Ready(Signal::new(timestamp, combined))
    }
}

struct Inner {
    name: String,
    device: Arc<dyn HvacDevice>,
    timeout: TimeDelta,
    core: Mutex<Core>,
    commands: Mutex<Option<mpsc::UnboundedSender<Signal<HvacCommand>>>>,
    drain: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl Inner {
    fn evaluate(&self) -> EconomizerState {
        let now = Utc::now();
        let mut core = self.core.lock();

        let (on, sample, demand) = match core.assess(now, self.timeout) {
            Assessment::Disabled => {
                trace!(economizer = %self.name, "disabled");
                core.decider.reset();
                (false, Some(0.0), 0.0)
            }
            Assessment::Unusable(why) => {
                debug!(economizer = %self.name, why, "can't compute, forcing off");
                (core.decider.force_off(now), None, 0.0)
            }
            Assessment::Stale => {
                error!(economizer = %self.name, indoor = ?core.indoor, ambient = ?core.ambient, "stale signals, resetting");
                core.indoor = None;
                core.ambient = None;
                core.decider.reset();
                (false, None, 0.0)
            }
            Assessment::Ready(combined) => {
                let (on, demand) = core.decider.decide(&combined);
                trace!(economizer = %self.name, ?combined, on, demand, "decided");
                (on, combined.value().copied(), demand)
            }
        };

        let state = match (on, core.settings.keep_hvac_on) {
            (false, _) => EconomizerState::Off,
            (true, false) => EconomizerState::On,
            (true, true) => EconomizerState::Hold,
        };
        if core.state != Some(state) {
            info!(economizer = %self.name, from = ?core.state, to = ?state, "state change");
            core.state = Some(state);
        }
        core.status = EconomizerStatus {
            settings: core.settings.clone(),
            ambient: core.ambient.clone(),
            sample,
            demand,
            state,
            calling: on,
            uptime: self.device.uptime(),
        };
        let mode = core.settings.mode;
        drop(core);

        self.send(mode, on);
        state
    }

    fn send(&self, mode: HvacMode, on: bool) {
        let ctl = if on { 1.0 } else { 0.0 };
        let command = HvacCommand {
            mode: Some(mode),
            demand: Some(ctl),
            fan_speed: Some(ctl),
        };
        trace!(economizer = %self.name, ?command, "device command");
        if let Some(tx) = self.commands.lock().as_ref() {
            if tx.send(Signal::new(Utc::now(), command)).is_err() {
                warn!(economizer = %self.name, "device pipeline is gone");
            }
        }
    }
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Economizer {
    inner: Arc<Inner>,
}

impl Economizer {
    /// The device must support the economizer mode. Spawns the device pipeline.
    pub fn new(
        name: impl Into<String>,
        settings: EconomizerSettings,
        device: Arc<dyn HvacDevice>,
        timeout: Duration,
    ) -> ModelResult<Self> {
        let name = name.into();
        settings.validate()?;
        if !device.supports(settings.mode) {
            return Err(ModelError::UnsupportedMode {
                entity: device.address().to_string(),
                mode: settings.mode,
            });
        }
        let timeout = TimeDelta::from_std(timeout).map_err(|_| ModelError::InvalidArg {
            what: "economizer timeout is too large",
        })?;

        let decider = Decider::new(&name, &settings)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut statuses = device
            .clone()
            .compute(UnboundedReceiverStream::new(rx).boxed());
        let stage = name.clone();
        let drain = tokio::spawn(async move {
            while let Some(status) = statuses.next().await {
                debug!(economizer = %stage, ?status, "HVAC device status");
            }
            debug!(economizer = %stage, "HVAC device pipeline complete");
        });

        let status = EconomizerStatus {
            settings: settings.clone(),
            ambient: None,
            sample: None,
            demand: 0.0,
            state: EconomizerState::Off,
            calling: false,
            uptime: None,
        };
        info!(economizer = %name, device = %device.address(), ?settings, "created");
        Ok(Self {
            inner: Arc::new(Inner {
                core: Mutex::new(Core {
                    settings,
                    decider,
                    indoor: None,
                    ambient: None,
                    state: None,
                    status,
                }),
                name,
                device,
                timeout,
                commands: Mutex::new(Some(tx)),
                drain: Mutex::new(Some(drain)),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    /// Feed ambient readings from `ambient` until it completes or the
    /// economizer is closed.
    pub fn connect_ambient(&self, mut ambient: Flux<f64>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    next = ambient.next() => {
                        let Some(signal) = next else {
                            debug!(economizer = %inner.name, "ambient flux complete");
                            break;
                        };
                        inner.core.lock().ambient = Some(signal);
                        inner.evaluate();
                    }
                }
            }
        });
    }

    pub fn observe_ambient(&self, signal: Signal<f64>) -> EconomizerState {
        self.inner.core.lock().ambient = Some(signal);
        self.inner.evaluate()
    }

    pub fn observe_indoor(&self, signal: &Signal<f64, String>) -> EconomizerState {
        self.inner.core.lock().indoor = Some(signal.clone());
        self.inner.evaluate()
    }

    /// Apply a partial update and re-evaluate with what is already known.
    pub fn set_settings(&self, update: &EconomizerSettings) -> ModelResult<EconomizerSettings> {
        let merged = {
            let mut core = self.inner.core.lock();
            let merged = core.settings.merge(update);
            merged.validate()?;
            core.settings = merged.clone();
            merged
        };
        info!(economizer = %self.inner.name, settings = ?merged, "settings changed");
        self.inner.evaluate();
        Ok(merged)
    }

    pub fn settings(&self) -> EconomizerSettings {
        self.inner.core.lock().settings.clone()
    }

    pub fn state(&self) -> EconomizerState {
        self.inner.core.lock().state.unwrap_or(EconomizerState::Off)
    }

    pub fn status(&self) -> EconomizerStatus {
        self.inner.core.lock().status.clone()
    }

    /// Attach the economizer status to a zone status, and take the zone's
    /// demand away while the economizer runs in place of the main unit.
    pub fn suppress(&self, signal: Signal<ZoneStatus, String>) -> Signal<ZoneStatus, String> {
        if signal.is_error() {
            trace!(economizer = %self.inner.name, "error signal passed through");
            return signal;
        }
        let (status, state) = {
            let core = self.inner.core.lock();
            (core.status.clone(), core.state)
        };
        signal.map(|mut zone| {
            zone.economizer = Some(status);
            if state == Some(EconomizerState::On) {
                zone.calling = CallingStatus::idle();
            }
            zone
        })
    }

    /// Turn the device off and wait for its pipeline to finish. Idempotent.
    pub async fn close(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        info!(economizer = %self.inner.name, "shutting down");
        self.inner.shutdown.cancel();
        let mode = self.inner.core.lock().settings.mode;
        self.inner.send(mode, false);
        self.inner.commands.lock().take();

        let drain = self.inner.drain.lock().take();
        if let Some(drain) = drain {
            if let Err(err) = drain.await {
                warn!(economizer = %self.inner.name, %err, "device pipeline ended abnormally");
            }
        }
        info!(economizer = %self.inner.name, "shut down");
    }
}

impl Addressable for Economizer {
    fn address(&self) -> &str {
        &self.inner.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcc_core::{SignalError, Tolerances, nearly_equal};
    use hcc_devices::{CqrsDevice, Switch, SwitchConfig, SwitchableHvacDevice};

    fn close(a: f64, b: f64) -> bool {
        nearly_equal(a, b, Tolerances::default())
    }

    fn fan(mode: HvacMode) -> (Arc<Switch>, Arc<dyn HvacDevice>) {
        let (switch, _driver) = Switch::with_null_driver("fan-relay", SwitchConfig::default(), false);
        let switch = Arc::new(switch);
        let device = SwitchableHvacDevice::new("fan", mode, switch.clone(), false).unwrap();
        (switch, Arc::new(device))
    }

    fn indoor(value: f64) -> Signal<f64, String> {
        Signal::new(Utc::now(), value).with_payload("den".to_string())
    }

    fn ambient(value: f64) -> Signal<f64> {
        Signal::new(Utc::now(), value)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn combined_signal_far_from_target() {
        assert!(close(combined_signal(HvacMode::Cooling, 1.0, 22.0, 25.0, 15.0), 9.0));
        assert!(close(combined_signal(HvacMode::Heating, 1.0, 21.0, 18.0, 25.0), 6.0));
    }

    #[test]
    fn combined_signal_backs_off_near_target() {
        // k = 0.5, half of the ambient delta is taken away
        assert!(close(combined_signal(HvacMode::Cooling, 1.0, 22.0, 22.5, 15.0), 3.25));
        // past the target the signal turns negative
        assert!(combined_signal(HvacMode::Heating, 1.0, 21.0, 21.5, 25.0) < 0.0);
    }

    #[test]
    fn combined_signal_ambient_too_warm() {
        assert!(close(combined_signal(HvacMode::Cooling, 1.0, 22.0, 25.0, 30.0), -6.0));
        assert!(close(combined_signal(HvacMode::Cooling, 0.0, 22.0, 22.0, 15.0), 0.0));
    }

    #[test]
    fn settings_validation() {
        assert!(EconomizerSettings::new(HvacMode::Cooling, 1.0, 22.0).is_ok());
        assert!(EconomizerSettings::new(HvacMode::Cooling, -1.0, 22.0).is_err());
        assert!(EconomizerSettings::new(HvacMode::Off, 1.0, 22.0).is_err());
        assert!(EconomizerSettings::new(HvacMode::Cooling, 1.0, f64::NAN).is_err());
    }

    #[test]
    fn merge_takes_only_user_fields() {
        let base = EconomizerSettings::new(HvacMode::Cooling, 1.0, 22.0)
            .unwrap()
            .with_keep_hvac_on(true);
        let update = EconomizerSettings {
            mode: HvacMode::Heating,
            enabled: Some(false),
            changeover_delta: 2.0,
            target_temperature: 21.0,
            keep_hvac_on: false,
            p: 5.0,
            i: 0.0,
            saturation_limit: 0.0,
            strategy: EconomizerStrategy::Simple,
        };
        let merged = base.merge(&update);
        assert_eq!(merged.mode, HvacMode::Cooling);
        assert!(!merged.is_enabled());
        assert_eq!(merged.changeover_delta, 2.0);
        assert_eq!(merged.target_temperature, 21.0);
        assert!(merged.keep_hvac_on);
        assert_eq!(merged.p, 1.0);
        assert_eq!(merged.strategy, EconomizerStrategy::Pid);
    }

    #[test]
    fn strategy_from_config_string() {
        assert_eq!("simple".parse::<EconomizerStrategy>().unwrap(), EconomizerStrategy::Simple);
        assert_eq!(" PID ".parse::<EconomizerStrategy>().unwrap(), EconomizerStrategy::Pid);
        assert!("fuzzy".parse::<EconomizerStrategy>().is_err());
    }

    #[test]
    fn yaml_defaults() {
        let settings: EconomizerSettings = serde_yaml::from_str(
            "mode: cooling\nchangeover-delta: 1.5\ntarget-temperature: 22\nstrategy: simple\n",
        )
        .unwrap();
        assert_eq!(settings.p, 1.0);
        assert_eq!(settings.i, 0.000004);
        assert_eq!(settings.saturation_limit, 1.1);
        assert!(!settings.keep_hvac_on);
        assert!(settings.is_enabled());
        assert_eq!(settings.strategy, EconomizerStrategy::Simple);
    }

    #[tokio::test]
    async fn device_must_support_the_mode() {
        let (_switch, device) = fan(HvacMode::Heating);
        let settings = EconomizerSettings::new(HvacMode::Cooling, 1.0, 22.0).unwrap();
        assert!(matches!(
            Economizer::new("eco", settings, device, DEFAULT_TIMEOUT),
            Err(ModelError::UnsupportedMode { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn simple_strategy_drives_the_device() {
        let (switch, device) = fan(HvacMode::Cooling);
        let settings = EconomizerSettings::new(HvacMode::Cooling, 1.0, 22.0)
            .unwrap()
            .with_strategy(EconomizerStrategy::Simple);
        let eco = Economizer::new("eco", settings, device, DEFAULT_TIMEOUT).unwrap();

        assert_eq!(eco.observe_indoor(&indoor(25.0)), EconomizerState::Off);
        assert_eq!(eco.observe_ambient(ambient(15.0)), EconomizerState::On);
        settle().await;
        assert_eq!(switch.state().requested, Some(true));
        let status = eco.status();
        assert!(status.calling);
        assert_eq!(status.sample, Some(9.0));

        assert_eq!(eco.observe_ambient(ambient(30.0)), EconomizerState::Off);
        settle().await;
        assert_eq!(switch.state().requested, Some(false));

        eco.close().await;
        eco.close().await;
        assert_eq!(switch.state().requested, Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_input_forces_off() {
        let (_switch, device) = fan(HvacMode::Cooling);
        let settings = EconomizerSettings::new(HvacMode::Cooling, 1.0, 22.0)
            .unwrap()
            .with_strategy(EconomizerStrategy::Simple);
        let eco = Economizer::new("eco", settings, device, DEFAULT_TIMEOUT).unwrap();
        eco.observe_indoor(&indoor(25.0));
        assert_eq!(eco.observe_ambient(ambient(15.0)), EconomizerState::On);

        let failed = Signal::failure(Utc::now(), SignalError::Sensor("unplugged".into()));
        assert_eq!(eco.observe_ambient(failed), EconomizerState::Off);
        assert_eq!(eco.status().sample, None);
        eco.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stale_input_forces_off() {
        let (_switch, device) = fan(HvacMode::Cooling);
        let settings = EconomizerSettings::new(HvacMode::Cooling, 1.0, 22.0)
            .unwrap()
            .with_strategy(EconomizerStrategy::Simple);
        let eco = Economizer::new("eco", settings, device, DEFAULT_TIMEOUT).unwrap();
        let old = Utc::now() - TimeDelta::seconds(120);
        eco.observe_indoor(&Signal::new(old, 25.0).with_payload("den".to_string()));
        assert_eq!(eco.observe_ambient(ambient(15.0)), EconomizerState::Off);
        eco.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_turns_it_off() {
        let (_switch, device) = fan(HvacMode::Cooling);
        let settings = EconomizerSettings::new(HvacMode::Cooling, 1.0, 22.0)
            .unwrap()
            .with_strategy(EconomizerStrategy::Simple);
        let eco = Economizer::new("eco", settings.clone(), device, DEFAULT_TIMEOUT).unwrap();
        eco.observe_indoor(&indoor(25.0));
        assert_eq!(eco.observe_ambient(ambient(15.0)), EconomizerState::On);

        let update = EconomizerSettings {
            enabled: Some(false),
            ..settings
        };
        eco.set_settings(&update).unwrap();
        assert_eq!(eco.state(), EconomizerState::Off);
        assert_eq!(eco.status().sample, Some(0.0));
        eco.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn keep_hvac_on_holds() {
        let (_switch, device) = fan(HvacMode::Cooling);
        let settings = EconomizerSettings::new(HvacMode::Cooling, 1.0, 22.0)
            .unwrap()
            .with_strategy(EconomizerStrategy::Simple)
            .with_keep_hvac_on(true);
        let eco = Economizer::new("eco", settings, device, DEFAULT_TIMEOUT).unwrap();
        eco.observe_indoor(&indoor(25.0));
        assert_eq!(eco.observe_ambient(ambient(15.0)), EconomizerState::Hold);
        eco.close().await;
    }
}
