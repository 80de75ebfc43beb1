//! Thermostat: a PID controller followed by a hysteresis renderer.
//!
//! The PID output is a continuous "how badly do we need it" signal; the
//! renderer turns it into calling/not calling with a fixed ±1 dead band, so
//! sensitivity is tuned through the PID gains alone. Gains are given as
//! magnitudes, the operating mode supplies the sign.

use std::sync::Arc;

use hcc_controls::{
    Hysteresis, HysteresisController, HysteresisThresholds, Pid, PidController, PidGains, Status,
};
use hcc_core::{Addressable, Flux, HvacMode, Pipeline, Signal};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, trace};

use crate::error::{ModelError, ModelResult};
use crate::settings::SetpointRange;

/// Renderer dead band half-width. Tune the PID instead of this.
const HYSTERESIS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CallingStatus {
    /// Control signal fed to the renderer, absent when nothing was computed.
    pub sample: Option<f64>,
    pub demand: f64,
    pub calling: bool,
}

impl CallingStatus {
    /// Not calling, no demand.
    pub fn idle() -> Self {
        Self {
            sample: None,
            demand: 0.0,
            calling: false,
        }
    }
}

pub struct Thermostat {
    name: String,
    range: SetpointRange,
    gains: PidGains,
    mode: Mutex<HvacMode>,
    controller: PidController,
    renderer: HysteresisController,
}

impl Thermostat {
    /// Default 10..40 setpoint range.
    pub fn new(
        name: impl Into<String>,
        mode: HvacMode,
        setpoint: f64,
        gains: PidGains,
    ) -> ModelResult<Self> {
        Self::with_range(name, mode, SetpointRange::default(), setpoint, gains)
    }

    pub fn with_range(
        name: impl Into<String>,
        mode: HvacMode,
        range: SetpointRange,
        setpoint: f64,
        gains: PidGains,
    ) -> ModelResult<Self> {
        let name = name.into();
        check_mode(&name, mode)?;
        range.check(setpoint)?;
        let controller = PidController::new(
            format!("(controller) {name}"),
            setpoint,
            Pid::new(gains.scaled(mode.sign())),
        )?;
        let renderer = HysteresisController::new(
            format!("(renderer) {name}"),
            0.0,
            Hysteresis::new(HysteresisThresholds::symmetric(HYSTERESIS)?),
        )?;
        Ok(Self {
            name,
            range,
            gains,
            mode: Mutex::new(mode),
            controller,
            renderer,
        })
    }

    pub fn setpoint(&self) -> f64 {
        self.controller.setpoint()
    }

    pub fn setpoint_range(&self) -> SetpointRange {
        self.range
    }

    pub fn set_setpoint(&self, setpoint: f64) -> ModelResult<()> {
        self.range.check(setpoint)?;
        self.controller.set_setpoint(setpoint)?;
        info!(thermostat = %self.name, setpoint, "setpoint set");
        Ok(())
    }

    pub fn mode(&self) -> HvacMode {
        *self.mode.lock()
    }

    /// Flip the PID polarity. Both controllers start over.
    pub fn set_mode(&self, mode: HvacMode) -> ModelResult<()> {
        check_mode(&self.name, mode)?;
        let mut current = self.mode.lock();
        if *current == mode {
            return Ok(());
        }
        let gains = self.gains.scaled(mode.sign());
        self.controller.configure(|pid| pid.set_gains(gains));
        self.renderer.configure(Hysteresis::reset);
        info!(thermostat = %self.name, from = %*current, to = %mode, "mode changed");
        *current = mode;
        Ok(())
    }

    /// Gains as given, without the mode sign.
    pub fn gains(&self) -> PidGains {
        self.gains
    }

    /// One sensor sample through both controllers.
    pub fn step<P: Clone>(&self, signal: &Signal<f64, P>) -> Signal<Status<CallingStatus>, P> {
        let control = self.controller.step(signal);
        trace!(thermostat = %self.name, status = ?control.status(), value = ?control.value(), "controller");
        let Some(&status) = control.value().filter(|_| !control.is_error()) else {
            return control.propagate_failure();
        };

        let rendered = self.renderer.step(&control.derive(status.signal));
        trace!(thermostat = %self.name, value = ?rendered.value(), "renderer");
        let calling = rendered.value().is_some_and(|r| r.signal > 0.0);
        let thresholds = self.renderer.inspect(|h| h.thresholds());

        rendered.derive(Status {
            setpoint: status.setpoint,
            error: status.error,
            signal: CallingStatus {
                sample: Some(status.signal),
                demand: demand(status.signal, thresholds),
                calling,
            },
        })
    }

    pub fn compute<P>(
        self: &Arc<Self>,
        input: Flux<f64, P>,
    ) -> Pipeline<Signal<Status<CallingStatus>, P>>
    where
        P: Clone + Send + Sync + 'static,
    {
        let this = self.clone();
        Pipeline::map(&self.name, input, move |signal| Some(this.step(&signal)))
    }
}

impl Addressable for Thermostat {
    fn address(&self) -> &str {
        &self.name
    }
}

/// Position of the control signal across the dead band, in `[0, 1]`.
fn demand(signal: f64, thresholds: HysteresisThresholds) -> f64 {
    ((signal - thresholds.low) / (thresholds.high - thresholds.low)).clamp(0.0, 1.0)
}

fn check_mode(name: &str, mode: HvacMode) -> ModelResult<()> {
    if mode == HvacMode::Off {
        return Err(ModelError::UnsupportedMode {
            entity: name.to_string(),
            mode,
        });
    }
    Ok(())
}
