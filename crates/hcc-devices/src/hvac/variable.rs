//! Single mode unit with one variable output actuator: a variable speed fan,
//! a whole house fan, a controllable radiant heater.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use hcc_core::flux::MULTICAST_CAPACITY;
use hcc_core::{Addressable, Flux, HvacCommand, HvacMode, Multicast, Pipeline, Signal};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::{
    HvacDevice, HvacDeviceStatus, SingleModeUnit, StatusKind, Uptime, accept_single_mode,
    rejected, run_single_mode,
};
use crate::cqrs::CqrsDevice;
use crate::error::{DeviceError, DeviceResult};
use crate::state::{DeviceState, OutputCommand};

pub const MAX_BAND_COUNT: u32 = 100;

/// Quantize `source` into `band_count` steps, rounding up. Zero bands means
/// no quantization.
pub fn band(source: f64, band_count: u32) -> DeviceResult<f64> {
    if !(0.0..=1.0).contains(&source) {
        return Err(DeviceError::OutOfRange {
            what: "band source",
            value: source,
        });
    }
    if band_count == 0 {
        return Ok(source);
    }
    let bands = f64::from(band_count);
    Ok((source * bands).ceil() / bands)
}

pub struct VariableHvacDevice {
    id: String,
    modes: [HvacMode; 1],
    actuator: Arc<dyn CqrsDevice<OutputCommand>>,
    max_power: f64,
    band_count: u32,
    requested: Mutex<HvacCommand>,
    uptime: Uptime,
    status: Multicast<Signal<HvacDeviceStatus>>,
}

impl VariableHvacDevice {
    pub fn new(
        id: impl Into<String>,
        mode: HvacMode,
        actuator: Arc<dyn CqrsDevice<OutputCommand>>,
        max_power: f64,
        band_count: u32,
    ) -> DeviceResult<Self> {
        let id = id.into();
        if mode == HvacMode::Off {
            return Err(DeviceError::UnsupportedMode { device: id, mode });
        }
        if !(0.0..=1.0).contains(&max_power) {
            return Err(DeviceError::OutOfRange {
                what: "max_power",
                value: max_power,
            });
        }
        if band_count > MAX_BAND_COUNT {
            return Err(DeviceError::OutOfRange {
                what: "band_count",
                value: f64::from(band_count),
            });
        }
        debug!(device = %id, max_power, band_count, "created");
        Ok(Self {
            id,
            modes: [mode],
            actuator,
            max_power,
            band_count,
            requested: Mutex::new(HvacCommand::default()),
            uptime: Uptime::default(),
            status: Multicast::new(MULTICAST_CAPACITY),
        })
    }

    pub fn mode(&self) -> HvacMode {
        self.modes[0]
    }

    pub fn max_power(&self) -> f64 {
        self.max_power
    }

    pub fn band_count(&self) -> u32 {
        self.band_count
    }

    /// Scale the actuator state back into the command it satisfies.
    fn actual_of(&self, requested: HvacCommand, state: &DeviceState<OutputCommand>) -> Option<HvacCommand> {
        let output = state.actual?;
        if !output.on {
            return Some(HvacCommand::shutdown().reconcile(&requested));
        }
        Some(requested)
    }
}

impl SingleModeUnit for VariableHvacDevice {
    type Feedback = Signal<DeviceState<OutputCommand>, String>;

    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> &Multicast<Signal<HvacDeviceStatus>> {
        &self.status
    }

    fn feedback(&self) -> BoxStream<'static, Self::Feedback> {
        self.actuator.flux()
    }

    fn apply(&self, signal: Signal<HvacCommand>) -> Option<Signal<HvacDeviceStatus>> {
        if signal.is_error() {
            warn!(device = %self.id, error = ?signal.error(), "failed command signal ignored");
            return Some(signal.propagate_failure());
        }
        let command = *signal.value()?;
        let command = match accept_single_mode(&self.id, self.mode(), &self.requested, command) {
            Ok(Some(command)) => command,
            Ok(None) => return None,
            Err(err) => return Some(rejected(&self.id, &signal, err)),
        };

        let source = command
            .demand
            .unwrap_or(0.0)
            .max(command.fan_speed.unwrap_or(0.0));
        let output = match band(source, self.band_count) {
            Ok(output) => output,
            Err(err) => {
                return Some(rejected(
                    &self.id,
                    &signal,
                    hcc_core::SignalError::Invalid(err.to_string()),
                ));
            }
        };
        let scaled = output * self.max_power;
        let on = output != 0.0;
        trace!(device = %self.id, on, output, bands = self.band_count, scaled, "output");

        let state = self.actuator.set_state(OutputCommand { on, output: scaled });
        self.uptime.set(on);
        Some(signal.derive(HvacDeviceStatus {
            kind: StatusKind::Requested,
            requested: command,
            actual: self.actual_of(command, &state),
            uptime: self.uptime.get(),
        }))
    }

    fn observe(&self, feedback: Self::Feedback) -> Option<Signal<HvacDeviceStatus>> {
        let state = feedback.value()?;
        let requested = *self.requested.lock();
        let status = HvacDeviceStatus {
            kind: StatusKind::Actual,
            requested,
            actual: Some(self.actual_of(requested, state)?),
            uptime: self.uptime.get(),
        };
        let signal = Signal::new(feedback.timestamp(), status);
        Some(match feedback.error() {
            Some(err) if feedback.is_error() => signal.failed(err.clone()),
            Some(err) => signal.degraded(err.clone()),
            None => signal,
        })
    }

    fn shut_off(&self) -> Signal<HvacDeviceStatus> {
        let command = {
            let mut requested = self.requested.lock();
            *requested = HvacCommand::shutdown().reconcile(&requested);
            *requested
        };
        self.actuator.set_state(OutputCommand::off());
        self.uptime.set(false);
        Signal::new(
            Utc::now(),
            HvacDeviceStatus {
                kind: StatusKind::Requested,
                requested: command,
                actual: None,
                uptime: None,
            },
        )
    }
}

impl Addressable for VariableHvacDevice {
    fn address(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl HvacDevice for VariableHvacDevice {
    fn modes(&self) -> &[HvacMode] {
        &self.modes
    }

    fn compute(self: Arc<Self>, input: Flux<HvacCommand>) -> Pipeline<Signal<HvacDeviceStatus>> {
        run_single_mode(self, input)
    }

    fn flux(&self) -> Flux<HvacDeviceStatus> {
        self.status.subscribe()
    }

    fn uptime(&self) -> Option<Duration> {
        self.uptime.get()
    }

    async fn close(&self) {
        info!(device = %self.id, actuator = %self.actuator.address(), "shutting down");
        let last = self.shut_off();
        self.status.publish(last);
        self.status.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cqrs::{ManagedDevice, SwitchConfig};
    use futures::StreamExt;
    use hcc_core::{Tolerances, nearly_equal};
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    #[test]
    fn band_rounds_up() {
        assert_eq!(band(0.0, 10).unwrap(), 0.0);
        assert_eq!(band(1.0, 10).unwrap(), 1.0);
        assert!(nearly_equal(band(0.31, 10).unwrap(), 0.4, Tolerances::default()));
        assert!(nearly_equal(band(0.05, 4).unwrap(), 0.25, Tolerances::default()));
        assert_eq!(band(0.37, 0).unwrap(), 0.37);
    }

    #[test]
    fn band_rejects_out_of_range_source() {
        assert!(band(-0.1, 10).is_err());
        assert!(band(1.1, 10).is_err());
    }

    #[tokio::test]
    async fn construction_limits() {
        let (actuator, _driver) =
            ManagedDevice::with_null_driver("fan", SwitchConfig::default(), OutputCommand::off());
        let actuator: Arc<dyn CqrsDevice<OutputCommand>> = Arc::new(actuator);
        assert!(VariableHvacDevice::new("v", HvacMode::Cooling, actuator.clone(), 1.5, 10).is_err());
        assert!(VariableHvacDevice::new("v", HvacMode::Cooling, actuator.clone(), 0.8, 101).is_err());
        assert!(VariableHvacDevice::new("v", HvacMode::Off, actuator.clone(), 0.8, 10).is_err());
        assert!(VariableHvacDevice::new("v", HvacMode::Cooling, actuator, 0.8, 100).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn output_is_banded_and_scaled() {
        let (actuator, _driver) =
            ManagedDevice::with_null_driver("fan", SwitchConfig::default(), OutputCommand::off());
        let actuator = Arc::new(actuator);
        let unit = Arc::new(
            VariableHvacDevice::new("whf", HvacMode::Cooling, actuator.clone(), 0.5, 4).unwrap(),
        );
        let (tx, rx) = mpsc::channel(8);
        let mut out = unit.clone().compute(ReceiverStream::new(rx).boxed());

        let command = HvacCommand::new(None, Some(0.3), Some(0.6)).unwrap();
        tx.send(Signal::new(Utc::now(), command)).await.unwrap();
        let first = out.next().await.unwrap();
        assert_eq!(first.value().unwrap().kind, StatusKind::Requested);

        // max(0.3, 0.6) = 0.6 -> 0.75 in quarters -> 0.375 at half power
        let requested = actuator.state().requested.unwrap();
        assert!(requested.on);
        assert!(nearly_equal(requested.output, 0.375, Tolerances::default()));
        assert!(unit.uptime().is_some());

        drop(tx);
        while out.next().await.is_some() {}
        assert_eq!(actuator.state().requested, Some(OutputCommand::off()));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_demand_turns_the_actuator_off() {
        let (actuator, _driver) =
            ManagedDevice::with_null_driver("fan", SwitchConfig::default(), OutputCommand::off());
        let actuator = Arc::new(actuator);
        let unit = Arc::new(
            VariableHvacDevice::new("whf", HvacMode::Cooling, actuator.clone(), 1.0, 0).unwrap(),
        );
        let (tx, rx) = mpsc::channel(8);
        let mut out = unit.compute(ReceiverStream::new(rx).boxed());

        let command = HvacCommand::new(None, Some(0.0), Some(0.0)).unwrap();
        tx.send(Signal::new(Utc::now(), command)).await.unwrap();
        out.next().await.unwrap();
        let requested = actuator.state().requested.unwrap();
        assert!(!requested.on);
        assert_eq!(requested.output, 0.0);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn band_rounds_up_to_a_step(source in 0.0f64..=1.0, bands in 1u32..=MAX_BAND_COUNT) {
            let banded = band(source, bands).unwrap();
            let step = 1.0 / f64::from(bands);
            prop_assert!(banded + 1e-12 >= source);
            prop_assert!(banded <= 1.0 + 1e-12);
            prop_assert!(banded - source < step + 1e-12);
        }
    }
}
