//! Single switch, single mode unit: a window air conditioner, a boiler, a fan.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use futures::stream::BoxStream;
use hcc_core::flux::MULTICAST_CAPACITY;
use hcc_core::{Addressable, Flux, HvacCommand, HvacMode, Multicast, Pipeline, Signal};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{
    HvacDevice, HvacDeviceStatus, SingleModeUnit, StatusKind, Uptime, accept_single_mode,
    rejected, run_single_mode, wants_on,
};
use crate::cqrs::CqrsDevice;
use crate::error::{DeviceError, DeviceResult};
use crate::state::DeviceState;

pub struct SwitchableHvacDevice {
    id: String,
    modes: [HvacMode; 1],
    inverted: bool,
    switch: Arc<dyn CqrsDevice<bool>>,
    requested: Mutex<HvacCommand>,
    uptime: Uptime,
    status: Multicast<Signal<HvacDeviceStatus>>,
}

impl SwitchableHvacDevice {
    /// `inverted` switches are off when energized.
    pub fn new(
        id: impl Into<String>,
        mode: HvacMode,
        switch: Arc<dyn CqrsDevice<bool>>,
        inverted: bool,
    ) -> DeviceResult<Self> {
        let id = id.into();
        if mode == HvacMode::Off {
            return Err(DeviceError::UnsupportedMode { device: id, mode });
        }
        Ok(Self {
            id,
            modes: [mode],
            inverted,
            switch,
            requested: Mutex::new(HvacCommand::default()),
            uptime: Uptime::default(),
            status: Multicast::new(MULTICAST_CAPACITY),
        })
    }

    pub fn mode(&self) -> HvacMode {
        self.modes[0]
    }

    fn actual_of(&self, requested: HvacCommand, state: &DeviceState<bool>) -> Option<HvacCommand> {
        let on = state.actual? != self.inverted;
        Some(if on {
            requested
        } else {
            HvacCommand::shutdown().reconcile(&requested)
        })
    }
}

impl SingleModeUnit for SwitchableHvacDevice {
    type Feedback = Signal<DeviceState<bool>, String>;

    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> &Multicast<Signal<HvacDeviceStatus>> {
        &self.status
    }

    fn feedback(&self) -> BoxStream<'static, Self::Feedback> {
        self.switch.flux()
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

        let on = wants_on(&command);
        debug!(device = %self.id, on, inverted = self.inverted, "switching");
        let state = self.switch.set_state(on != self.inverted);
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
        let actual = self.actual_of(requested, state)?;
        let status = HvacDeviceStatus {
            kind: StatusKind::Actual,
            requested,
            actual: Some(actual),
            uptime: self.uptime.get(),
        };
        Some(match feedback.error() {
            Some(err) if feedback.is_error() => Signal::new(feedback.timestamp(), status).failed(err.clone()),
            Some(err) => Signal::new(feedback.timestamp(), status).degraded(err.clone()),
            None => Signal::new(feedback.timestamp(), status),
        })
    }

    fn shut_off(&self) -> Signal<HvacDeviceStatus> {
        let command = {
            let mut requested = self.requested.lock();
            *requested = HvacCommand::shutdown().reconcile(&requested);
            *requested
        };
        self.switch.set_state(self.inverted);
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

impl Addressable for SwitchableHvacDevice {
    fn address(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl HvacDevice for SwitchableHvacDevice {
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
        info!(device = %self.id, switch = %self.switch.address(), "shutting down");
        let last = self.shut_off();
        self.status.publish(last);
        self.status.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cqrs::{Switch, SwitchConfig};
    use hcc_core::SignalError;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    fn input() -> (mpsc::Sender<Signal<HvacCommand>>, Flux<HvacCommand>) {
        let (tx, rx) = mpsc::channel(8);
        (tx, ReceiverStream::new(rx).boxed())
    }

    fn demand(d: f64) -> HvacCommand {
        HvacCommand::new(None, Some(d), None).unwrap()
    }

    async fn send(tx: &mpsc::Sender<Signal<HvacCommand>>, command: HvacCommand) {
        tx.send(Signal::new(Utc::now(), command)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn switch_follows_demand() {
        let (switch, _driver) = Switch::with_null_driver("ac-relay", SwitchConfig::default(), false);
        let switch = Arc::new(switch);
        let unit = Arc::new(
            SwitchableHvacDevice::new("ac", HvacMode::Cooling, switch.clone(), false).unwrap(),
        );
        let (tx, flux) = input();
        let mut out = unit.clone().compute(flux);

        send(&tx, HvacCommand::mode_only(HvacMode::Cooling)).await;
        send(&tx, demand(0.8)).await;
        let first = out.next().await.unwrap();
        let status = first.value().unwrap();
        assert_eq!(status.kind, StatusKind::Requested);
        assert_eq!(status.requested.mode, Some(HvacMode::Cooling));
        assert_eq!(status.requested.demand, Some(0.8));
        assert_eq!(switch.state().requested, Some(true));
        assert!(unit.uptime().is_some());

        // input is done: unit shuts itself off
        drop(tx);
        let mut last = None;
        while let Some(signal) = out.next().await {
            last = Some(signal);
        }
        let last = last.unwrap();
        assert_eq!(last.value().unwrap().requested.demand, Some(0.0));
        assert_eq!(switch.state().requested, Some(false));
        assert!(unit.uptime().is_none());
    }

    #[tokio::test]
    async fn inverted_switch() {
        let (switch, _driver) = Switch::with_null_driver("relay", SwitchConfig::default(), true);
        let switch = Arc::new(switch);
        let unit = Arc::new(
            SwitchableHvacDevice::new("heater", HvacMode::Heating, switch.clone(), true).unwrap(),
        );
        let (tx, flux) = input();
        let mut out = unit.compute(flux);
        send(&tx, demand(1.0)).await;
        out.next().await.unwrap();
        assert_eq!(switch.state().requested, Some(false));
    }

    #[tokio::test]
    async fn foreign_mode_is_a_total_failure() {
        let (switch, _driver) = Switch::with_null_driver("relay", SwitchConfig::default(), false);
        let unit = Arc::new(
            SwitchableHvacDevice::new("heater", HvacMode::Heating, Arc::new(switch), false).unwrap(),
        );
        let (tx, flux) = input();
        let mut out = unit.compute(flux);
        send(&tx, HvacCommand::new(Some(HvacMode::Cooling), Some(1.0), None).unwrap()).await;
        let first = out.next().await.unwrap();
        assert!(first.is_error());
        assert!(matches!(first.error(), Some(SignalError::Invalid(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn actual_status_follows_switch_feedback() {
        let (switch, _driver) = Switch::with_null_driver("relay", SwitchConfig::default(), false);
        let unit = Arc::new(
            SwitchableHvacDevice::new("ac", HvacMode::Cooling, Arc::new(switch), false).unwrap(),
        );
        let (tx, flux) = input();
        let mut out = unit.compute(flux);
        send(&tx, demand(0.5)).await;

        let actual = loop {
            let signal = out.next().await.unwrap();
            let status = signal.value().unwrap().clone();
            if status.kind == StatusKind::Actual && status.actual.is_some_and(|a| a.is_on()) {
                break status;
            }
        };
        assert_eq!(actual.actual.unwrap().demand, Some(0.5));
    }

    #[tokio::test]
    async fn off_is_not_a_unit_mode() {
        let (switch, _driver) = Switch::with_null_driver("relay", SwitchConfig::default(), false);
        assert!(SwitchableHvacDevice::new("x", HvacMode::Off, Arc::new(switch), false).is_err());
    }

    #[tokio::test]
    async fn close_turns_the_switch_off() {
        let (switch, _driver) = Switch::with_null_driver("relay", SwitchConfig::default(), false);
        let switch = Arc::new(switch);
        let unit = SwitchableHvacDevice::new("fan", HvacMode::Cooling, switch.clone(), false).unwrap();
        let mut flux = unit.flux();
        unit.close().await;
        assert_eq!(switch.state().requested, Some(false));
        assert!(flux.next().await.is_some());
        assert!(flux.next().await.is_none());
    }
}
