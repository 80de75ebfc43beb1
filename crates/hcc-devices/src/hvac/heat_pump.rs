//! Single stage heat pump: a mode (reversing valve) switch, a condenser
//! switch and an air handler switch.
//!
//! The operating mode is undefined until a command sets it; demand arriving
//! before that is refused. Changing mode while the condenser runs shuts the
//! condenser off first and lets the hardware settle for
//! [`HeatPump::mode_change_delay`] before the valve is switched.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use hcc_core::flux::MULTICAST_CAPACITY;
use hcc_core::{
    Addressable, Flux, HvacCommand, HvacMode, Multicast, Pipeline, Signal, SignalError,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{HvacDevice, HvacDeviceStatus, StatusKind, Uptime};
use crate::cqrs::CqrsDevice;
use crate::error::{DeviceError, DeviceResult};

pub const DEFAULT_MODE_CHANGE_DELAY: Duration = Duration::from_secs(10);

const MODES: [HvacMode; 2] = [HvacMode::Cooling, HvacMode::Heating];

/// Which switches are "off" when energized.
///
/// A straight mode switch is energized to heat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reversal {
    #[serde(default)]
    pub mode: bool,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub fan: bool,
}

#[derive(Debug, Default)]
struct Commands {
    requested: HvacCommand,
    actual: HvacCommand,
}

pub struct HeatPump {
    id: String,
    mode_switch: Arc<dyn CqrsDevice<bool>>,
    running_switch: Arc<dyn CqrsDevice<bool>>,
    fan_switch: Arc<dyn CqrsDevice<bool>>,
    reversal: Reversal,
    mode_change_delay: Duration,
    commands: Mutex<Commands>,
    uptime: Uptime,
    status: Multicast<Signal<HvacDeviceStatus>>,
    closed: AtomicBool,
}

impl HeatPump {
    pub fn new(
        id: impl Into<String>,
        mode_switch: Arc<dyn CqrsDevice<bool>>,
        running_switch: Arc<dyn CqrsDevice<bool>>,
        fan_switch: Arc<dyn CqrsDevice<bool>>,
    ) -> DeviceResult<Self> {
        let addresses = [
            mode_switch.address(),
            running_switch.address(),
            fan_switch.address(),
        ];
        if addresses[0] == addresses[1] || addresses[0] == addresses[2] || addresses[1] == addresses[2] {
            return Err(DeviceError::InvalidArg {
                what: "heat pump switches must be distinct",
            });
        }
        Ok(Self {
            id: id.into(),
            mode_switch,
            running_switch,
            fan_switch,
            reversal: Reversal::default(),
            mode_change_delay: DEFAULT_MODE_CHANGE_DELAY,
            commands: Mutex::new(Commands::default()),
            uptime: Uptime::default(),
            status: Multicast::new(MULTICAST_CAPACITY),
            closed: AtomicBool::new(false),
        })
    }

    pub fn with_reversal(mut self, reversal: Reversal) -> Self {
        self.reversal = reversal;
        self
    }

    pub fn with_mode_change_delay(mut self, delay: Duration) -> Self {
        self.mode_change_delay = delay;
        self
    }

    pub fn reversal(&self) -> Reversal {
        self.reversal
    }

    pub fn mode_change_delay(&self) -> Duration {
        self.mode_change_delay
    }

    /// Last command handed to the switches.
    pub fn actual(&self) -> HvacCommand {
        self.commands.lock().actual
    }

    async fn emit(
        &self,
        tx: &mpsc::Sender<Signal<HvacDeviceStatus>>,
        kind: StatusKind,
        requested: HvacCommand,
    ) {
        let actual = self.commands.lock().actual;
        let signal = Signal::new(
            Utc::now(),
            HvacDeviceStatus {
                kind,
                requested,
                actual: Some(actual),
                uptime: self.uptime.get(),
            },
        );
        self.status.publish(signal.clone());
        let _ = tx.send(signal).await;
    }

    async fn fail(&self, tx: &mpsc::Sender<Signal<HvacDeviceStatus>>, signal: Signal<HvacDeviceStatus>) {
        self.status.publish(signal.clone());
        let _ = tx.send(signal).await;
    }

    fn check(&self, command: &HvacCommand) -> Result<(), SignalError> {
        if let Some(mode) = command.mode {
            if !MODES.contains(&mode) {
                return Err(SignalError::Invalid(format!("{}: mode {mode} not supported", self.id)));
            }
        }
        let mode_unset = self.commands.lock().requested.mode.is_none();
        if mode_unset && command.mode.is_none() && command.is_running() {
            return Err(SignalError::Invalid(format!(
                "{}: can't accept demand > 0 before setting the operating mode",
                self.id
            )));
        }
        Ok(())
    }

    async fn process(&self, signal: Signal<HvacCommand>, tx: &mpsc::Sender<Signal<HvacDeviceStatus>>) {
        if signal.is_error() {
            warn!(device = %self.id, error = ?signal.error(), "failed command signal, switches left alone");
            self.fail(tx, signal.propagate_failure()).await;
            return;
        }
        let Some(&command) = signal.value() else {
            return;
        };
        debug!(device = %self.id, ?command, "process");

        if let Err(error) = self.check(&command) {
            warn!(device = %self.id, %error, "command rejected");
            self.fail(tx, Signal::failure(signal.timestamp(), error)).await;
            return;
        }
        if let Some(mode) = command.mode {
            self.change_mode(mode, tx).await;
        }
        self.operate(command, tx).await;
    }

    async fn change_mode(&self, mode: HvacMode, tx: &mpsc::Sender<Signal<HvacDeviceStatus>>) {
        let (current, running) = {
            let commands = self.commands.lock();
            (commands.requested.mode, commands.actual.is_running())
        };
        if current == Some(mode) {
            debug!(device = %self.id, %mode, "mode unchanged");
            return;
        }
        info!(device = %self.id, %mode, "mode changing");

        if running {
            info!(device = %self.id, "shutting off the condenser");
            let transition = {
                let commands = self.commands.lock();
                HvacCommand {
                    mode: None,
                    demand: Some(0.0),
                    fan_speed: None,
                }
                .reconcile(&commands.actual)
            };
            self.emit(tx, StatusKind::Requested, transition).await;
            self.running_switch.set_state(self.reversal.running);
            self.uptime.set(false);
            // requested is left alone, this is a transition
            self.commands.lock().actual = transition;
            self.emit(tx, StatusKind::Actual, transition).await;

            warn!(device = %self.id, delay = ?self.mode_change_delay, "letting the hardware settle");
            tokio::time::sleep(self.mode_change_delay).await;
        } else {
            debug!(device = %self.id, "condenser is not running, skipping the pause");
        }

        let requested = {
            let mut commands = self.commands.lock();
            commands.requested = HvacCommand::mode_only(mode).reconcile(&commands.actual);
            commands.requested
        };
        self.emit(tx, StatusKind::Requested, requested).await;
        self.mode_switch
            .set_state((mode == HvacMode::Heating) != self.reversal.mode);
        self.commands.lock().actual = requested;
        self.emit(tx, StatusKind::Actual, requested).await;
        info!(device = %self.id, %mode, "mode changed");
    }

    /// Condenser and fan. The fan is only touched when the command says so.
    async fn operate(&self, command: HvacCommand, tx: &mpsc::Sender<Signal<HvacDeviceStatus>>) {
        let operation = {
            let commands = self.commands.lock();
            HvacCommand {
                mode: None,
                demand: command.demand,
                fan_speed: command.fan_speed,
            }
            .reconcile(&commands.actual)
        };
        self.emit(tx, StatusKind::Requested, operation).await;

        self.running_switch
            .set_state(operation.is_running() != self.reversal.running);
        if let Some(fan) = operation.fan_speed {
            self.fan_switch.set_state((fan > 0.0) != self.reversal.fan);
        }
        self.uptime.set(operation.is_on());
        {
            let mut commands = self.commands.lock();
            commands.actual = operation;
            commands.requested = operation;
        }
        self.emit(tx, StatusKind::Actual, operation).await;
    }
}

impl Addressable for HeatPump {
    fn address(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl HvacDevice for HeatPump {
    fn modes(&self) -> &[HvacMode] {
        &MODES
    }

    fn compute(self: Arc<Self>, mut input: Flux<HvacCommand>) -> Pipeline<Signal<HvacDeviceStatus>> {
        let name = self.id.clone();
        Pipeline::spawn(&name, move |tx| async move {
            // condenser off, fan as is
            let init = HvacCommand {
                mode: None,
                demand: Some(0.0),
                fan_speed: None,
            };
            self.process(Signal::new(Utc::now(), init), &tx).await;

            while let Some(signal) = input.next().await {
                if self.closed.load(Ordering::SeqCst) {
                    debug!(device = %self.id, "closed, input ignored");
                    return;
                }
                self.process(signal, &tx).await;
            }
            if !self.closed.load(Ordering::SeqCst) {
                debug!(device = %self.id, "input complete, shutting off");
                self.process(Signal::new(Utc::now(), HvacCommand::shutdown()), &tx)
                    .await;
            }
        })
    }

    fn flux(&self) -> Flux<HvacDeviceStatus> {
        self.status.subscribe()
    }

    fn uptime(&self) -> Option<Duration> {
        self.uptime.get()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(device = %self.id, "shutting down");
        self.running_switch.set_state(self.reversal.running);
        self.fan_switch.set_state(self.reversal.fan);
        self.mode_switch.set_state(self.reversal.mode);
        self.uptime.set(false);

        let requested = {
            let mut commands = self.commands.lock();
            commands.actual = HvacCommand::shutdown().reconcile(&commands.actual);
            commands.requested = commands.actual;
            commands.actual
        };
        self.status.publish(Signal::new(
            Utc::now(),
            HvacDeviceStatus {
                kind: StatusKind::Actual,
                requested,
                actual: Some(requested),
                uptime: None,
            },
        ));
        self.status.close();
        info!(device = %self.id, "shut down");
    }
}
