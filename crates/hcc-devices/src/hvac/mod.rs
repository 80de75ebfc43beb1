//! HVAC units composed of one or more CQRS devices.

pub mod heat_pump;
pub mod switchable;
pub mod variable;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use hcc_core::{Addressable, CoreError, Flux, HvacCommand, HvacMode, Multicast, Pipeline, Signal, SignalError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

pub use heat_pump::{HeatPump, Reversal};
pub use switchable::SwitchableHvacDevice;
pub use variable::{VariableHvacDevice, band};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// What the device was told to do.
    Requested,
    /// What the device is known to be doing.
    Actual,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HvacDeviceStatus {
    pub kind: StatusKind,
    pub requested: HvacCommand,
    pub actual: Option<HvacCommand>,
    /// How long the unit has been running, `None` while off.
    pub uptime: Option<Duration>,
}

/// A mode-aware heating/cooling unit.
#[async_trait]
pub trait HvacDevice: Addressable + Send + Sync {
    fn modes(&self) -> &[HvacMode];

    fn supports(&self, mode: HvacMode) -> bool {
        self.modes().contains(&mode)
    }

    /// Translate a command stream into switch requests. The unit is shut off
    /// when the input completes.
    fn compute(self: Arc<Self>, input: Flux<HvacCommand>) -> Pipeline<Signal<HvacDeviceStatus>>;

    /// Everything `compute` emits, for observers.
    fn flux(&self) -> Flux<HvacDeviceStatus>;

    fn uptime(&self) -> Option<Duration>;

    /// Turn everything off and complete the status flux.
    async fn close(&self);
}

/// Device kinds selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HvacDeviceKind {
    Switchable,
    HeatPump,
    Variable,
}

impl fmt::Display for HvacDeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HvacDeviceKind::Switchable => "switchable",
            HvacDeviceKind::HeatPump => "heat-pump",
            HvacDeviceKind::Variable => "variable",
        })
    }
}

impl FromStr for HvacDeviceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "switchable" => Ok(HvacDeviceKind::Switchable),
            "heat-pump" | "heatpump" => Ok(HvacDeviceKind::HeatPump),
            "variable" => Ok(HvacDeviceKind::Variable),
            other => Err(CoreError::Unknown {
                what: "HVAC device kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Tracks how long a unit has been on.
#[derive(Debug, Default)]
pub(crate) struct Uptime {
    since: Mutex<Option<Instant>>,
}

impl Uptime {
    pub(crate) fn set(&self, on: bool) {
        let mut since = self.since.lock();
        match (on, *since) {
            (true, None) => *since = Some(Instant::now()),
            (false, Some(_)) => *since = None,
            _ => {}
        }
    }

    pub(crate) fn get(&self) -> Option<Duration> {
        self.since.lock().map(|t| t.elapsed())
    }
}

/// Whether a reconciled command asks a single-mode unit to run.
pub(crate) fn wants_on(command: &HvacCommand) -> bool {
    command.mode != Some(HvacMode::Off) && command.is_on()
}

/// Merge an incoming command into what a single-mode unit was last asked.
///
/// `Ok(None)` for commands that only carry a mode: nothing to actuate.
pub(crate) fn accept_single_mode(
    id: &str,
    mode: HvacMode,
    requested: &Mutex<HvacCommand>,
    command: HvacCommand,
) -> Result<Option<HvacCommand>, SignalError> {
    if let Some(wanted) = command.mode {
        if wanted != mode && wanted != HvacMode::Off {
            return Err(SignalError::Invalid(format!("{id}: mode {wanted} not supported")));
        }
    }
    let mut requested = requested.lock();
    let merged = command.reconcile(&requested);
    *requested = merged;
    if merged.is_mode_only() {
        trace!(device = %id, ?merged, "mode only, nothing to do");
        return Ok(None);
    }
    Ok(Some(merged))
}

/// Shared plumbing of units driven by a single CQRS device.
pub(crate) trait SingleModeUnit: Send + Sync + 'static {
    type Feedback: Send + 'static;

    fn id(&self) -> &str;
    fn status(&self) -> &Multicast<Signal<HvacDeviceStatus>>;
    fn feedback(&self) -> BoxStream<'static, Self::Feedback>;
    fn apply(&self, signal: Signal<HvacCommand>) -> Option<Signal<HvacDeviceStatus>>;
    fn observe(&self, feedback: Self::Feedback) -> Option<Signal<HvacDeviceStatus>>;
    fn shut_off(&self) -> Signal<HvacDeviceStatus>;
}

pub(crate) fn run_single_mode<U: SingleModeUnit>(
    unit: Arc<U>,
    mut input: Flux<HvacCommand>,
) -> Pipeline<Signal<HvacDeviceStatus>> {
    let mut feedback = unit.feedback().fuse();
    let name = unit.id().to_string();
    Pipeline::spawn(&name, move |tx| async move {
        loop {
            let out = tokio::select! {
                next = input.next() => match next {
                    Some(signal) => unit.apply(signal),
                    None => break,
                },
                Some(state) = feedback.next() => unit.observe(state),
            };
            if let Some(out) = out {
                unit.status().publish(out.clone());
                if tx.send(out).await.is_err() {
                    return;
                }
            }
        }
        debug!(device = %unit.id(), "input complete, shutting off");
        let out = unit.shut_off();
        unit.status().publish(out.clone());
        let _ = tx.send(out).await;
    })
}

/// Total failure status for a rejected or failed command.
pub(crate) fn rejected(
    id: &str,
    signal: &Signal<HvacCommand>,
    error: SignalError,
) -> Signal<HvacDeviceStatus> {
    warn!(device = %id, %error, "command rejected");
    Signal::failure(signal.timestamp(), error)
}
