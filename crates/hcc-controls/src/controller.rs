//! Streaming process controller.
//!
//! Wraps a [`ControlLaw`] with a setpoint and the failure semantics every
//! law shares:
//! - a total-failure input passes through as a total-failure output with
//!   its payload, and the law is not invoked (its state does not advance)
//! - a partial-failure input is computed, and the output keeps the partial
//!   status and error
//! - a setpoint change re-evaluates the last usable sample immediately

use std::sync::Arc;

use futures::StreamExt;
use hcc_core::{Addressable, Flux, Pipeline, Signal, Timestamp, ensure_finite};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::ControlResult;
use crate::hysteresis::Hysteresis;
use crate::law::{ControlLaw, Status};
use crate::pid::Pid;

pub type HysteresisController = ProcessController<Hysteresis>;
pub type PidController = ProcessController<Pid>;

struct Core<L> {
    law: L,
    last_timestamp: Option<Timestamp>,
    last_pv: Option<f64>,
    last_output: Option<Status<f64>>,
}

/// A [`ControlLaw`] plus setpoint, fed by a signal stream.
///
/// Only one [`compute`](ProcessController::compute) subscription should be
/// active per instance; the law state is shared between them.
pub struct ProcessController<L> {
    name: String,
    setpoint: watch::Sender<f64>,
    core: Arc<Mutex<Core<L>>>,
}

impl<L: ControlLaw> ProcessController<L> {
    pub fn new(name: impl Into<String>, setpoint: f64, law: L) -> ControlResult<Self> {
        let setpoint = ensure_finite(setpoint, "setpoint")?;
        let (tx, _) = watch::channel(setpoint);
        Ok(Self {
            name: name.into(),
            setpoint: tx,
            core: Arc::new(Mutex::new(Core {
                law,
                last_timestamp: None,
                last_pv: None,
                last_output: None,
            })),
        })
    }

    pub fn setpoint(&self) -> f64 {
        *self.setpoint.borrow()
    }

    /// Change the setpoint. Active `compute` pipelines emit a re-evaluated
    /// output right away.
    pub fn set_setpoint(&self, setpoint: f64) -> ControlResult<()> {
        let setpoint = ensure_finite(setpoint, "setpoint")?;
        let old = self.setpoint();
        if old == setpoint {
            return Ok(());
        }
        self.core.lock().law.setpoint_changed(old, setpoint);
        self.setpoint.send_replace(setpoint);
        debug!(controller = %self.name, old, new = setpoint, "setpoint changed");
        Ok(())
    }

    /// Last usable process variable seen.
    pub fn process_variable(&self) -> Option<f64> {
        self.core.lock().last_pv
    }

    pub fn last_output(&self) -> Option<Status<f64>> {
        self.core.lock().last_output
    }

    /// Read-only look at the law (e.g. PID terms).
    pub fn inspect<R>(&self, f: impl FnOnce(&L) -> R) -> R {
        f(&self.core.lock().law)
    }

    /// Change the law in place; later samples see the change.
    pub fn configure<R>(&self, f: impl FnOnce(&mut L) -> R) -> R {
        f(&mut self.core.lock().law)
    }

    /// Process one sample synchronously.
    pub fn step<P: Clone>(&self, signal: &Signal<f64, P>) -> Signal<Status<f64>, P> {
        step(&self.name, &self.core, self.setpoint(), signal)
    }

    /// Stream of statuses, one per input sample plus one per setpoint change.
    pub fn compute<P>(&self, mut input: Flux<f64, P>) -> Pipeline<Signal<Status<f64>, P>>
    where
        P: Clone + Send + Sync + 'static,
    {
        if self.setpoint.receiver_count() > 0 {
            warn!(controller = %self.name, "more than one active compute subscription");
        }
        let name = self.name.clone();
        let core = self.core.clone();
        let mut setpoint = self.setpoint.subscribe();

        Pipeline::spawn(&self.name, move |tx| async move {
            let mut last: Option<Signal<f64, P>> = None;
            let mut setpoint_live = true;
            loop {
                tokio::select! {
                    next = input.next() => {
                        let Some(signal) = next else { break };
                        let sp = *setpoint.borrow_and_update();
                        let out = step(&name, &core, sp, &signal);
                        if !signal.is_error() {
                            last = Some(signal);
                        }
                        if tx.send(out).await.is_err() {
                            break;
                        }
                    }
                    changed = setpoint.changed(), if setpoint_live => {
                        if changed.is_err() {
                            setpoint_live = false;
                            continue;
                        }
                        let sp = *setpoint.borrow_and_update();
                        if let Some(signal) = &last {
                            let out = step(&name, &core, sp, signal);
                            if tx.send(out).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        })
    }
}

impl<L> Addressable for ProcessController<L> {
    fn address(&self) -> &str {
        &self.name
    }
}

fn step<L: ControlLaw, P: Clone>(
    name: &str,
    core: &Mutex<Core<L>>,
    setpoint: f64,
    signal: &Signal<f64, P>,
) -> Signal<Status<f64>, P> {
    let pv = match signal.value() {
        Some(pv) if !signal.is_error() => *pv,
        _ => return signal.propagate_failure(),
    };

    let mut core = core.lock();
    let timestamp = signal.timestamp();
    if let Some(last) = core.last_timestamp {
        if timestamp < last {
            warn!(controller = %name, %timestamp, %last, "can't go back in time");
        }
    }
    let status = core.law.compute(setpoint, pv, timestamp);
    core.last_timestamp = Some(timestamp);
    core.last_pv = Some(pv);
    core.last_output = Some(status);
    signal.derive(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hysteresis::HysteresisThresholds;
    use crate::pid::PidGains;
    use chrono::{DateTime, Duration};
    use futures::stream;
    use hcc_core::{SignalError, SignalStatus};
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    fn t(secs: i64) -> Timestamp {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn samples(values: &[f64]) -> Flux<f64> {
        let signals: Vec<Signal<f64>> = values
            .iter()
            .enumerate()
            .map(|(n, v)| Signal::new(t(n as i64), *v))
            .collect();
        stream::iter(signals).boxed()
    }

    #[tokio::test]
    async fn hysteresis_reference_sequence() {
        let controller = HysteresisController::new("h", 20.0, Hysteresis::default()).unwrap();
        let out: Vec<f64> = controller
            .compute(samples(&[20.0, 20.5, 21.0, 20.5, 20.0, 19.5, 19.0]))
            .map(|s| s.value().unwrap().signal)
            .collect()
            .await;
        assert_eq!(out, vec![-1.0, -1.0, 1.0, 1.0, 1.0, 1.0, -1.0]);
    }

    #[test]
    fn total_failure_passes_through_without_advancing_state() {
        let controller =
            PidController::new("pid", 20.0, Pid::new(PidGains::new(1.0, 1.0, 0.0, 0.0).unwrap()))
                .unwrap();
        controller.step(&Signal::new(t(0), 21.0).with_payload("den"));

        let failed: Signal<f64, &str> =
            Signal::failure(t(10), SignalError::Sensor("1-Wire timeout".into())).with_payload("den");
        let out = controller.step(&failed);
        assert!(out.is_error());
        assert_eq!(out.payload(), Some(&"den"));
        assert_eq!(controller.inspect(|pid| pid.state().integral), 0.0);
        assert_eq!(controller.process_variable(), Some(21.0));
    }

    #[test]
    fn partial_failure_is_computed_and_kept_partial() {
        let controller = HysteresisController::new(
            "h",
            20.0,
            Hysteresis::new(HysteresisThresholds::default()),
        )
        .unwrap();
        let stale = Signal::new(t(0), 22.0).degraded(SignalError::Stale("no update for 5m".into()));
        let out = controller.step(&stale);
        assert_eq!(out.status(), SignalStatus::FailurePartial);
        assert_eq!(out.value().unwrap().signal, 1.0);
        assert!(out.error().is_some());
    }

    #[test]
    fn setpoint_must_be_finite() {
        let controller = HysteresisController::new("h", 20.0, Hysteresis::default()).unwrap();
        assert!(controller.set_setpoint(f64::NAN).is_err());
        assert!(HysteresisController::new("h", f64::INFINITY, Hysteresis::default()).is_err());
        controller.set_setpoint(22.0).unwrap();
        assert_eq!(controller.setpoint(), 22.0);
    }

    #[tokio::test]
    async fn setpoint_change_emits_immediately() {
        let controller = HysteresisController::new("h", 20.0, Hysteresis::default()).unwrap();
        let (tx, rx) = mpsc::channel(4);
        let mut out = controller.compute(ReceiverStream::new(rx).boxed());

        tx.send(Signal::new(t(0), 20.5)).await.unwrap();
        assert_eq!(out.next().await.unwrap().value().unwrap().signal, -1.0);

        controller.set_setpoint(19.0).unwrap();
        let status = *out.next().await.unwrap().value().unwrap();
        assert_eq!(status.setpoint, 19.0);
        assert_eq!(status.signal, 1.0);
    }

    #[tokio::test]
    async fn setpoint_change_before_any_sample_emits_nothing() {
        let controller = HysteresisController::new("h", 20.0, Hysteresis::default()).unwrap();
        let (tx, rx) = mpsc::channel(4);
        let mut out = controller.compute(ReceiverStream::new(rx).boxed());
        controller.set_setpoint(25.0).unwrap();
        tx.send(Signal::new(t(0), 26.5)).await.unwrap();
        let status = *out.next().await.unwrap().value().unwrap();
        assert_eq!(status.setpoint, 25.0);
        assert_eq!(status.signal, 1.0);
    }

    #[test]
    fn time_going_backwards_is_still_processed() {
        let controller =
            PidController::new("pid", 0.0, Pid::new(PidGains::new(1.0, 0.0, 0.0, 0.0).unwrap()))
                .unwrap();
        controller.step(&Signal::new(t(10), 1.0));
        let out = controller.step(&Signal::new(t(10) - Duration::seconds(3), 2.0));
        assert_eq!(out.value().unwrap().signal, 2.0);
    }

    #[test]
    fn configure_retunes_the_law() {
        let controller =
            PidController::new("pid", 20.0, Pid::new(PidGains::new(1.0, 0.0, 0.0, 0.0).unwrap()))
                .unwrap();
        assert_eq!(controller.step(&Signal::new(t(0), 21.0)).value().unwrap().signal, 1.0);

        let inverted = PidGains::new(1.0, 0.0, 0.0, 0.0).unwrap().scaled(-1.0);
        controller.configure(|pid| pid.set_gains(inverted));
        assert_eq!(controller.step(&Signal::new(t(1), 21.0)).value().unwrap().signal, -1.0);
    }
}
