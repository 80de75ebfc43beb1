//! CQRS device model.
//!
//! [`CqrsDevice::set_state`] only records the request and queues a command; it
//! never waits for hardware. `actual` is written exclusively by the feedback
//! task, from driver acknowledgements. Both halves live under one lock so a
//! reader never sees a torn pair.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use futures::stream::BoxStream;
use hcc_core::flux::MULTICAST_CAPACITY;
use hcc_core::{Addressable, Flux, Multicast, Signal, SignalError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::driver::{DeviceDriver, DriverEvent, NullDriver, OutboundCommand};
use crate::error::{DeviceError, DeviceResult};
use crate::state::{DeviceState, StateValue};

/// A device with separate command and query paths.
#[async_trait]
pub trait CqrsDevice<T>: Addressable + Send + Sync {
    fn state(&self) -> DeviceState<T>;

    /// Record the request and queue it for the driver. Returns immediately.
    fn set_state(&self, state: T) -> DeviceState<T>;

    fn is_available(&self) -> bool;

    /// State changes, payload is the device id.
    fn flux(&self) -> Flux<DeviceState<T>, String>;

    /// Send the close command, emit the final state, complete the flux. Idempotent.
    async fn close(&self);
}

/// How long `close` waits for the driver to answer the close command.
pub const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound command timing and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwitchConfig {
    pub heartbeat: Option<Duration>,
    pub pace: Option<Duration>,
    /// Resends allowed after a transient driver error.
    pub max_retries: u32,
}

impl SwitchConfig {
    pub fn new(
        heartbeat: Option<Duration>,
        pace: Option<Duration>,
        max_retries: u32,
    ) -> DeviceResult<Self> {
        if heartbeat.is_some_and(|d| d.is_zero()) {
            return Err(DeviceError::InvalidArg {
                what: "heartbeat must be positive",
            });
        }
        if pace.is_some_and(|d| d.is_zero()) {
            return Err(DeviceError::InvalidArg {
                what: "pace must be positive",
            });
        }
        Ok(Self {
            heartbeat,
            pace,
            max_retries,
        })
    }
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            heartbeat: None,
            pace: None,
            max_retries: 3,
        }
    }
}

struct Halves<T> {
    requested: Option<T>,
    actual: Option<T>,
}

struct InFlight<T> {
    state: T,
    attempts: u32,
    /// Heartbeats are not part of the queue depth.
    counted: bool,
}

struct Inner<T> {
    id: String,
    config: SwitchConfig,
    halves: Mutex<Halves<T>>,
    available: AtomicBool,
    queue_depth: AtomicUsize,
    in_flight: Mutex<HashMap<Uuid, InFlight<T>>>,
    /// Last driver failure and whether it was fatal; cleared by the next ack.
    fault: Mutex<Option<(SignalError, bool)>>,
    commands: mpsc::UnboundedSender<T>,
    status: Multicast<Signal<DeviceState<T>, String>>,
    driver: Arc<dyn DeviceDriver<T>>,
    close_state: T,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl<T: StateValue> Inner<T> {
    fn snapshot(&self) -> DeviceState<T> {
        let halves = self.halves.lock();
        DeviceState {
            id: self.id.clone(),
            available: self.available.load(Ordering::SeqCst),
            requested: halves.requested.clone(),
            actual: halves.actual.clone(),
            queue_depth: self.queue_depth.load(Ordering::SeqCst),
        }
    }

    fn publish(&self) -> DeviceState<T> {
        let state = self.snapshot();
        let signal = Signal::new(Utc::now(), state.clone()).with_payload(self.id.clone());
        let fault = self.fault.lock().clone();
        let signal = match fault {
            Some((err, true)) => signal.failed(err),
            Some((err, false)) => signal.degraded(err),
            None => signal,
        };
        self.status.publish(signal);
        state
    }

    fn settle_one(&self) {
        let _ = self
            .queue_depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| Some(d.saturating_sub(1)));
    }

    /// Send one command, resending it on transient failure while it is still
    /// what was requested. Returns the correlation id of the last attempt.
    async fn dispatch(&self, mut entry: InFlight<T>) -> Uuid {
        loop {
            let command = OutboundCommand::new(&self.id, entry.state.clone());
            let id = command.id;
            trace!(device = %self.id, %id, state = ?command.state, attempt = entry.attempts, "sending");
            self.supersede(id, entry);
            let err = match self.driver.send(command).await {
                Ok(()) => return id,
                Err(err) => err,
            };
            match self.fail(Some(id), err.is_transient(), err.is_fatal(), &err.to_string()) {
                Some(mut retry) => {
                    retry.attempts += 1;
                    entry = retry;
                }
                None => return id,
            }
        }
    }

    /// The device holds one state, so a new command replaces whatever is
    /// still waiting for an answer.
    fn supersede(&self, id: Uuid, entry: InFlight<T>) {
        let mut in_flight = self.in_flight.lock();
        for (old, stale) in in_flight.drain() {
            trace!(device = %self.id, %old, "superseded before an answer");
            if stale.counted {
                self.settle_one();
            }
        }
        in_flight.insert(id, entry);
    }

    /// Ids we sent that are no longer tracked belong to superseded commands.
    fn take_in_flight(&self, correlation: Option<Uuid>) -> Result<Option<InFlight<T>>, Uuid> {
        match correlation {
            Some(id) => self.in_flight.lock().remove(&id).map(Some).ok_or(id),
            None => Ok(None),
        }
    }

    /// Record a driver failure. Returns the command to resend, if a retry is due.
    fn fail(
        &self,
        correlation: Option<Uuid>,
        transient: bool,
        fatal: bool,
        message: &str,
    ) -> Option<InFlight<T>> {
        let entry = match self.take_in_flight(correlation) {
            Ok(entry) => entry,
            Err(id) => {
                debug!(device = %self.id, %id, message, "failure of a superseded command ignored");
                return None;
            }
        };
        match entry {
            Some(entry) if transient && !fatal && entry.attempts <= self.config.max_retries => {
                if self.halves.lock().requested.as_ref() != Some(&entry.state) {
                    debug!(device = %self.id, state = ?entry.state, "no longer requested, not retrying");
                    if entry.counted {
                        self.settle_one();
                    }
                    return None;
                }
                warn!(device = %self.id, attempt = entry.attempts, message, "transient failure, retrying");
                return Some(entry);
            }
            Some(entry) if entry.counted => self.settle_one(),
            _ => {}
        }

        if fatal {
            error!(device = %self.id, message, "fatal device failure");
        } else {
            warn!(device = %self.id, message, "device failure, giving up");
        }
        let error = SignalError::Device {
            message: message.to_string(),
            transient,
            fatal,
        };
        *self.fault.lock() = Some((error, fatal));
        self.publish();
        None
    }

    fn acknowledge(&self, correlation: Option<Uuid>, actual: T) {
        match self.take_in_flight(correlation) {
            Ok(Some(entry)) if entry.counted => self.settle_one(),
            Ok(Some(_)) => {}
            Ok(None) => trace!(device = %self.id, ?actual, "unsolicited state report"),
            Err(id) => {
                trace!(device = %self.id, %id, ?actual, "late ack of a superseded command");
                return;
            }
        }
        self.halves.lock().actual = Some(actual);
        *self.fault.lock() = None;
        self.publish();
    }
}

async fn run_commands<T: StateValue>(inner: Arc<Inner<T>>, mut rx: mpsc::UnboundedReceiver<T>) {
    let mut last_sent: Option<T> = None;
    let mut pending: Option<T> = None;
    let mut window_end: Option<Instant> = None;
    let mut heartbeat_at: Option<Instant> = None;

    loop {
        let flush_at = window_end.filter(|_| pending.is_some());
        let send = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            next = rx.recv() => {
                let Some(state) = next else { break };
                if window_end.is_some_and(|end| Instant::now() < end) {
                    if let Some(replaced) = pending.replace(state) {
                        trace!(device = %inner.id, ?replaced, "coalesced");
                        inner.settle_one();
                    }
                    continue;
                }
                state
            }
            _ = sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                window_end = None;
                let Some(state) = pending.take() else { continue };
                if last_sent.as_ref() == Some(&state) {
                    trace!(device = %inner.id, ?state, "same as last sent, dropped");
                    inner.settle_one();
                    continue;
                }
                state
            }
            _ = sleep_until(heartbeat_at.unwrap_or_else(Instant::now)), if heartbeat_at.is_some() => {
                heartbeat_at = inner.config.heartbeat.map(|hb| Instant::now() + hb);
                if inner.closed.load(Ordering::SeqCst) {
                    break;
                }
                if let Some(state) = &last_sent {
                    debug!(device = %inner.id, ?state, "heartbeat");
                    inner
                        .dispatch(InFlight { state: state.clone(), attempts: 1, counted: false })
                        .await;
                }
                continue;
            }
        };

        if inner.closed.load(Ordering::SeqCst) {
            break;
        }
        let now = Instant::now();
        inner
            .dispatch(InFlight {
                state: send.clone(),
                attempts: 1,
                counted: true,
            })
            .await;
        last_sent = Some(send);
        window_end = inner.config.pace.map(|pace| now + pace);
        heartbeat_at = inner.config.heartbeat.map(|hb| now + hb);
    }
    trace!(device = %inner.id, "command loop finished");
}

async fn run_feedback<T: StateValue>(
    inner: Arc<Inner<T>>,
    mut events: BoxStream<'static, DriverEvent<T>>,
) {
    loop {
        let event = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            event = events.next() => match event {
                Some(event) => event,
                None => break,
            },
        };
        match event {
            DriverEvent::Ack {
                correlation,
                actual,
            } => inner.acknowledge(correlation, actual),
            DriverEvent::Availability { available } => {
                if inner.available.swap(available, Ordering::SeqCst) != available {
                    info!(device = %inner.id, available, "availability changed");
                    inner.publish();
                }
            }
            DriverEvent::Error {
                correlation,
                transient,
                fatal,
                message,
            } => {
                if let Some(mut retry) = inner.fail(correlation, transient, fatal, &message) {
                    retry.attempts += 1;
                    inner.dispatch(retry).await;
                }
            }
        }
    }
    trace!(device = %inner.id, "feedback loop finished");
}

/// [`CqrsDevice`] on top of any [`DeviceDriver`], with pace, heartbeat and
/// transient-error retry.
///
/// Must be created inside a tokio runtime.
pub struct ManagedDevice<T> {
    inner: Arc<Inner<T>>,
}

/// The common case: a boolean relay.
pub type Switch = ManagedDevice<bool>;

impl<T: StateValue> ManagedDevice<T> {
    /// `close_state` is what gets sent when the device is closed.
    pub fn new(
        id: impl Into<String>,
        config: SwitchConfig,
        driver: Arc<dyn DeviceDriver<T>>,
        events: BoxStream<'static, DriverEvent<T>>,
        close_state: T,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            id: id.into(),
            config,
            halves: Mutex::new(Halves {
                requested: None,
                actual: None,
            }),
            available: AtomicBool::new(true),
            queue_depth: AtomicUsize::new(0),
            in_flight: Mutex::new(HashMap::new()),
            fault: Mutex::new(None),
            commands: tx,
            status: Multicast::new(MULTICAST_CAPACITY),
            driver,
            close_state,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        });
        tokio::spawn(run_commands(inner.clone(), rx));
        tokio::spawn(run_feedback(inner.clone(), events));
        debug!(device = %inner.id, ?config, "created");
        Self { inner }
    }

    /// Device backed by a [`NullDriver`] that acknowledges instantly.
    pub fn with_null_driver(
        id: impl Into<String>,
        config: SwitchConfig,
        close_state: T,
    ) -> (Self, Arc<NullDriver<T>>) {
        let (driver, events) = NullDriver::instant();
        let device = Self::new(id, config, driver.clone(), events, close_state);
        (device, driver)
    }

    pub fn config(&self) -> SwitchConfig {
        self.inner.config
    }
}

impl<T> Addressable for ManagedDevice<T> {
    fn address(&self) -> &str {
        &self.inner.id
    }
}

#[async_trait]
impl<T: StateValue> CqrsDevice<T> for ManagedDevice<T> {
    fn state(&self) -> DeviceState<T> {
        self.inner.snapshot()
    }

    fn set_state(&self, state: T) -> DeviceState<T> {
        if self.inner.closed.load(Ordering::SeqCst) {
            warn!(device = %self.inner.id, ?state, "closed, request ignored");
            return self.inner.snapshot();
        }
        self.inner.halves.lock().requested = Some(state.clone());
        self.inner.queue_depth.fetch_add(1, Ordering::SeqCst);
        if self.inner.commands.send(state).is_err() {
            warn!(device = %self.inner.id, "command loop is gone");
            self.inner.settle_one();
        }
        self.inner.publish()
    }

    fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    fn flux(&self) -> Flux<DeviceState<T>, String> {
        self.inner.status.subscribe()
    }

    async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(device = %self.inner.id, "closing");

        // feedback keeps running until the close command is answered
        let state = self.inner.close_state.clone();
        let mut updates = self.inner.status.subscribe();
        self.inner.halves.lock().requested = Some(state.clone());
        let id = self
            .inner
            .dispatch(InFlight {
                state: state.clone(),
                attempts: 1,
                counted: false,
            })
            .await;
        let answered = tokio::time::timeout(CLOSE_ACK_TIMEOUT, async {
            while self.inner.in_flight.lock().contains_key(&id) {
                if updates.next().await.is_none() {
                    break;
                }
            }
        })
        .await;
        if answered.is_err() {
            warn!(device = %self.inner.id, ?state, "close command not acknowledged");
        }

        self.inner.shutdown.cancel();
        self.inner.publish();
        self.inner.status.close();
    }
}

impl<T> Drop for ManagedDevice<T> {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}
