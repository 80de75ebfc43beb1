//! Device driver protocol.
//!
//! Outbound commands carry a unique correlation id. Inbound events may refer
//! back to it; error events carry transient/fatal flags.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;
use uuid::Uuid;

use crate::error::{DeviceError, DeviceResult, DriverError};
use crate::state::StateValue;

/// Command leaving the core for a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCommand<T> {
    pub id: Uuid,
    pub device: String,
    pub state: T,
}

impl<T> OutboundCommand<T> {
    pub fn new(device: &str, state: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            device: device.to_string(),
            state,
        }
    }
}

/// Event coming back from a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent<T> {
    /// Hardware confirmed a state, optionally in response to a command.
    Ack {
        correlation: Option<Uuid>,
        actual: T,
    },
    /// Liveness changed (e.g. a last-will message).
    Availability { available: bool },
    Error {
        correlation: Option<Uuid>,
        transient: bool,
        fatal: bool,
        message: String,
    },
}

/// Transport seam. Implementations live outside the core.
#[async_trait]
pub trait DeviceDriver<T>: Send + Sync {
    async fn send(&self, command: OutboundCommand<T>) -> Result<(), DriverError>;
}

/// Commands [`NullDriver::sent`] remembers; older ones are forgotten.
pub const SENT_HISTORY: usize = 1024;

/// Driver that accepts everything and acknowledges it, optionally after a
/// random delay. Failures can be scripted for tests.
pub struct NullDriver<T> {
    events: mpsc::UnboundedSender<DriverEvent<T>>,
    min_delay: Duration,
    max_delay: Duration,
    available: AtomicBool,
    sent: Mutex<VecDeque<OutboundCommand<T>>>,
    faults: Mutex<VecDeque<DriverError>>,
}

impl<T: StateValue> NullDriver<T> {
    /// Instant acknowledgement.
    pub fn instant() -> (Arc<Self>, BoxStream<'static, DriverEvent<T>>) {
        Self::build(Duration::ZERO, Duration::ZERO)
    }

    /// Acknowledge after a random delay in `[min_delay, max_delay]`.
    pub fn with_delay(
        min_delay: Duration,
        max_delay: Duration,
    ) -> DeviceResult<(Arc<Self>, BoxStream<'static, DriverEvent<T>>)> {
        if min_delay > max_delay {
            return Err(DeviceError::InvalidArg {
                what: "min_delay must not exceed max_delay",
            });
        }
        Ok(Self::build(min_delay, max_delay))
    }

    fn build(min_delay: Duration, max_delay: Duration) -> (Arc<Self>, BoxStream<'static, DriverEvent<T>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Arc::new(Self {
            events: tx,
            min_delay,
            max_delay,
            available: AtomicBool::new(true),
            sent: Mutex::new(VecDeque::with_capacity(SENT_HISTORY)),
            faults: Mutex::new(VecDeque::new()),
        });
        (driver, UnboundedReceiverStream::new(rx).boxed())
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Flip liveness and report it the way a last-will topic would.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        let _ = self.events.send(DriverEvent::Availability { available });
    }

    /// Answer the next command with this error instead of an ack.
    pub fn inject_fault(&self, fault: DriverError) {
        self.faults.lock().push_back(fault);
    }

    /// The last [`SENT_HISTORY`] commands, oldest first.
    pub fn sent(&self) -> Vec<OutboundCommand<T>> {
        self.sent.lock().iter().cloned().collect()
    }

    fn delay(&self) -> Duration {
        if self.max_delay.is_zero() {
            return Duration::ZERO;
        }
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

#[async_trait]
impl<T: StateValue> DeviceDriver<T> for NullDriver<T> {
    async fn send(&self, command: OutboundCommand<T>) -> Result<(), DriverError> {
        trace!(device = %command.device, id = %command.id, state = ?command.state, "null driver send");
        {
            let mut sent = self.sent.lock();
            if sent.len() == SENT_HISTORY {
                sent.pop_front();
            }
            sent.push_back(command.clone());
        }

        let fault = self.faults.lock().pop_front();
        if let Some(fault) = fault {
            let _ = self.events.send(DriverEvent::Error {
                correlation: Some(command.id),
                transient: fault.is_transient(),
                fatal: fault.is_fatal(),
                message: fault.to_string(),
            });
            return Ok(());
        }

        let ack = DriverEvent::Ack {
            correlation: Some(command.id),
            actual: command.state,
        };
        let delay = self.delay();
        if delay.is_zero() {
            let _ = self.events.send(ack);
        } else {
            let events = self.events.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(ack);
            });
        }
        Ok(())
    }
}
