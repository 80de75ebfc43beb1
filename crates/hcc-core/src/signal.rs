//! The signal envelope.
//!
//! Every producer emits [`Signal`] values: a timestamped value-or-error record
//! with an optional payload identifying the emitter. Signals are immutable
//! value objects; transformations produce new signals.
//!
//! Two invariants hold for every signal:
//! - the value is present unless the status is [`SignalStatus::FailureTotal`]
//! - the error is present if and only if the status is not [`SignalStatus::Ok`]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{CoreError, CoreResult};

pub type Timestamp = DateTime<Utc>;

/// Quality of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Ok,
    /// Value still usable, quality degraded (e.g. stale but present).
    FailurePartial,
    /// No usable value; the error must be inspected.
    FailureTotal,
}

/// Why a signal is not OK.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum SignalError {
    #[error("sensor failure: {0}")]
    Sensor(String),

    #[error("stale signal: {0}")]
    Stale(String),

    #[error("device failure (transient={transient}, fatal={fatal}): {message}")]
    Device {
        message: String,
        transient: bool,
        fatal: bool,
    },

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("invalid input: {0}")]
    Invalid(String),
}

/// Timestamped value-or-error container.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal<T, P = ()> {
    timestamp: Timestamp,
    value: Option<T>,
    payload: Option<P>,
    status: SignalStatus,
    error: Option<SignalError>,
}

impl<T> Signal<T, ()> {
    /// An OK signal without payload.
    pub fn new(timestamp: Timestamp, value: T) -> Self {
        Self {
            timestamp,
            value: Some(value),
            payload: None,
            status: SignalStatus::Ok,
            error: None,
        }
    }

    /// A total failure without payload.
    pub fn failure(timestamp: Timestamp, error: SignalError) -> Self {
        Self {
            timestamp,
            value: None,
            payload: None,
            status: SignalStatus::FailureTotal,
            error: Some(error),
        }
    }
}

impl<T, P> Signal<T, P> {
    /// Build a signal from its parts, checking both envelope invariants.
    pub fn try_new(
        timestamp: Timestamp,
        value: Option<T>,
        payload: Option<P>,
        status: SignalStatus,
        error: Option<SignalError>,
    ) -> CoreResult<Self> {
        if value.is_none() && status != SignalStatus::FailureTotal {
            return Err(CoreError::SignalInvariant {
                what: "value must be present unless status is FailureTotal",
            });
        }
        match (status, error.is_some()) {
            (SignalStatus::Ok, true) => Err(CoreError::SignalInvariant {
                what: "error must be absent when status is Ok",
            }),
            (SignalStatus::FailurePartial | SignalStatus::FailureTotal, false) => {
                Err(CoreError::SignalInvariant {
                    what: "error must be present when status is not Ok",
                })
            }
            _ => Ok(Self {
                timestamp,
                value,
                payload,
                status,
                error,
            }),
        }
    }

    /// Attach (or replace) the payload.
    pub fn with_payload<Q>(self, payload: Q) -> Signal<T, Q> {
        Signal {
            timestamp: self.timestamp,
            value: self.value,
            payload: Some(payload),
            status: self.status,
            error: self.error,
        }
    }

    /// Downgrade an OK signal to [`SignalStatus::FailurePartial`], keeping its value.
    ///
    /// A total failure stays total; only its error is replaced.
    pub fn degraded(mut self, error: SignalError) -> Self {
        if self.status != SignalStatus::FailureTotal {
            self.status = SignalStatus::FailurePartial;
        }
        self.error = Some(error);
        self
    }

    /// Mark as a total failure. Any value present is kept for diagnostics only.
    pub fn failed(mut self, error: SignalError) -> Self {
        self.status = SignalStatus::FailureTotal;
        self.error = Some(error);
        self
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    pub fn payload(&self) -> Option<&P> {
        self.payload.as_ref()
    }

    pub fn status(&self) -> SignalStatus {
        self.status
    }

    pub fn error(&self) -> Option<&SignalError> {
        self.error.as_ref()
    }

    pub fn is_ok(&self) -> bool {
        self.status == SignalStatus::Ok
    }

    /// `true` for total failures only; partial failures still carry a usable value.
    pub fn is_error(&self) -> bool {
        self.status == SignalStatus::FailureTotal
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Signal<U, P> {
        Signal {
            timestamp: self.timestamp,
            value: self.value.map(f),
            payload: self.payload,
            status: self.status,
            error: self.error,
        }
    }

    pub fn map_payload<Q>(self, f: impl FnOnce(P) -> Q) -> Signal<T, Q> {
        Signal {
            timestamp: self.timestamp,
            value: self.value,
            payload: self.payload.map(f),
            status: self.status,
            error: self.error,
        }
    }

    /// New value, same envelope (timestamp, payload, status and error).
    pub fn derive<U>(&self, value: U) -> Signal<U, P>
    where
        P: Clone,
    {
        Signal {
            timestamp: self.timestamp,
            value: Some(value),
            payload: self.payload.clone(),
            status: self.status,
            error: self.error.clone(),
        }
    }

    /// Total failure of another value type, keeping timestamp, payload and error.
    pub fn propagate_failure<U>(&self) -> Signal<U, P>
    where
        P: Clone,
    {
        let error = self
            .error
            .clone()
            .unwrap_or_else(|| SignalError::Upstream("total failure".to_string()));
        Signal {
            timestamp: self.timestamp,
            value: None,
            payload: self.payload.clone(),
            status: SignalStatus::FailureTotal,
            error: Some(error),
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn status() -> impl Strategy<Value = SignalStatus> {
        prop_oneof![
            Just(SignalStatus::Ok),
            Just(SignalStatus::FailurePartial),
            Just(SignalStatus::FailureTotal),
        ]
    }

    proptest! {
        #[test]
        fn try_new_accepts_exactly_the_valid_envelopes(
            has_value in any::<bool>(),
            has_error in any::<bool>(),
            status in status(),
        ) {
            let ts = DateTime::from_timestamp(0, 0).unwrap();
            let value = has_value.then_some(1.0_f64);
            let error = has_error.then(|| SignalError::Invalid("x".into()));
            let valid = (has_value || status == SignalStatus::FailureTotal)
                && (has_error == (status != SignalStatus::Ok));
            let built = Signal::<f64, ()>::try_new(ts, value, None, status, error);
            prop_assert_eq!(built.is_ok(), valid);
        }
    }
}
