//! PID control law.
//!
//! - error is `pv - setpoint`, so a positive output means "too high"
//! - the integral accumulates `error * dt` where `dt` is the real interval
//!   between consecutive samples, in seconds
//! - with a non-zero saturation limit the integral only advances while the
//!   previous output and the new integral term both stay below the limit
//! - the derivative is zero on the first sample and whenever `dt <= 0`

use hcc_core::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};
use crate::law::{ControlLaw, Status};

/// PID weights and saturation limit (`0` disables the guard).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub saturation_limit: f64,
}

impl PidGains {
    pub fn new(p: f64, i: f64, d: f64, saturation_limit: f64) -> ControlResult<Self> {
        for (what, value) in [("p", p), ("i", i), ("d", d), ("saturation_limit", saturation_limit)] {
            if !value.is_finite() {
                return Err(ControlError::NonFinite { what, value });
            }
        }
        if p == 0.0 && i == 0.0 && d == 0.0 {
            return Err(ControlError::InvalidArg {
                what: "all PID components are zero",
            });
        }
        if saturation_limit < 0.0 {
            return Err(ControlError::InvalidArg {
                what: "saturation_limit must be non-negative",
            });
        }
        Ok(Self {
            p,
            i,
            d,
            saturation_limit,
        })
    }

    /// Same gains with every weight multiplied by `factor`.
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            p: self.p * factor,
            i: self.i * factor,
            d: self.d * factor,
            saturation_limit: self.saturation_limit,
        }
    }
}

/// Accumulated PID state.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidState {
    pub integral: f64,
    pub last_error: Option<f64>,
    pub last_timestamp: Option<Timestamp>,
    pub last_output: Option<f64>,
}

/// Last computed components, for instrumentation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PidTerms {
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

#[derive(Debug, Clone)]
pub struct Pid {
    gains: PidGains,
    reset_on_setpoint_change: bool,
    state: PidState,
    terms: PidTerms,
}

impl Pid {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            reset_on_setpoint_change: true,
            state: PidState::default(),
            terms: PidTerms::default(),
        }
    }

    /// Keep the accumulated integral across setpoint changes.
    pub fn keep_integral_on_setpoint_change(mut self) -> Self {
        self.reset_on_setpoint_change = false;
        self
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn state(&self) -> &PidState {
        &self.state
    }

    pub fn terms(&self) -> PidTerms {
        self.terms
    }

    pub fn reset(&mut self) {
        self.state = PidState::default();
        self.terms = PidTerms::default();
    }

    /// Swap the gains. Accumulated state is dropped, it was built with the old ones.
    pub fn set_gains(&mut self, gains: PidGains) {
        self.gains = gains;
        self.reset();
    }

    fn may_integrate(&self, candidate: f64) -> bool {
        let limit = self.gains.saturation_limit;
        if limit == 0.0 {
            return true;
        }
        let output_unsaturated = self.state.last_output.is_some_and(|out| out.abs() < limit);
        output_unsaturated && (candidate * self.gains.i).abs() < limit
    }
}

impl ControlLaw for Pid {
    fn compute(&mut self, setpoint: f64, pv: f64, timestamp: Timestamp) -> Status<f64> {
        let error = pv - setpoint;
        let dt = self
            .state
            .last_timestamp
            .map(|last| (timestamp - last).num_milliseconds() as f64 / 1000.0)
            .filter(|dt| *dt > 0.0);

        if let Some(dt) = dt {
            let candidate = self.state.integral + error * dt;
            if self.may_integrate(candidate) {
                self.state.integral = candidate;
            }
        }

        let p = error * self.gains.p;
        let i = self.state.integral * self.gains.i;
        let d = match (dt, self.state.last_error) {
            (Some(dt), Some(last)) => (error - last) / dt * self.gains.d,
            _ => 0.0,
        };
        let d = if d.is_finite() { d } else { 0.0 };
        let signal = p + i + d;

        self.state.last_error = Some(error);
        self.state.last_timestamp = Some(timestamp);
        self.state.last_output = Some(signal);
        self.terms = PidTerms { p, i, d };

        Status {
            setpoint,
            error: Some(error),
            signal,
        }
    }

    fn setpoint_changed(&mut self, _old: f64, _new: f64) {
        if self.reset_on_setpoint_change {
            self.state.integral = 0.0;
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use chrono::DateTime;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn integral_term_stays_below_limit(
            errors in prop::collection::vec(-5.0f64..5.0, 1..64),
            i in 0.01f64..2.0,
            limit in 0.1f64..3.0,
        ) {
            let mut pid = Pid::new(PidGains::new(1.0, i, 0.0, limit).unwrap());
            for (n, e) in errors.iter().enumerate() {
                let ts = DateTime::from_timestamp(n as i64 * 30, 0).unwrap();
                pid.compute(0.0, *e, ts);
                prop_assert!(pid.terms().i.abs() < limit);
            }
        }

        #[test]
        fn output_is_sum_of_terms(
            samples in prop::collection::vec((-10.0f64..10.0, 1i64..120), 1..32),
        ) {
            let mut pid = Pid::new(PidGains::new(0.7, 0.01, 3.0, 0.0).unwrap());
            let mut now = 0;
            for (pv, step) in samples {
                now += step;
                let ts = DateTime::from_timestamp(now, 0).unwrap();
                let status = pid.compute(0.0, pv, ts);
                let terms = pid.terms();
                prop_assert!((status.signal - (terms.p + terms.i + terms.d)).abs() < 1e-9);
            }
        }
    }
}
