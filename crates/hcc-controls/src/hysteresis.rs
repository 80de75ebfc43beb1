//! Hysteresis (bang-bang with dead band) control law.

use hcc_core::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};
use crate::law::{ControlLaw, Status};

/// Dead band offsets relative to the setpoint. `low < 0 < high`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HysteresisThresholds {
    pub low: f64,
    pub high: f64,
}

impl HysteresisThresholds {
    pub fn new(low: f64, high: f64) -> ControlResult<Self> {
        if !low.is_finite() {
            return Err(ControlError::NonFinite { what: "low", value: low });
        }
        if !high.is_finite() {
            return Err(ControlError::NonFinite {
                what: "high",
                value: high,
            });
        }
        if low >= 0.0 {
            return Err(ControlError::InvalidArg {
                what: "low threshold must be negative",
            });
        }
        if high <= 0.0 {
            return Err(ControlError::InvalidArg {
                what: "high threshold must be positive",
            });
        }
        Ok(Self { low, high })
    }

    /// `±width` around the setpoint.
    pub fn symmetric(width: f64) -> ControlResult<Self> {
        Self::new(-width, width)
    }
}

impl Default for HysteresisThresholds {
    fn default() -> Self {
        Self {
            low: -1.0,
            high: 1.0,
        }
    }
}

/// Emits `-1` until the process variable reaches `setpoint + high`, then `+1`
/// until it falls back to `setpoint + low`.
#[derive(Debug, Clone, PartialEq)]
pub struct Hysteresis {
    thresholds: HysteresisThresholds,
    state: f64,
}

impl Hysteresis {
    pub fn new(thresholds: HysteresisThresholds) -> Self {
        Self {
            thresholds,
            state: -1.0,
        }
    }

    pub fn thresholds(&self) -> HysteresisThresholds {
        self.thresholds
    }

    /// Last output sign.
    pub fn state(&self) -> f64 {
        self.state
    }

    /// Back to the initial `-1`.
    pub fn reset(&mut self) {
        self.state = -1.0;
    }

    /// Next output sign given the previous one.
    pub fn update(&self, state: f64, pv: f64, setpoint: f64) -> f64 {
        if state < 0.0 {
            if pv - self.thresholds.high >= setpoint {
                1.0
            } else {
                -1.0
            }
        } else if pv - self.thresholds.low <= setpoint {
            -1.0
        } else {
            1.0
        }
    }
}

impl Default for Hysteresis {
    fn default() -> Self {
        Self::new(HysteresisThresholds::default())
    }
}

impl ControlLaw for Hysteresis {
    fn compute(&mut self, setpoint: f64, pv: f64, _timestamp: Timestamp) -> Status<f64> {
        self.state = self.update(self.state, pv, setpoint);
        Status {
            setpoint,
            error: Some(pv - setpoint),
            signal: self.state,
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn no_flip_inside_dead_band(
            start in prop_oneof![Just(-1.0), Just(1.0)],
            samples in prop::collection::vec(-0.99f64..0.99, 1..64),
        ) {
            let law = Hysteresis::default();
            let mut state = start;
            for offset in samples {
                let next = law.update(state, 20.0 + offset, 20.0);
                prop_assert_eq!(next, state);
                state = next;
            }
        }

        #[test]
        fn flips_only_beyond_the_band(samples in prop::collection::vec(15.0f64..25.0, 1..128)) {
            let law = Hysteresis::default();
            let mut state = -1.0;
            for pv in samples {
                let next = law.update(state, pv, 20.0);
                if next != state {
                    if next > 0.0 {
                        prop_assert!(pv >= 21.0);
                    } else {
                        prop_assert!(pv <= 19.0);
                    }
                }
                state = next;
            }
        }

        #[test]
        fn one_flip_per_crossing(low in 15.0f64..18.9, high in 21.1f64..25.0, cycles in 1usize..10) {
            let law = Hysteresis::default();
            let mut state = -1.0;
            let mut flips = 0;
            for _ in 0..cycles {
                for pv in [high, high, 20.0, low, low, 20.0] {
                    let next = law.update(state, pv, 20.0);
                    if next != state {
                        flips += 1;
                    }
                    state = next;
                }
            }
            prop_assert_eq!(flips, cycles * 2);
        }
    }
}
