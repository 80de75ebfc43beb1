use crate::CoreError;

/// Temperatures, demands and gains.
pub type Real = f64;

/// Absolute and relative comparison bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tolerances {
    pub abs: Real,
    pub rel: Real,
}

impl Tolerances {
    /// Sensors rarely resolve better than a hundredth of a degree.
    pub const TEMPERATURE: Tolerances = Tolerances {
        abs: 1e-3,
        rel: 0.0,
    };
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            abs: 1e-12,
            rel: 1e-9,
        }
    }
}

pub fn nearly_equal(a: Real, b: Real, tol: Tolerances) -> bool {
    let diff = (a - b).abs();
    diff <= tol.abs || diff <= tol.rel * a.abs().max(b.abs())
}

pub fn ensure_finite(value: Real, what: &'static str) -> Result<Real, CoreError> {
    if value.is_finite() {
        return Ok(value);
    }
    Err(CoreError::NonFinite { what, value })
}

/// Demand, fan speed and power levels all live in `[0, 1]`.
pub fn ensure_unit_interval(value: Real, what: &'static str) -> Result<Real, CoreError> {
    match ensure_finite(value, what)? {
        v if (0.0..=1.0).contains(&v) => Ok(v),
        v => Err(CoreError::OutOfRange { what, value: v }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tolerance_is_tight() {
        let tol = Tolerances::default();
        assert!(nearly_equal(22.0, 22.0 + 1e-12, tol));
        assert!(nearly_equal(0.0, 1e-13, tol));
        assert!(!nearly_equal(22.0, 22.0 + 1e-6, tol));
    }

    #[test]
    fn temperature_tolerance_ignores_sensor_noise() {
        assert!(nearly_equal(21.5, 21.5004, Tolerances::TEMPERATURE));
        assert!(!nearly_equal(21.5, 21.51, Tolerances::TEMPERATURE));
    }

    #[test]
    fn ensure_finite_names_the_value() {
        let err = ensure_finite(Real::NAN, "setpoint").unwrap_err();
        assert!(matches!(err, CoreError::NonFinite { what: "setpoint", .. }));
    }

    #[test]
    fn unit_interval_bounds() {
        assert_eq!(ensure_unit_interval(0.0, "demand").unwrap(), 0.0);
        assert_eq!(ensure_unit_interval(1.0, "demand").unwrap(), 1.0);
        assert!(matches!(
            ensure_unit_interval(1.01, "demand"),
            Err(CoreError::OutOfRange { what: "demand", .. })
        ));
        assert!(ensure_unit_interval(-0.1, "demand").is_err());
        assert!(ensure_unit_interval(Real::INFINITY, "demand").is_err());
    }
}
