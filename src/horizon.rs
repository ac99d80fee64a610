//! Horizon schedule mapping wall time to the prediction horizon length.

use std::fmt;

use crate::Error;

/// Prediction horizon of the receding-horizon problem.
///
/// With `alpha > 0` the horizon grows from zero at the anchor time `t0`
/// towards its final length `tf` as `tf * (1 - exp(-alpha * (t - t0)))`,
/// which avoids ill-posed problems right after startup. With `alpha == 0`
/// the length is the constant `tf`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Horizon {
    tf: f64,
    alpha: f64,
    t0: f64,
}

impl Horizon {
    /// Creates a horizon of final length `tf`, growing at rate `alpha` from
    /// anchor time zero. `alpha == 0` gives a fixed-length horizon.
    pub fn new(tf: f64, alpha: f64) -> Result<Self, Error> {
        if !(tf > 0.0) {
            return Err(Error::NonPositiveHorizonLength(tf));
        }
        Ok(Self { tf, alpha, t0: 0.0 })
    }

    /// Moves the anchor time of a growing horizon.
    pub fn anchored_at(mut self, t0: f64) -> Self {
        self.t0 = t0;
        self
    }

    /// The horizon length `T(t)`.
    ///
    /// Monotone non-decreasing in `t`, bounded by the final length, and
    /// saturated at zero for `t` before the anchor time.
    #[inline]
    pub fn length(&self, t: f64) -> f64 {
        if self.alpha > 0.0 {
            self.tf * (1.0 - (-self.alpha * (t - self.t0)).exp()).max(0.0)
        } else {
            self.tf
        }
    }

    /// Re-anchors a growing horizon at `t0`, restarting the growth.
    pub fn reset(&mut self, t0: f64) {
        self.t0 = t0;
    }

    /// The final (nominal) horizon length.
    pub fn final_length(&self) -> f64 {
        self.tf
    }

    /// Whether the horizon length varies with time.
    pub fn is_growing(&self) -> bool {
        self.alpha > 0.0
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Horizon: Tf = {}, alpha = {}, t0 = {}",
            self.tf, self.alpha, self.t0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fixed_horizon_is_constant() {
        let horizon = Horizon::new(2.0, 0.0).unwrap();
        assert_eq!(horizon.length(0.0), 2.0);
        assert_eq!(horizon.length(123.4), 2.0);
        assert!(!horizon.is_growing());
    }

    #[test]
    fn growing_horizon_matches_exponential_profile() {
        let horizon = Horizon::new(2.0, 1.0).unwrap();
        assert_eq!(horizon.length(0.0), 0.0);
        assert_relative_eq!(
            horizon.length(1.0),
            2.0 * (1.0 - (-1.0f64).exp()),
            max_relative = 1e-12
        );
        assert_relative_eq!(horizon.length(100.0), 2.0, max_relative = 1e-12);
    }

    #[test]
    fn growing_horizon_is_monotone_and_bounded() {
        let horizon = Horizon::new(1.5, 0.7).unwrap().anchored_at(3.0);
        let mut prev = 0.0;
        for k in 0..200 {
            let t = 3.0 + 0.1 * k as f64;
            let len = horizon.length(t);
            assert!(len >= prev);
            assert!(len <= 1.5);
            prev = len;
        }
    }

    #[test]
    fn growing_horizon_saturates_before_anchor() {
        let horizon = Horizon::new(2.0, 1.0).unwrap().anchored_at(5.0);
        assert_eq!(horizon.length(0.0), 0.0);
        assert_eq!(horizon.length(5.0), 0.0);
    }

    #[test]
    fn reset_restarts_growth() {
        let mut horizon = Horizon::new(2.0, 1.0).unwrap();
        assert!(horizon.length(10.0) > 1.9);
        horizon.reset(10.0);
        assert_eq!(horizon.length(10.0), 0.0);
    }

    #[test]
    fn rejects_non_positive_final_length() {
        assert_eq!(
            Horizon::new(0.0, 1.0),
            Err(Error::NonPositiveHorizonLength(0.0))
        );
        assert_eq!(
            Horizon::new(-1.0, 0.0),
            Err(Error::NonPositiveHorizonLength(-1.0))
        );
    }
}
