//! Crossfade curve families
//!
//! - EqualPower: outgoing = cos(θ), incoming = sin(θ), θ ∈ [0, π/2].
//!   cos² + sin² = 1 keeps perceived energy constant across the fade.
//! - Sinusoidal: raised-cosine S-curve, incoming = 0.5·(1 − cos πt),
//!   outgoing = 1 − incoming. Amplitudes sum to 1, suited to correlated
//!   material such as a loop crossfading into itself.

use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};

/// Curve family used for a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveFamily {
    #[default]
    EqualPower,
    Sinusoidal,
}

impl CurveFamily {
    /// (outgoing, incoming) gains at normalized position `t` ∈ [0, 1]
    #[inline]
    pub fn gains(&self, t: f64) -> (f64, f64) {
        let t = t.clamp(0.0, 1.0);
        match self {
            CurveFamily::EqualPower => {
                let theta = t * FRAC_PI_2;
                (theta.cos(), theta.sin())
            }
            CurveFamily::Sinusoidal => {
                let fade_in = 0.5 * (1.0 - (PI * t).cos());
                (1.0 - fade_in, fade_in)
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CurveFamily::EqualPower => "equal_power",
            CurveFamily::Sinusoidal => "sinusoidal",
        }
    }
}

/// Normalized position of sample `i` in a fade of `len` samples
///
/// Runs from 0 at the first sample to 1 at the last.
#[inline]
pub fn fade_position(i: usize, len: usize) -> f64 {
    if len <= 1 {
        1.0
    } else {
        i as f64 / (len - 1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_equal_power_sums_to_unit_energy() {
        let len = 22050;
        for i in 0..len {
            let (out, inc) = CurveFamily::EqualPower.gains(fade_position(i, len));
            assert_relative_eq!(out * out + inc * inc, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_curve_endpoints() {
        for curve in [CurveFamily::EqualPower, CurveFamily::Sinusoidal] {
            let (out, inc) = curve.gains(0.0);
            assert_relative_eq!(out, 1.0);
            assert_relative_eq!(inc, 0.0);
            let (out, inc) = curve.gains(1.0);
            assert_relative_eq!(out, 0.0, epsilon = 1e-12);
            assert_relative_eq!(inc, 1.0);
        }
    }

    #[test]
    fn test_sinusoidal_amplitudes_sum_to_one() {
        for i in 0..=100 {
            let (out, inc) = CurveFamily::Sinusoidal.gains(i as f64 / 100.0);
            assert_relative_eq!(out + inc, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_equal_power_midpoint() {
        let (out, inc) = CurveFamily::EqualPower.gains(0.5);
        assert_relative_eq!(out, std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-12);
        assert_relative_eq!(inc, std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-12);
    }
}
