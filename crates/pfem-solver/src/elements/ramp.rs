//! Ramp functions regularizing the unilateral seepage-face constraint.

use pfem_model::sim::{keycode_f64, keycode_flag};

/// Macaulay bracket or its smooth approximation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ramp {
    /// max(0, x)
    Macaulay,
    /// x + ln(1 + e^(−βx))/β; tends to the Macaulay bracket as β grows
    Smooth { beta: f64 },
}

impl Ramp {
    /// Pick the ramp from a key-coded extra string ("!sramp !beta:80")
    pub fn from_extra(extra: &str) -> Self {
        if keycode_flag(extra, "sramp") {
            Ramp::Smooth { beta: keycode_f64(extra, "beta").unwrap_or(100.0) }
        } else {
            Ramp::Macaulay
        }
    }

    pub fn eval(&self, x: f64) -> f64 {
        match *self {
            Ramp::Macaulay => x.max(0.0),
            Ramp::Smooth { beta } => {
                if -beta * x > 500.0 {
                    0.0
                } else if beta * x > 500.0 {
                    x
                } else {
                    x + (1.0 + (-beta * x).exp()).ln() / beta
                }
            }
        }
    }

    pub fn deriv(&self, x: f64) -> f64 {
        match *self {
            Ramp::Macaulay => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Ramp::Smooth { beta } => {
                if -beta * x > 500.0 {
                    0.0
                } else if beta * x > 500.0 {
                    1.0
                } else {
                    1.0 / (1.0 + (-beta * x).exp())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macaulay_bracket() {
        let r = Ramp::Macaulay;
        assert_eq!(r.eval(-2.0), 0.0);
        assert_eq!(r.eval(3.0), 3.0);
        assert_eq!(r.deriv(-2.0), 0.0);
        assert_eq!(r.deriv(3.0), 1.0);
    }

    #[test]
    fn smooth_ramp_approaches_macaulay() {
        let r = Ramp::Smooth { beta: 500.0 };
        assert!(r.eval(-0.5).abs() < 1e-3);
        assert!((r.eval(0.5) - 0.5).abs() < 1e-3);
    }

    #[test]
    fn smooth_ramp_derivative_matches_finite_difference() {
        let r = Ramp::Smooth { beta: 50.0 };
        for x in [-0.2, 0.0, 0.1, 0.7] {
            let h = 1e-7;
            let fd = (r.eval(x + h) - r.eval(x - h)) / (2.0 * h);
            assert!((r.deriv(x) - fd).abs() < 1e-6, "x = {x}");
        }
    }

    #[test]
    fn from_extra_selects_smooth() {
        assert_eq!(Ramp::from_extra(""), Ramp::Macaulay);
        assert_eq!(Ramp::from_extra("!sramp !beta:80"), Ramp::Smooth { beta: 80.0 });
        assert_eq!(Ramp::from_extra("!sramp"), Ramp::Smooth { beta: 100.0 });
    }
}
