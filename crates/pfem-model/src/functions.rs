//! Named time-space functions.
//!
//! Boundary conditions, element conditions and initial values all refer to
//! functions by name; the registry resolves names once at stage-build time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{ModelError, Result};

/// A time-space scalar function f(t, x)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Func {
    /// Constant: f = c
    Cte { c: f64 },
    /// Linear in time: f = m·t + c
    Lin { m: f64, c: f64 },
    /// Linear ramp from ca at ta to cb at tb, clamped outside [ta, tb]
    Rmp { ca: f64, cb: f64, ta: f64, tb: f64 },
    /// Piecewise-linear interpolation over sample points (t must ascend)
    Pts { t: Vec<f64>, y: Vec<f64> },
    /// Linear in space: f = c + g·x (time-independent)
    Grad { c: f64, g: Vec<f64> },
    /// Identically zero
    Zero,
}

impl Func {
    /// Evaluate at time t and position x
    pub fn f(&self, t: f64, x: &[f64]) -> f64 {
        match self {
            Func::Cte { c } => *c,
            Func::Lin { m, c } => m * t + c,
            Func::Rmp { ca, cb, ta, tb } => {
                if t <= *ta {
                    *ca
                } else if t >= *tb {
                    *cb
                } else {
                    ca + (cb - ca) * (t - ta) / (tb - ta)
                }
            }
            Func::Pts { t: ts, y: ys } => {
                if ts.is_empty() {
                    return 0.0;
                }
                if t <= ts[0] {
                    return ys[0];
                }
                if t >= ts[ts.len() - 1] {
                    return ys[ys.len() - 1];
                }
                let i = ts.partition_point(|&ti| ti <= t) - 1;
                let w = (t - ts[i]) / (ts[i + 1] - ts[i]);
                ys[i] + w * (ys[i + 1] - ys[i])
            }
            Func::Grad { c, g } => {
                let mut v = *c;
                for (gi, xi) in g.iter().zip(x.iter()) {
                    v += gi * xi;
                }
                v
            }
            Func::Zero => 0.0,
        }
    }
}

/// Registry of named functions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FuncRegistry {
    map: HashMap<String, Func>,
}

impl FuncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, f: Func) {
        self.map.insert(name.to_string(), f);
    }

    /// Fetch a function by name. The empty name resolves to zero.
    pub fn get(&self, name: &str) -> Result<Func> {
        if name.is_empty() {
            return Ok(Func::Zero);
        }
        self.map
            .get(name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownFunction(name.to_string()))
    }
}
