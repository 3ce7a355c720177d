//! Integration points and the per-element output map.

use std::collections::HashMap;

/// A quadrature point in natural coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ip {
    pub r: f64,
    pub s: f64,
    pub t: f64,
    /// Quadrature weight
    pub w: f64,
}

impl Ip {
    pub const fn new(r: f64, s: f64, t: f64, w: f64) -> Self {
        Self { r, s, t, w }
    }
}

/// Read-only geometric record of one integration point, for output
#[derive(Debug, Clone)]
pub struct IpRecord {
    /// Natural coordinates and weight
    pub ip: Ip,
    /// Real coordinates
    pub x: Vec<f64>,
    /// Cell id
    pub cid: usize,
    /// Element index within the domain
    pub eid: usize,
}

/// Open-ended map from string key to a dense per-ip vector.
///
/// Elements publish whatever scalars they carry; the engine never
/// interprets the keys. Conventional keys: pl, pg, sl, nwlx/nwly/nwlz,
/// nwgx/nwgy/nwgz, sx/sy/sz/sxy, M22, M11, T00.
#[derive(Debug, Clone, Default)]
pub struct IpsMap {
    map: HashMap<String, Vec<f64>>,
}

impl IpsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one value; allocates a zero-filled vector of length nip on
    /// the first write for that key
    pub fn set(&mut self, key: &str, idx: usize, nip: usize, val: f64) {
        let v = self.map.entry(key.to_string()).or_insert_with(|| vec![0.0; nip]);
        v[idx] = val;
    }

    /// Read one value; missing keys read as zero
    pub fn get(&self, key: &str, idx: usize) -> f64 {
        self.map.get(key).map(|v| v[idx]).unwrap_or(0.0)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.map.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_write_allocates_zero_filled() {
        let mut m = IpsMap::new();
        m.set("sl", 2, 4, 0.9);
        assert_eq!(m.get("sl", 0), 0.0);
        assert_eq!(m.get("sl", 2), 0.9);
    }

    #[test]
    fn missing_key_reads_zero() {
        let m = IpsMap::new();
        assert_eq!(m.get("pg", 7), 0.0);
    }
}
