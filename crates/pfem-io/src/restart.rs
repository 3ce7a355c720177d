use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IoError, Result};

/// Encoded internal-variable arrays of one element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElemStateBlob {
    /// Cell id
    pub cid: usize,
    /// Opaque element-encoded state
    pub data: serde_json::Value,
}

/// One per-tidx snapshot of the full solution state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub schema_version: u32,
    /// Output index
    pub tidx: usize,
    /// Stage index
    pub stage: usize,
    pub time: f64,
    pub dt: f64,
    pub y: Vec<f64>,
    pub dydt: Vec<f64>,
    pub d2ydt2: Vec<f64>,
    pub psi: Vec<f64>,
    pub zet: Vec<f64>,
    pub chi: Vec<f64>,
    pub lam: Vec<f64>,
    pub elem_states: Vec<ElemStateBlob>,
}

impl Snapshot {
    pub fn ny(&self) -> usize {
        self.y.len()
    }
}

/// Output times and stage boundaries of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub out_times: Vec<f64>,
    /// First tidx of each stage
    pub stage_tidx: Vec<usize>,
}

impl Summary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let path = dir.as_ref().join("summary.json");
        write_json(&path, self)
    }

    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        read_json(&dir.as_ref().join("summary.json"))
    }
}

fn snapshot_path(dir: &Path, tidx: usize) -> PathBuf {
    dir.join(format!("state-{tidx:06}.json"))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec(value)?;
    fs::write(path, bytes)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            IoError::NotFound(path.display().to_string())
        } else {
            IoError::Io(e)
        }
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Write one snapshot under the output directory
pub fn save_snapshot(dir: impl AsRef<Path>, snap: &Snapshot) -> Result<()> {
    write_json(&snapshot_path(dir.as_ref(), snap.tidx), snap)
}

/// Read one snapshot; `expect_ny` guards restart into a mismatched domain
pub fn load_snapshot(dir: impl AsRef<Path>, tidx: usize, expect_ny: usize) -> Result<Snapshot> {
    let snap: Snapshot = read_json(&snapshot_path(dir.as_ref(), tidx))?;
    if snap.ny() != expect_ny {
        return Err(IoError::InvalidData(format!(
            "snapshot has ny = {} but the domain has ny = {}",
            snap.ny(),
            expect_ny
        )));
    }
    Ok(snap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        Snapshot {
            schema_version: 1,
            tidx: 123,
            stage: 0,
            time: 1.25,
            dt: 0.25,
            y: vec![0.1, -2.3, 9.9],
            dydt: vec![0.0, 1.0, 2.0],
            d2ydt2: vec![0.0; 3],
            psi: vec![0.5; 3],
            zet: vec![0.0; 3],
            chi: vec![0.0; 3],
            lam: vec![7.0],
            elem_states: vec![ElemStateBlob { cid: 0, data: serde_json::json!({"sl": [0.9, 0.8]}) }],
        }
    }

    #[test]
    fn snapshot_roundtrip_is_bitwise() {
        let dir = tempfile::tempdir().unwrap();
        let snap = sample();
        save_snapshot(dir.path(), &snap).unwrap();
        let loaded = load_snapshot(dir.path(), 123, 3).unwrap();
        assert_eq!(loaded, snap);
    }

    #[test]
    fn ny_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        save_snapshot(dir.path(), &sample()).unwrap();
        let err = load_snapshot(dir.path(), 123, 4).unwrap_err();
        assert!(matches!(err, IoError::InvalidData(_)));
    }

    #[test]
    fn missing_snapshot_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_snapshot(dir.path(), 7, 3).unwrap_err();
        assert!(matches!(err, IoError::NotFound(_)));
    }

    #[test]
    fn summary_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut sum = Summary::new();
        sum.out_times = vec![0.0, 0.5, 1.0];
        sum.stage_tidx = vec![0];
        sum.save(dir.path()).unwrap();
        assert_eq!(Summary::load(dir.path()).unwrap(), sum);
    }
}
