//! Checkpoint/restart snapshots and the run summary.

pub mod error;
pub mod restart;

pub use error::{IoError, Result};
pub use restart::{load_snapshot, save_snapshot, ElemStateBlob, Snapshot, Summary};
