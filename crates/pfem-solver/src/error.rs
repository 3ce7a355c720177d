//! Error types for the simulation core.
//!
//! Element methods fail loudly with local context (cell id, integration
//! point); the driver recovers coarsely by restoring state and cutting Δt.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SolverError>;

#[derive(Error, Debug)]
pub enum SolverError {
    /// Bad input: missing material, missing face tag, wrong DOF count,
    /// incompatible LBB sub-shape. Fatal to the stage.
    #[error("input error: {0}")]
    Input(String),

    /// Negative Jacobian or degenerate geometry at an integration point.
    /// Fatal to the current iteration; the driver may retry with smaller Δt.
    #[error("geometric error in cell {cid} at ip {ip}: {reason}")]
    Geometric { cid: usize, ip: usize, reason: String },

    /// Material update diverged or produced an invalid state.
    /// Fatal to the current iteration; same recovery path.
    #[error("constitutive error in cell {cid} at ip {ip}: {reason}")]
    Constitutive { cid: usize, ip: usize, reason: String },

    /// The linear solver failed. Fatal to the run.
    #[error("linear solver error: {0}")]
    LinSolver(String),

    /// Checkpoint does not match the freshly built domain. Fatal.
    #[error("restart mismatch: {0}")]
    Restart(String),

    /// Newton failed to converge and divergence control is exhausted.
    #[error("solver did not converge: {0}")]
    Convergence(String),

    #[error(transparent)]
    Model(#[from] pfem_model::ModelError),

    #[error(transparent)]
    Io(#[from] pfem_io::IoError),

    #[error("state encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}
