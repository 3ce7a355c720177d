//! Data model for the pfem multi-physics finite element solver.
//!
//! This crate holds everything the simulation core consumes but does not
//! own: the mesh, the material-parameter records and constitutive models,
//! the named time-space functions, and the simulation-input document.

pub mod functions;
pub mod materials;
pub mod mesh;
pub mod sim;

pub use functions::{Func, FuncRegistry};
pub use materials::{
    Fluid, LgsCoefs, LinElast, MatRegistry, Material, MaterialModel, Porous, Retention, Thermal,
};
pub use mesh::{Cell, FaceCond, Mesh, MeshStatistics, ShapeKind, Vert};
pub use sim::{
    EleCond, ElemData, FaceBc, IniLayer, IniPorous, IniSource, NodeBc, Region, Sim, SolverData,
    Stage, StageControl,
};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ModelError>;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("mesh error: {0}")]
    Mesh(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("unknown material: {0}")]
    UnknownMaterial(String),

    #[error("material '{name}' is not usable as {wanted}")]
    MaterialKind { name: String, wanted: &'static str },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
