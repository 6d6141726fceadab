//! Geometry: frame/render coordinate conversion and the planar pose solver.

pub mod coords;
pub mod posit;

pub use coords::{frame_to_render, marker_to_render};
pub use posit::{
    PoseEstimate, PoseSolver, PositSolver, Solution, SolverFactory, SolverParams, posit_factory,
};
