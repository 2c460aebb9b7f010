//! Ground Plane Tools Library
//!
//! Calibrates a fixed camera against the ground plane from a handful of known
//! pixel/world correspondences (landmarks such as the bases of a field), so
//! that image positions can be converted to ground positions and back.
//!
//! Two projection models are provided:
//! - Ray / up-vector model ([`RayModel`]), calibrated in meters
//! - Polar angle/distance model ([`PolarModel`]), calibrated in pixels
//!
//! Parameters are recovered by a gradient-free evolutionary search
//! ([`GeneticAlgorithm`] behind the [`EvolutionaryOptimizer`] trait) driven by
//! a [`CalibrationDriver`] that scores each generation in parallel.

pub mod camera;
pub mod geometry;
pub mod io;
pub mod optimization;
pub mod util;

// Re-export commonly used types
pub use camera::{
    estimate_reference_pov, Bounds, CalibrationError, CameraConfig, ParamSpec, PolarModel,
    PolarParams, PovBox, ProjectionModel, RayModel, RayParams, Resolution,
};

pub use io::CalibrationInput;

pub use optimization::{
    CalibrationConfig, CalibrationDriver, CalibrationResult, Correspondences, ErrorDirection,
    EvolutionaryOptimizer, FitnessEvaluator, GeneticAlgorithm, InverseSearchConfig, LogProgress,
    Termination,
};
