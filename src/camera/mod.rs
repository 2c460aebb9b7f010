//! Camera description, the crate error type and the projection-model abstraction.
//!
//! A projection model owns the fixed facts about one camera ([`CameraConfig`]) and a
//! vector of calibratable parameters. It converts between three spaces:
//!
//! * pixel space (image coordinates),
//! * a model-specific polar space (normalized angles, or angle/distance pairs),
//! * real-world ground-plane coordinates in meters (`y == 0`).
//!
//! Two model variants are provided: [`RayModel`] and [`PolarModel`].

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::geometry::GEOMETRY_EPSILON;
use crate::optimization::fitness::ErrorDirection;

pub mod polar;
pub mod ray;
pub(crate) mod yaml;

pub use polar::{estimate_reference_pov, PolarModel, PolarParams};
pub use ray::{RayModel, RayParams};

/// Image size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn as_vector(&self) -> Vector2<f64> {
        Vector2::new(self.width as f64, self.height as f64)
    }
}

/// Errors raised while loading inputs, evaluating models or calibrating them.
#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("Missing input: {0}")]
    NullOrMissingInput(String),
    #[error("'{left}' has {left_len} elements but '{right}' has {right_len}")]
    ShapeMismatch {
        left: String,
        left_len: usize,
        right: String,
        right_len: usize,
    },
    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),
    #[error("Parameter file error: {0}")]
    PersistenceFailure(String),
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("Parse error on line {line}: {message}")]
    ParseError { line: usize, message: String },
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for CalibrationError {
    fn from(err: std::io::Error) -> Self {
        CalibrationError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for CalibrationError {
    fn from(err: yaml_rust::ScanError) -> Self {
        CalibrationError::YamlError(err.to_string())
    }
}

/// Fixed extrinsic facts about the camera: where it is and how large its image is.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraConfig {
    position: Vector3<f64>,
    resolution: Resolution,
}

impl CameraConfig {
    /// Creates a camera description.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::InvalidParams`] if the position is not finite or if
    ///   either image dimension is zero (both are used as divisors).
    pub fn new(position: Vector3<f64>, resolution: Resolution) -> Result<Self, CalibrationError> {
        validation::validate_camera(&position, &resolution)?;
        Ok(Self {
            position,
            resolution,
        })
    }

    pub fn position(&self) -> &Vector3<f64> {
        &self.position
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Camera position projected onto the ground plane.
    pub fn ground_position(&self) -> Vector3<f64> {
        Vector3::new(self.position.x, 0.0, self.position.z)
    }

    /// Height of the camera above the ground plane.
    pub fn height(&self) -> f64 {
        self.position.y
    }
}

/// Closed search interval for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lo: f64,
    pub hi: f64,
}

impl Bounds {
    pub fn new(lo: f64, hi: f64) -> Result<Self, CalibrationError> {
        if !lo.is_finite() || !hi.is_finite() {
            return Err(CalibrationError::InvalidParams(format!(
                "bounds [{lo}, {hi}] must be finite"
            )));
        }
        if lo > hi {
            return Err(CalibrationError::InvalidParams(format!(
                "lower bound {lo} is above upper bound {hi}"
            )));
        }
        Ok(Self { lo, hi })
    }

    pub fn width(&self) -> f64 {
        self.hi - self.lo
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lo && value <= self.hi
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.lo, self.hi)
    }

    /// A zero-width interval pins the parameter to a single value.
    pub fn is_fixed(&self) -> bool {
        self.width() == 0.0
    }

    pub fn midpoint(&self) -> f64 {
        0.5 * (self.lo + self.hi)
    }
}

/// One row of a model's bounds table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub bounds: Bounds,
}

/// Axis-aligned box constraining a point-of-view position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PovBox {
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
}

impl PovBox {
    pub fn new(min: Vector3<f64>, max: Vector3<f64>) -> Result<Self, CalibrationError> {
        for axis in 0..3 {
            Bounds::new(min[axis], max[axis]).map_err(|_| {
                CalibrationError::InvalidParams(format!(
                    "point-of-view box is empty along axis {axis}: min {} > max {}",
                    min[axis], max[axis]
                ))
            })?;
        }
        Ok(Self { min, max })
    }

    pub fn center(&self) -> Vector3<f64> {
        (self.min + self.max) * 0.5
    }

    pub fn axis_bounds(&self, axis: usize) -> Bounds {
        Bounds {
            lo: self.min[axis],
            hi: self.max[axis],
        }
    }
}

impl Default for PovBox {
    /// Point of view anywhere in a 10 x 20 m vertical slab at `z == 0`.
    fn default() -> Self {
        Self {
            min: Vector3::zeros(),
            max: Vector3::new(10.0, 20.0, 0.0),
        }
    }
}

/// Trait implemented by every calibratable ground-plane projection model.
///
/// The four primitive transforms are
/// `pixel -> polar -> real` and `real -> polar -> pixel`; the composed maps
/// [`ProjectionModel::pixel_to_real`] and [`ProjectionModel::real_to_pixel`] are
/// what the fitness evaluator and the reports use.
///
/// Models are cloned once per candidate during parallel evaluation, so cloning
/// must be cheap and must not share mutable state.
pub trait ProjectionModel: Clone + Send + Sync {
    /// Short identifier written to model files ("ray", "polar").
    fn model_name(&self) -> &'static str;

    fn camera(&self) -> &CameraConfig;

    /// Bounds table: one entry per parameter index, in parameter-vector order.
    fn param_specs(&self) -> Vec<ParamSpec>;

    /// Current parameter vector, in the order of [`ProjectionModel::param_specs`].
    fn params(&self) -> Vec<f64>;

    /// Replaces the parameter vector.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::ShapeMismatch`] if `values` has the wrong length.
    fn set_params(&mut self, values: &[f64]) -> Result<(), CalibrationError>;

    /// Space in which this model's calibration error is measured.
    fn calibration_direction(&self) -> ErrorDirection;

    fn pixel_to_polar(&self, pixel: &Vector2<f64>) -> Result<Vector2<f64>, CalibrationError>;

    fn polar_to_real(&self, polar: &Vector2<f64>) -> Result<Vector3<f64>, CalibrationError>;

    fn real_to_polar(&self, real: &Vector3<f64>) -> Result<Vector2<f64>, CalibrationError>;

    fn polar_to_pixel(&self, polar: &Vector2<f64>) -> Result<Vector2<f64>, CalibrationError>;

    /// Maps an image position to the ground plane.
    fn pixel_to_real(&self, pixel: &Vector2<f64>) -> Result<Vector3<f64>, CalibrationError> {
        let polar = self.pixel_to_polar(pixel)?;
        self.polar_to_real(&polar)
    }

    /// Maps a ground-plane position to the image.
    fn real_to_pixel(&self, real: &Vector3<f64>) -> Result<Vector2<f64>, CalibrationError> {
        let polar = self.real_to_polar(real)?;
        self.polar_to_pixel(&polar)
    }

    /// Checks that every parameter is finite.
    fn validate_params(&self) -> Result<(), CalibrationError> {
        validation::validate_finite(&self.param_specs(), &self.params())
    }

    fn save_to_yaml(&self, path: &str) -> Result<(), CalibrationError>;

    fn load_from_yaml(path: &str) -> Result<Self, CalibrationError>
    where
        Self: Sized;
}

/// Common validation functions for cameras and parameter vectors
pub mod validation {
    use super::*;

    pub fn validate_camera(
        position: &Vector3<f64>,
        resolution: &Resolution,
    ) -> Result<(), CalibrationError> {
        if !position.iter().all(|v| v.is_finite()) {
            return Err(CalibrationError::InvalidParams(format!(
                "camera position {position:?} must be finite"
            )));
        }
        if resolution.width == 0 || resolution.height == 0 {
            return Err(CalibrationError::InvalidParams(format!(
                "image size {}x{} must be strictly positive",
                resolution.width, resolution.height
            )));
        }
        Ok(())
    }

    pub fn validate_len(
        name: &str,
        values: &[f64],
        expected: usize,
    ) -> Result<(), CalibrationError> {
        if values.len() != expected {
            return Err(CalibrationError::ShapeMismatch {
                left: name.to_string(),
                left_len: values.len(),
                right: "parameter specs".to_string(),
                right_len: expected,
            });
        }
        Ok(())
    }

    pub fn validate_finite(specs: &[ParamSpec], values: &[f64]) -> Result<(), CalibrationError> {
        for (spec, value) in specs.iter().zip(values) {
            if !value.is_finite() {
                return Err(CalibrationError::InvalidParams(format!(
                    "parameter '{}' is not finite ({value})",
                    spec.name
                )));
            }
        }
        Ok(())
    }

    /// Rejects a denominator whose magnitude is below the geometry epsilon.
    pub fn require_nonzero(value: f64, what: &str) -> Result<f64, CalibrationError> {
        if !value.is_finite() || value.abs() < GEOMETRY_EPSILON {
            return Err(CalibrationError::DegenerateGeometry(format!(
                "{what} is too close to zero ({value})"
            )));
        }
        Ok(value)
    }
}
