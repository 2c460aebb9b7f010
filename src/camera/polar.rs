//! Implements the polar ground-plane model.
//!
//! Ground points are described relative to the camera's ground position by an
//! angle (measured against a fixed reference point of view) and a distance. The
//! image position follows from a tilted-plane perspective law:
//!
//! ```text
//! phi = π/2 - angle
//! ry  = f * (tan θ - tan(θ - atan(dist / h)))
//! x   = ox + sx * dist * cos(phi)
//! y   = oy - sy * ry * sin(phi)
//! ```
//!
//! where `h` is the camera height. The pixel -> polar direction has no closed
//! form and is solved with a nested [`InverseSearch`].

use nalgebra::{Vector2, Vector3};
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use super::yaml::{write_cam0, Cam0Document};
use super::{
    validation, Bounds, CalibrationError, CameraConfig, ParamSpec, ProjectionModel, Resolution,
};
use crate::geometry::{ground_distance, rotate_about_vertical, signed_ground_angle};
use crate::optimization::fitness::ErrorDirection;
use crate::optimization::{Correspondences, InverseSearch, InverseSearchConfig};

/// Named parameters of a [`PolarModel`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolarParams {
    /// Camera tilt
    pub theta: f64,
    pub focal: f64,
    pub sx: f64,
    pub sy: f64,
    /// Image position of the vanishing construction
    pub ox: f64,
    pub oy: f64,
}

impl PolarParams {
    pub const COUNT: usize = 6;

    pub fn to_vec(&self) -> Vec<f64> {
        vec![self.theta, self.focal, self.sx, self.sy, self.ox, self.oy]
    }

    pub fn from_slice(values: &[f64]) -> Result<Self, CalibrationError> {
        validation::validate_len("polar parameters", values, Self::COUNT)?;
        Ok(Self {
            theta: values[0],
            focal: values[1],
            sx: values[2],
            sy: values[3],
            ox: values[4],
            oy: values[5],
        })
    }
}

/// Polar (angle, distance) projection model.
#[derive(Debug, Clone, PartialEq)]
pub struct PolarModel {
    camera: CameraConfig,
    reference_pov: Vector3<f64>,
    pub params: PolarParams,
    inverse: InverseSearchConfig,
    search_bounds: [Bounds; 2],
}

impl PolarModel {
    /// Creates a polar model whose angles are measured against `reference_pov`.
    ///
    /// # Arguments
    ///
    /// * `camera` - Camera position and image size
    /// * `reference_pov` - Ground point defining angle zero, usually obtained
    ///   from [`estimate_reference_pov`]
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::DegenerateGeometry`] if `reference_pov` lies on the
    ///   camera's vertical, which leaves angle zero undefined.
    pub fn new(camera: CameraConfig, reference_pov: Vector3<f64>) -> Result<Self, CalibrationError> {
        validation::require_nonzero(
            ground_distance(&reference_pov, &camera.ground_position()),
            "distance from camera to reference point of view",
        )?;
        let size = camera.resolution().as_vector();
        Ok(Self {
            camera,
            reference_pov,
            params: PolarParams {
                theta: FRAC_PI_4,
                focal: 50.0,
                sx: 1.0,
                sy: 1.0,
                ox: 0.5 * size.x,
                oy: 2.0 * size.y,
            },
            inverse: InverseSearchConfig::default(),
            search_bounds: [
                Bounds {
                    lo: -FRAC_PI_2,
                    hi: FRAC_PI_2,
                },
                Bounds { lo: 10.0, hi: 500.0 },
            ],
        })
    }

    /// Budget of the nested search used by [`ProjectionModel::pixel_to_polar`].
    pub fn with_inverse_config(mut self, inverse: InverseSearchConfig) -> Self {
        self.inverse = inverse;
        self
    }

    /// Angle and distance ranges explored when inverting a pixel.
    pub fn with_search_bounds(mut self, angle: Bounds, distance: Bounds) -> Self {
        self.search_bounds = [angle, distance];
        self
    }

    pub fn reference_pov(&self) -> &Vector3<f64> {
        &self.reference_pov
    }
}

impl ProjectionModel for PolarModel {
    fn model_name(&self) -> &'static str {
        "polar"
    }

    fn camera(&self) -> &CameraConfig {
        &self.camera
    }

    fn param_specs(&self) -> Vec<ParamSpec> {
        let size = self.camera.resolution().as_vector();
        let scale = Bounds {
            lo: 0.0,
            hi: 10_000.0,
        };
        vec![
            ParamSpec {
                name: "theta",
                bounds: Bounds {
                    lo: FRAC_PI_4,
                    hi: 3.0 * FRAC_PI_4,
                },
            },
            ParamSpec {
                name: "focal",
                bounds: Bounds { lo: 10.0, hi: 100.0 },
            },
            ParamSpec {
                name: "sx",
                bounds: scale,
            },
            ParamSpec {
                name: "sy",
                bounds: scale,
            },
            ParamSpec {
                name: "ox",
                bounds: Bounds {
                    lo: 0.3 * size.x,
                    hi: 0.6 * size.x,
                },
            },
            ParamSpec {
                name: "oy",
                bounds: Bounds {
                    lo: size.y,
                    hi: 5.0 * size.y,
                },
            },
        ]
    }

    fn params(&self) -> Vec<f64> {
        self.params.to_vec()
    }

    fn set_params(&mut self, values: &[f64]) -> Result<(), CalibrationError> {
        self.params = PolarParams::from_slice(values)?;
        Ok(())
    }

    fn calibration_direction(&self) -> ErrorDirection {
        ErrorDirection::RealToPixel
    }

    /// Searches (angle, distance) space for the polar position whose image is
    /// closest to `pixel`.
    fn pixel_to_polar(&self, pixel: &Vector2<f64>) -> Result<Vector2<f64>, CalibrationError> {
        let search = InverseSearch::new(self.inverse, self.search_bounds);
        let solution = search.solve(pixel.as_slice(), |polar| {
            Ok((self.polar_to_pixel(polar)? - pixel).norm())
        })?;
        Ok(solution.point)
    }

    fn polar_to_real(&self, polar: &Vector2<f64>) -> Result<Vector3<f64>, CalibrationError> {
        let origin = self.camera.ground_position();
        let mut reference = self.reference_pov - origin;
        reference.y = 0.0;
        let length = validation::require_nonzero(reference.norm(), "reference direction")?;
        let along = reference * (polar.y / length);
        Ok(rotate_about_vertical(&along, polar.x) + origin)
    }

    fn real_to_polar(&self, real: &Vector3<f64>) -> Result<Vector2<f64>, CalibrationError> {
        let origin = self.camera.ground_position();
        let angle = signed_ground_angle(&(real - origin), &(self.reference_pov - origin));
        Ok(Vector2::new(angle, ground_distance(real, &origin)))
    }

    /// # Errors
    ///
    /// * [`CalibrationError::DegenerateGeometry`] for a camera on the ground or a
    ///   tilt that puts a tangent at infinity.
    fn polar_to_pixel(&self, polar: &Vector2<f64>) -> Result<Vector2<f64>, CalibrationError> {
        let p = &self.params;
        let (angle, distance) = (polar.x, polar.y);
        let height = validation::require_nonzero(self.camera.height(), "camera height")?;
        let depression = p.theta - (distance / height).atan();
        validation::require_nonzero(p.theta.cos(), "cosine of the camera tilt")?;
        validation::require_nonzero(depression.cos(), "cosine of the depression angle")?;

        let phi = FRAC_PI_2 - angle;
        let ry = p.focal * (p.theta.tan() - depression.tan());
        Ok(Vector2::new(
            p.ox + p.sx * distance * phi.cos(),
            p.oy - p.sy * ry * phi.sin(),
        ))
    }

    fn save_to_yaml(&self, path: &str) -> Result<(), CalibrationError> {
        write_cam0(
            path,
            self.model_name(),
            &self.camera,
            &self.params(),
            vec![("reference_pov", self.reference_pov.as_slice().to_vec())],
        )
    }

    fn load_from_yaml(path: &str) -> Result<Self, CalibrationError> {
        let doc = Cam0Document::load(path, "polar")?;
        let mut model = PolarModel::new(doc.camera.clone(), doc.vector3("reference_pov")?)?;
        model.set_params(&doc.parameters)?;
        model.validate_params()?;
        Ok(model)
    }
}

/// Estimates the reference point of view from the training set.
///
/// Takes the two correspondences with the smallest and largest pixel `x` and
/// linearly interpolates their real positions to the horizontal image centre.
///
/// # Errors
///
/// * [`CalibrationError::NullOrMissingInput`] for an empty set.
/// * [`CalibrationError::DegenerateGeometry`] if every pixel shares one column.
pub fn estimate_reference_pov(
    training: &Correspondences,
    resolution: &Resolution,
) -> Result<Vector3<f64>, CalibrationError> {
    if training.is_empty() {
        return Err(CalibrationError::NullOrMissingInput(
            "training set is empty; cannot place the reference point of view".to_string(),
        ));
    }
    let pixels = training.pixel();
    let mut left = 0;
    let mut right = 0;
    for (i, pixel) in pixels.iter().enumerate() {
        if pixel.x < pixels[left].x {
            left = i;
        }
        if pixel.x > pixels[right].x {
            right = i;
        }
    }

    let span = validation::require_nonzero(
        pixels[right].x - pixels[left].x,
        "horizontal spread of the training pixels",
    )?;
    let a = (0.5 * resolution.width as f64 - pixels[left].x) / span;
    let real = training.real();
    Ok(real[left] + (real[right] - real[left]) * a)
}
