//! Implements the ray / up-vector ground-plane model.
//!
//! A pixel is turned into a viewing ray by rotating the camera's central ray
//! (camera towards a point of view, POV) about an up vector and about the
//! resulting right vector, by angles proportional to the pixel's normalized
//! coordinates. The ray is then intersected with the ground plane `y == 0`.
//!
//! Parameters, in vector order:
//!
//! | index | name | meaning |
//! |---|---|---|
//! | 0..3 | `pov_x`, `pov_y`, `pov_z` | point of view, bounded by a [`PovBox`] |
//! | 3 | `sx` | horizontal angular scale (radians per normalized unit) |
//! | 4 | `sy` | vertical angular scale |
//! | 5..8 | `up_x`, `up_y`, `up_z` | up vector, need not be normalized |

use nalgebra::{Vector2, Vector3};
use std::f64::consts::FRAC_PI_2;

use super::yaml::{write_cam0, Cam0Document};
use super::{
    validation, Bounds, CalibrationError, CameraConfig, ParamSpec, PovBox, ProjectionModel,
};
use crate::geometry::{
    ground_distance, normalize_checked, normalized_to_pixel, pixel_to_normalized,
    rotate_about_axis, GEOMETRY_EPSILON,
};
use crate::optimization::fitness::ErrorDirection;
use crate::optimization::{InverseSearch, InverseSearchConfig};

/// Named parameters of a [`RayModel`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayParams {
    pub pov: Vector3<f64>,
    pub sx: f64,
    pub sy: f64,
    pub up: Vector3<f64>,
}

impl RayParams {
    pub const COUNT: usize = 8;

    pub fn to_vec(&self) -> Vec<f64> {
        vec![
            self.pov.x, self.pov.y, self.pov.z, self.sx, self.sy, self.up.x, self.up.y, self.up.z,
        ]
    }

    pub fn from_slice(values: &[f64]) -> Result<Self, CalibrationError> {
        validation::validate_len("ray parameters", values, Self::COUNT)?;
        Ok(Self {
            pov: Vector3::new(values[0], values[1], values[2]),
            sx: values[3],
            sy: values[4],
            up: Vector3::new(values[5], values[6], values[7]),
        })
    }
}

/// Ray / up-vector projection model.
///
/// # Examples
///
/// ```rust
/// use nalgebra::{Vector2, Vector3};
/// use ground_plane_tools::camera::{CameraConfig, PovBox, ProjectionModel, RayModel, Resolution};
///
/// let camera = CameraConfig::new(
///     Vector3::new(0.0, 15.0, -20.0),
///     Resolution { width: 640, height: 480 },
/// )
/// .unwrap();
/// let model = RayModel::new(camera, PovBox::default());
///
/// // The image centre looks along the camera -> POV ray.
/// let ground = model.pixel_to_real(&Vector2::new(320.0, 240.0)).unwrap();
/// assert!(ground.y.abs() < 1e-12);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RayModel {
    camera: CameraConfig,
    pov_box: PovBox,
    pub params: RayParams,
    inverse: InverseSearchConfig,
}

impl RayModel {
    /// Creates a model with the POV at the centre of `pov_box`, looking straight
    /// with unit angular scales and a vertical up vector.
    pub fn new(camera: CameraConfig, pov_box: PovBox) -> Self {
        Self {
            camera,
            params: RayParams {
                pov: pov_box.center(),
                sx: 0.5,
                sy: 0.5,
                up: Vector3::y(),
            },
            pov_box,
            inverse: InverseSearchConfig::default(),
        }
    }

    /// Budget of the nested search used by [`ProjectionModel::real_to_polar`].
    pub fn with_inverse_config(mut self, inverse: InverseSearchConfig) -> Self {
        self.inverse = inverse;
        self
    }

    pub fn pov_box(&self) -> &PovBox {
        &self.pov_box
    }

    /// Unit viewing ray through a normalized image position.
    fn ray_direction(&self, polar: &Vector2<f64>) -> Result<Vector3<f64>, CalibrationError> {
        let p = &self.params;
        let cp = normalize_checked(&(p.pov - self.camera.position()), "camera to POV direction")?;
        let up = normalize_checked(&p.up, "up vector")?;
        let right = normalize_checked(&cp.cross(&up), "right vector (view ray parallel to up)")?;

        let rx = rotate_about_axis(&cp, &up, p.sx * polar.x) - cp;
        let ry = rotate_about_axis(&cp, &right, p.sy * polar.y) - cp;
        normalize_checked(&(cp + rx + ry), "ray direction")
    }
}

impl ProjectionModel for RayModel {
    fn model_name(&self) -> &'static str {
        "ray"
    }

    fn camera(&self) -> &CameraConfig {
        &self.camera
    }

    fn param_specs(&self) -> Vec<ParamSpec> {
        let angle = Bounds {
            lo: -FRAC_PI_2,
            hi: FRAC_PI_2,
        };
        let signed_unit = Bounds { lo: -1.0, hi: 1.0 };
        vec![
            ParamSpec {
                name: "pov_x",
                bounds: self.pov_box.axis_bounds(0),
            },
            ParamSpec {
                name: "pov_y",
                bounds: self.pov_box.axis_bounds(1),
            },
            ParamSpec {
                name: "pov_z",
                bounds: self.pov_box.axis_bounds(2),
            },
            ParamSpec {
                name: "sx",
                bounds: angle,
            },
            ParamSpec {
                name: "sy",
                bounds: angle,
            },
            ParamSpec {
                name: "up_x",
                bounds: signed_unit,
            },
            ParamSpec {
                name: "up_y",
                bounds: Bounds { lo: 0.0, hi: 1.0 },
            },
            ParamSpec {
                name: "up_z",
                bounds: signed_unit,
            },
        ]
    }

    fn params(&self) -> Vec<f64> {
        self.params.to_vec()
    }

    fn set_params(&mut self, values: &[f64]) -> Result<(), CalibrationError> {
        self.params = RayParams::from_slice(values)?;
        Ok(())
    }

    fn calibration_direction(&self) -> ErrorDirection {
        ErrorDirection::PixelToReal
    }

    /// Normalizes the pixel to `[-1, 1]` on both axes.
    fn pixel_to_polar(&self, pixel: &Vector2<f64>) -> Result<Vector2<f64>, CalibrationError> {
        pixel_to_normalized(pixel, &self.camera.resolution())
    }

    /// Intersects the viewing ray with the ground plane.
    ///
    /// Rays pointing above the horizon meet the plane behind the camera and are
    /// returned as such.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::DegenerateGeometry`] when the POV coincides with the
    ///   camera, the up vector is zero or parallel to the view ray, or the ray is
    ///   parallel to the ground.
    fn polar_to_real(&self, polar: &Vector2<f64>) -> Result<Vector3<f64>, CalibrationError> {
        let v = self.ray_direction(polar)?;
        if v.y.abs() < GEOMETRY_EPSILON {
            return Err(CalibrationError::DegenerateGeometry(
                "ray is parallel to the ground plane".to_string(),
            ));
        }
        let camera = self.camera.position();
        let a = camera.y / v.y;
        Ok(Vector3::new(camera.x - a * v.x, 0.0, camera.z - a * v.z))
    }

    /// Searches the normalized image square for the position whose ray lands
    /// closest to `real` on the ground.
    fn real_to_polar(&self, real: &Vector3<f64>) -> Result<Vector2<f64>, CalibrationError> {
        let unit = Bounds { lo: -1.0, hi: 1.0 };
        let search = InverseSearch::new(self.inverse, [unit, unit]);
        let solution = search.solve(&[real.x, real.z], |polar| {
            Ok(ground_distance(&self.polar_to_real(polar)?, real))
        })?;
        Ok(solution.point)
    }

    fn polar_to_pixel(&self, polar: &Vector2<f64>) -> Result<Vector2<f64>, CalibrationError> {
        Ok(normalized_to_pixel(polar, &self.camera.resolution()))
    }

    fn save_to_yaml(&self, path: &str) -> Result<(), CalibrationError> {
        write_cam0(
            path,
            self.model_name(),
            &self.camera,
            &self.params(),
            vec![
                ("pov_min", self.pov_box.min.as_slice().to_vec()),
                ("pov_max", self.pov_box.max.as_slice().to_vec()),
            ],
        )
    }

    fn load_from_yaml(path: &str) -> Result<Self, CalibrationError> {
        let doc = Cam0Document::load(path, "ray")?;
        let pov_box = PovBox::new(doc.vector3("pov_min")?, doc.vector3("pov_max")?)?;
        let mut model = RayModel::new(doc.camera.clone(), pov_box);
        model.set_params(&doc.parameters)?;
        model.validate_params()?;
        Ok(model)
    }
}
