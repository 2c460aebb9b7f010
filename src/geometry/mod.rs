//! Small-vector geometry used by the projection models.
//!
//! Ground-plane quantities live in the `x`/`z` plane; `y` is height.

use nalgebra::{Rotation3, Unit, Vector2, Vector3};

use crate::camera::{CalibrationError, Resolution};

/// Magnitude below which a divisor or vector length counts as zero.
pub const GEOMETRY_EPSILON: f64 = 1e-6;

/// Normalizes `v`, failing instead of producing NaN for zero-length input.
///
/// # Errors
///
/// * [`CalibrationError::DegenerateGeometry`] naming `what` when `|v| < GEOMETRY_EPSILON`.
pub fn normalize_checked(v: &Vector3<f64>, what: &str) -> Result<Vector3<f64>, CalibrationError> {
    let norm = v.norm();
    if !norm.is_finite() || norm < GEOMETRY_EPSILON {
        return Err(CalibrationError::DegenerateGeometry(format!(
            "{what} has zero length"
        )));
    }
    Ok(v / norm)
}

/// Rotates `v` by `angle` radians about `unit_axis` (right-handed).
///
/// `unit_axis` must already be normalized.
pub fn rotate_about_axis(v: &Vector3<f64>, unit_axis: &Vector3<f64>, angle: f64) -> Vector3<f64> {
    let axis = Unit::new_unchecked(*unit_axis);
    Rotation3::from_axis_angle(&axis, angle) * v
}

/// Rotates a ground-plane vector about the vertical axis.
pub fn rotate_about_vertical(v: &Vector3<f64>, angle: f64) -> Vector3<f64> {
    Rotation3::from_axis_angle(&Vector3::y_axis(), angle) * v
}

/// Signed angle in `[-π, π]` that takes `reference` onto `point` in the ground plane.
///
/// Consistent with [`rotate_about_vertical`]: rotating `reference` by the
/// returned angle yields a vector parallel to `point`.
pub fn signed_ground_angle(point: &Vector3<f64>, reference: &Vector3<f64>) -> f64 {
    let cross = point.x * reference.z - point.z * reference.x;
    let dot = point.x * reference.x + point.z * reference.z;
    cross.atan2(dot)
}

/// Euclidean distance between the ground projections of `a` and `b`.
pub fn ground_distance(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    Vector2::new(a.x - b.x, a.z - b.z).norm()
}

/// Maps a pixel to `[-1, 1]` on both axes, image centre at the origin.
pub fn pixel_to_normalized(
    pixel: &Vector2<f64>,
    resolution: &Resolution,
) -> Result<Vector2<f64>, CalibrationError> {
    if resolution.width == 0 || resolution.height == 0 {
        return Err(CalibrationError::DegenerateGeometry(format!(
            "image size {}x{} cannot normalize pixels",
            resolution.width, resolution.height
        )));
    }
    let half = resolution.as_vector() * 0.5;
    Ok(Vector2::new(
        (pixel.x - half.x) / half.x,
        (pixel.y - half.y) / half.y,
    ))
}

/// Inverse of [`pixel_to_normalized`].
pub fn normalized_to_pixel(normalized: &Vector2<f64>, resolution: &Resolution) -> Vector2<f64> {
    let half = resolution.as_vector() * 0.5;
    Vector2::new(
        normalized.x * half.x + half.x,
        normalized.y * half.y + half.y,
    )
}

/// Generate a grid of pixels evenly distributed across the image
///
/// # Arguments
///
/// * `resolution` - The image size in pixels
/// * `n` - The approximate number of pixels to generate
///
/// # Returns
///
/// The centre of each grid cell, row by row.
pub fn sample_pixel_grid(resolution: &Resolution, n: usize) -> Vec<Vector2<f64>> {
    let width = resolution.width as f64;
    let height = resolution.height as f64;

    let num_cells_x = ((n as f64 * (width / height)).sqrt().round() as usize).max(1);
    let num_cells_y = ((n as f64 * (height / width)).sqrt().round() as usize).max(1);

    let cell_width = width / num_cells_x as f64;
    let cell_height = height / num_cells_y as f64;

    let mut pixels = Vec::with_capacity(num_cells_x * num_cells_y);
    for i in 0..num_cells_y {
        for j in 0..num_cells_x {
            pixels.push(Vector2::new(
                (j as f64 + 0.5) * cell_width,
                (i as f64 + 0.5) * cell_height,
            ));
        }
    }
    pixels
}
