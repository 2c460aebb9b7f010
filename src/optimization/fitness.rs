//! Reprojection error of a model against a correspondence set.

use serde::{Deserialize, Serialize};

use super::Correspondences;
use crate::camera::{CalibrationError, ProjectionModel};

/// Space in which predicted and observed positions are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDirection {
    /// Pixels are mapped to the ground; error in meters.
    PixelToReal,
    /// Ground positions are mapped to the image; error in pixels.
    RealToPixel,
}

impl ErrorDirection {
    pub fn unit(&self) -> &'static str {
        match self {
            ErrorDirection::PixelToReal => "m",
            ErrorDirection::RealToPixel => "px",
        }
    }
}

/// Scores candidate models against a fixed, read-only correspondence set.
#[derive(Debug, Clone, Copy)]
pub struct FitnessEvaluator<'a> {
    data: &'a Correspondences,
    direction: ErrorDirection,
}

impl<'a> FitnessEvaluator<'a> {
    pub fn new(data: &'a Correspondences, direction: ErrorDirection) -> Self {
        Self { data, direction }
    }

    pub fn direction(&self) -> ErrorDirection {
        self.direction
    }

    /// Distance between the predicted and observed position of one pair.
    pub fn point_error<M: ProjectionModel>(
        &self,
        model: &M,
        index: usize,
    ) -> Result<f64, CalibrationError> {
        let real = &self.data.real()[index];
        let pixel = &self.data.pixel()[index];
        match self.direction {
            ErrorDirection::PixelToReal => Ok((model.pixel_to_real(pixel)? - real).norm()),
            ErrorDirection::RealToPixel => Ok((model.real_to_pixel(real)? - pixel).norm()),
        }
    }

    /// Mean pairwise distance over the whole set.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::NullOrMissingInput`] for an empty set.
    /// * Any transform error, typically [`CalibrationError::DegenerateGeometry`].
    pub fn evaluate<M: ProjectionModel>(&self, model: &M) -> Result<f64, CalibrationError> {
        if self.data.is_empty() {
            return Err(CalibrationError::NullOrMissingInput(
                "no correspondences to evaluate".to_string(),
            ));
        }
        let mut total = 0.0;
        for index in 0..self.data.len() {
            total += self.point_error(model, index)?;
        }
        Ok(total / self.data.len() as f64)
    }

    /// Like [`FitnessEvaluator::evaluate`], but any failure or non-finite mean
    /// becomes the worst possible error so a single bad candidate cannot abort
    /// the search.
    pub fn score<M: ProjectionModel>(&self, model: &M) -> f64 {
        match self.evaluate(model) {
            Ok(error) if error.is_finite() => error,
            _ => f64::INFINITY,
        }
    }

    /// Per-pair errors, keeping individual failures.
    pub fn per_point<M: ProjectionModel>(&self, model: &M) -> Vec<Result<f64, CalibrationError>> {
        (0..self.data.len())
            .map(|index| self.point_error(model, index))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraConfig, RayModel, Resolution};
    use approx::assert_relative_eq;
    use nalgebra::{Vector2, Vector3};

    fn model() -> RayModel {
        let camera = CameraConfig::new(
            Vector3::new(0.0, 10.0, -20.0),
            Resolution {
                width: 640,
                height: 480,
            },
        )
        .unwrap();
        let mut model = RayModel::new(camera, Default::default());
        model
            .set_params(&[0.0, 0.0, 0.0, 0.5, 0.4, 0.0, 1.0, 0.0])
            .unwrap();
        model
    }

    #[test]
    fn test_evaluate_is_mean_distance() {
        let model = model();
        let pixels = vec![Vector2::new(320.0, 240.0), Vector2::new(100.0, 400.0)];
        let mut real: Vec<Vector3<f64>> = pixels
            .iter()
            .map(|p| model.pixel_to_real(p).unwrap())
            .collect();
        real[0].x += 3.0;
        real[1].z -= 1.0;

        let data = Correspondences::try_new(real, pixels).unwrap();
        let evaluator = FitnessEvaluator::new(&data, ErrorDirection::PixelToReal);
        assert_relative_eq!(evaluator.evaluate(&model).unwrap(), 2.0, epsilon = 1e-9);

        let per_point: Vec<f64> = evaluator
            .per_point(&model)
            .into_iter()
            .map(|e| e.unwrap())
            .collect();
        assert_relative_eq!(per_point[0], 3.0, epsilon = 1e-9);
        assert_relative_eq!(per_point[1], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_degenerate_candidate_scores_worst() {
        let mut model = model();
        // Up vector parallel to the view direction leaves no right vector.
        model
            .set_params(&[0.0, 10.0, 0.0, 0.5, 0.4, 0.0, 0.0, 1.0])
            .unwrap();
        let data = Correspondences::try_new(
            vec![Vector3::zeros()],
            vec![Vector2::new(320.0, 240.0)],
        )
        .unwrap();
        let evaluator = FitnessEvaluator::new(&data, ErrorDirection::PixelToReal);
        assert!(matches!(
            evaluator.evaluate(&model),
            Err(CalibrationError::DegenerateGeometry(_))
        ));
        assert_eq!(evaluator.score(&model), f64::INFINITY);
    }
}
