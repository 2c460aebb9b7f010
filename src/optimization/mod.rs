//! The `optimization` module calibrates projection models by evolutionary search.
//!
//! This module defines the [`EvolutionaryOptimizer`] trait, the black-box contract
//! the [`CalibrationDriver`] consumes. A population-based implementation,
//! [`GeneticAlgorithm`], is bundled, but any gradient-free search that honors the
//! trait can be substituted without touching the projection models or the
//! fitness evaluator.
//!
//! A calibration run is made of:
//! 1. A bounds table taken from the model ([`crate::camera::ProjectionModel::param_specs`]).
//! 2. A generation loop in which every candidate is scored by the [`FitnessEvaluator`].
//! 3. A termination policy (precision reached, or generation budget spent).
//!
//! Models whose inverse transform has no closed form use [`InverseSearch`], a small
//! bounded search run inside a single transform call.

use nalgebra::{Vector2, Vector3};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs;

pub mod driver;
pub mod fitness;
pub mod genetic;
pub mod inverse;
pub mod progress;

pub use driver::{CalibrationDriver, CalibrationResult, DriverState, Termination};
pub use fitness::{ErrorDirection, FitnessEvaluator};
pub use genetic::GeneticAlgorithm;
pub use inverse::{InverseSearch, InverseSolution};
pub use progress::{LogProgress, ProgressObserver, ProgressRecord};

use crate::camera::{Bounds, CalibrationError};

/// A population-based, maximizing black-box optimizer.
///
/// The driver only talks to the optimizer through this trait: it declares
/// bounds, initializes, reads candidates, reports their fitness and steps.
/// Higher fitness is better.
pub trait EvolutionaryOptimizer: Send {
    fn population_size(&self) -> usize;

    fn elite_count(&self) -> usize;

    /// Number of float genes per candidate.
    fn dimension(&self) -> usize;

    /// Declares the search interval of gene `index`.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::InvalidParams`] if `index` is out of range.
    fn set_bounds(&mut self, index: usize, bounds: Bounds) -> Result<(), CalibrationError>;

    /// Draws the first generation. Bounds must be declared beforehand.
    fn initialize(&mut self, rng: &mut dyn RngCore);

    /// Number of completed [`EvolutionaryOptimizer::step`] calls since initialization.
    fn current_epoch(&self) -> usize;

    fn candidate_at(&self, index: usize) -> &[f64];

    fn set_fitness(&mut self, index: usize, fitness: f64);

    /// Produces the next generation from the fitness values of the current one.
    fn step(&mut self, rng: &mut dyn RngCore);

    /// Highest-fitness candidate of the current generation.
    fn best_candidate(&self) -> &[f64];
}

/// Settings of the outer calibration loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub population_size: usize,
    pub elite_count: usize,
    pub max_generations: usize,
    /// Mean error (meters or pixels) at or below which the run converges.
    pub precision: f64,
    pub seed: u64,
    /// Score each generation on the rayon thread pool.
    pub parallel: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            population_size: 100,
            elite_count: 20,
            max_generations: 100_000,
            precision: 0.01,
            seed: 0,
            parallel: true,
        }
    }
}

impl CalibrationConfig {
    pub fn validate(&self) -> Result<(), CalibrationError> {
        validate_budget(
            self.population_size,
            self.elite_count,
            self.max_generations,
            self.precision,
        )
    }

    /// Loads a configuration from YAML; missing keys take their default value.
    pub fn load_from_yaml(path: &str) -> Result<Self, CalibrationError> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&contents)
            .map_err(|e| CalibrationError::YamlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Budget of one nested inverse search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InverseSearchConfig {
    pub population_size: usize,
    pub elite_count: usize,
    pub max_generations: usize,
    /// Residual at or below which the search stops early.
    pub precision: f64,
    pub seed: u64,
}

impl Default for InverseSearchConfig {
    fn default() -> Self {
        Self {
            population_size: 100,
            elite_count: 20,
            max_generations: 1000,
            precision: 1e-3,
            seed: 0,
        }
    }
}

impl InverseSearchConfig {
    pub fn validate(&self) -> Result<(), CalibrationError> {
        validate_budget(
            self.population_size,
            self.elite_count,
            self.max_generations,
            self.precision,
        )
    }
}

fn validate_budget(
    population_size: usize,
    elite_count: usize,
    max_generations: usize,
    precision: f64,
) -> Result<(), CalibrationError> {
    if population_size == 0 {
        return Err(CalibrationError::InvalidParams(
            "population size must be positive".to_string(),
        ));
    }
    if elite_count == 0 || elite_count >= population_size {
        return Err(CalibrationError::InvalidParams(format!(
            "elite count {elite_count} must be in 1..{population_size}"
        )));
    }
    if max_generations == 0 {
        return Err(CalibrationError::InvalidParams(
            "generation budget must be positive".to_string(),
        ));
    }
    if !precision.is_finite() || precision < 0.0 {
        return Err(CalibrationError::InvalidParams(format!(
            "precision {precision} must be a non-negative number"
        )));
    }
    Ok(())
}

/// Ordered real-world/pixel pairs, matched by index.
#[derive(Debug, Clone, PartialEq)]
pub struct Correspondences {
    real: Vec<Vector3<f64>>,
    pixel: Vec<Vector2<f64>>,
}

impl Correspondences {
    /// Builds a calibration set.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::ShapeMismatch`] if the two collections differ in length.
    /// * [`CalibrationError::NullOrMissingInput`] if they are empty.
    pub fn try_new(
        real: Vec<Vector3<f64>>,
        pixel: Vec<Vector2<f64>>,
    ) -> Result<Self, CalibrationError> {
        let set = Self::held_out(real, pixel)?;
        if set.is_empty() {
            return Err(CalibrationError::NullOrMissingInput(
                "correspondence set is empty".to_string(),
            ));
        }
        Ok(set)
    }

    /// Builds a held-out set, which may be empty.
    pub fn held_out(
        real: Vec<Vector3<f64>>,
        pixel: Vec<Vector2<f64>>,
    ) -> Result<Self, CalibrationError> {
        if real.len() != pixel.len() {
            return Err(CalibrationError::ShapeMismatch {
                left: "real-world positions".to_string(),
                left_len: real.len(),
                right: "pixel positions".to_string(),
                right_len: pixel.len(),
            });
        }
        Ok(Self { real, pixel })
    }

    pub fn len(&self) -> usize {
        self.real.len()
    }

    pub fn is_empty(&self) -> bool {
        self.real.is_empty()
    }

    pub fn real(&self) -> &[Vector3<f64>] {
        &self.real
    }

    pub fn pixel(&self) -> &[Vector2<f64>] {
        &self.pixel
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vector3<f64>, &Vector2<f64>)> {
        self.real.iter().zip(self.pixel.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correspondences_shape_mismatch() {
        let result = Correspondences::try_new(
            vec![Vector3::zeros(), Vector3::x()],
            vec![Vector2::zeros()],
        );
        match result {
            Err(CalibrationError::ShapeMismatch {
                left_len,
                right_len,
                ..
            }) => {
                assert_eq!(left_len, 2);
                assert_eq!(right_len, 1);
            }
            other => panic!("expected ShapeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_correspondences_empty() {
        assert!(matches!(
            Correspondences::try_new(vec![], vec![]),
            Err(CalibrationError::NullOrMissingInput(_))
        ));
        assert!(Correspondences::held_out(vec![], vec![]).unwrap().is_empty());
    }

    #[test]
    fn test_config_validation() {
        assert!(CalibrationConfig::default().validate().is_ok());
        assert!(InverseSearchConfig::default().validate().is_ok());

        let config = CalibrationConfig {
            elite_count: 100,
            ..CalibrationConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CalibrationError::InvalidParams(_))
        ));

        let config = CalibrationConfig {
            precision: f64::NAN,
            ..CalibrationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_yaml_defaults() {
        let config: CalibrationConfig =
            serde_yaml::from_str("max_generations: 500\nseed: 7\n").unwrap();
        assert_eq!(config.max_generations, 500);
        assert_eq!(config.seed, 7);
        assert_eq!(config.population_size, 100);
        assert!(config.parallel);
    }
}
