//! Bounded nested search that inverts a 2-D transform numerically.
//!
//! Projection maps such as the polar model's `polar -> pixel` have no closed-form
//! inverse. [`InverseSearch`] finds the 2-D input whose image is closest to a
//! target by running a small, private [`GeneticAlgorithm`]. Each call owns its
//! optimizer and its random generator, so searches are reentrant and can run
//! inside fitness evaluations on any thread.

use log::debug;
use nalgebra::Vector2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::{EvolutionaryOptimizer, GeneticAlgorithm, InverseSearchConfig};
use crate::camera::{Bounds, CalibrationError};

/// Best input found by an [`InverseSearch`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InverseSolution {
    pub point: Vector2<f64>,
    pub residual: f64,
    pub generations: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct InverseSearch {
    config: InverseSearchConfig,
    bounds: [Bounds; 2],
}

impl InverseSearch {
    pub fn new(config: InverseSearchConfig, bounds: [Bounds; 2]) -> Self {
        Self { config, bounds }
    }

    /// Minimizes `residual` over the search box.
    ///
    /// `key` identifies the query (typically the target coordinates); it is mixed
    /// into the seed so that the same query always yields the same answer.
    /// Candidates for which `residual` fails or is not finite are ranked last.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::InvalidParams`] for an invalid budget.
    /// * [`CalibrationError::DegenerateGeometry`] if no candidate produced a
    ///   finite residual.
    pub fn solve<F>(&self, key: &[f64], residual: F) -> Result<InverseSolution, CalibrationError>
    where
        F: Fn(&Vector2<f64>) -> Result<f64, CalibrationError>,
    {
        self.config.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(mix_seed(self.config.seed, key));
        let mut ga = GeneticAlgorithm::new(
            self.config.population_size,
            self.config.elite_count,
            2,
            0,
        )?;
        ga.set_bounds(0, self.bounds[0])?;
        ga.set_bounds(1, self.bounds[1])?;
        ga.initialize(&mut rng);

        let mut best: Option<(f64, Vector2<f64>)> = None;
        loop {
            for i in 0..ga.population_size() {
                let candidate = Vector2::from_column_slice(ga.candidate_at(i));
                let value = match residual(&candidate) {
                    Ok(value) if value.is_finite() => value,
                    _ => f64::INFINITY,
                };
                ga.set_fitness(i, -value);
                if value.is_finite() && best.map_or(true, |(b, _)| value < b) {
                    best = Some((value, candidate));
                }
            }
            ga.step(&mut rng);

            let converged = best.is_some_and(|(b, _)| b <= self.config.precision);
            if converged || ga.current_epoch() >= self.config.max_generations {
                break;
            }
        }

        let (residual, point) = best.ok_or_else(|| {
            CalibrationError::DegenerateGeometry(
                "inverse search found no candidate with a finite residual".to_string(),
            )
        })?;
        debug!(
            "inverse search: residual {residual:.6} after {} generations",
            ga.current_epoch()
        );
        Ok(InverseSolution {
            point,
            residual,
            generations: ga.current_epoch(),
        })
    }
}

/// Deterministic seed derived from a base seed and the query coordinates.
fn mix_seed(seed: u64, key: &[f64]) -> u64 {
    key.iter().fold(seed ^ 0x9E37_79B9_7F4A_7C15, |acc, value| {
        (acc.rotate_left(23) ^ value.to_bits()).wrapping_mul(0xBF58_476D_1CE4_E5B9)
    })
}
