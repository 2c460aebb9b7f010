//! Generation loop that calibrates a [`ProjectionModel`] with an
//! [`EvolutionaryOptimizer`].
//!
//! The driver declares the model's bounds table, scores every candidate of a
//! generation (in parallel when enabled), hands the fitness values back to the
//! optimizer and steps it. It tracks the all-time best candidate on its own
//! instead of trusting the optimizer's final generation, and writes that
//! candidate into the model when the run terminates.

use log::{info, warn};
use rand::RngCore;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::progress::{ProgressObserver, ProgressRecord};
use super::{CalibrationConfig, Correspondences, EvolutionaryOptimizer, FitnessEvaluator};
use crate::camera::{CalibrationError, ProjectionModel};
use crate::optimization::GeneticAlgorithm;

/// Phase of a calibration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverState {
    Initializing,
    Evaluating,
    Stepping,
    Converged,
    Exhausted,
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The best error reached the configured precision.
    Converged,
    /// The generation budget was spent first.
    Exhausted,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Converged => write!(f, "converged"),
            Termination::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Outcome of one calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// All-time best parameter vector
    pub params: Vec<f64>,
    /// Mean error of `params` on the calibration set
    pub error: f64,
    /// Generations completed
    pub generations: usize,
    pub termination: Termination,
}

/// Orchestrates a calibration run.
///
/// The random source is supplied once at construction and is never reseeded,
/// so a run is fully determined by the configuration and the seed of `rng`.
pub struct CalibrationDriver<R: RngCore> {
    config: CalibrationConfig,
    rng: R,
    state: DriverState,
    observers: Vec<Box<dyn ProgressObserver>>,
    history: Vec<ProgressRecord>,
}

impl<R: RngCore> CalibrationDriver<R> {
    pub fn new(config: CalibrationConfig, rng: R) -> Self {
        Self {
            config,
            rng,
            state: DriverState::Initializing,
            observers: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn ProgressObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Every all-time-best improvement of the last run, in order.
    pub fn history(&self) -> &[ProgressRecord] {
        &self.history
    }

    /// Calibrates `model` with the bundled [`GeneticAlgorithm`].
    ///
    /// # Errors
    ///
    /// See [`CalibrationDriver::calibrate_with`].
    pub fn calibrate<M: ProjectionModel>(
        &mut self,
        model: &mut M,
        data: &Correspondences,
    ) -> Result<CalibrationResult, CalibrationError> {
        let mut optimizer = GeneticAlgorithm::new(
            self.config.population_size,
            self.config.elite_count,
            model.param_specs().len(),
            0,
        )?;
        self.calibrate_with(model, data, &mut optimizer)
    }

    /// Calibrates `model` with a caller-supplied optimizer.
    ///
    /// On success the model holds the best parameter vector seen during the run.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::NullOrMissingInput`] if `data` is empty.
    /// * [`CalibrationError::ShapeMismatch`] if the optimizer's dimension differs
    ///   from the model's parameter count.
    /// * [`CalibrationError::InvalidParams`] for an invalid configuration.
    /// * [`CalibrationError::DegenerateGeometry`] if no candidate ever produced a
    ///   finite error.
    ///
    /// All of these are raised before the model is modified; the first three
    /// before any candidate is evaluated.
    pub fn calibrate_with<M: ProjectionModel>(
        &mut self,
        model: &mut M,
        data: &Correspondences,
        optimizer: &mut dyn EvolutionaryOptimizer,
    ) -> Result<CalibrationResult, CalibrationError> {
        self.state = DriverState::Initializing;
        self.history.clear();
        self.config.validate()?;
        if data.is_empty() {
            return Err(CalibrationError::NullOrMissingInput(
                "calibration needs at least one correspondence".to_string(),
            ));
        }

        let specs = model.param_specs();
        if optimizer.dimension() != specs.len() {
            return Err(CalibrationError::ShapeMismatch {
                left: "optimizer genes".to_string(),
                left_len: optimizer.dimension(),
                right: format!("{} model parameters", model.model_name()),
                right_len: specs.len(),
            });
        }
        for (index, spec) in specs.iter().enumerate() {
            optimizer.set_bounds(index, spec.bounds)?;
        }
        optimizer.initialize(&mut self.rng);

        let evaluator = FitnessEvaluator::new(data, model.calibration_direction());
        info!(
            "Calibrating '{}' model: {} parameters, {} correspondences, error in {}",
            model.model_name(),
            specs.len(),
            data.len(),
            evaluator.direction().unit()
        );

        let mut best: Option<(f64, Vec<f64>)> = None;
        let termination = loop {
            self.state = DriverState::Evaluating;
            let errors = self.evaluate_generation(model, &evaluator, optimizer);

            // Fitness hand-off and best tracking happen serially, after the
            // whole generation has been scored.
            let generation = optimizer.current_epoch();
            for (index, error) in errors.into_iter().enumerate() {
                optimizer.set_fitness(index, -error);
                if error.is_finite() && best.as_ref().map_or(true, |(b, _)| error < *b) {
                    let params = optimizer.candidate_at(index).to_vec();
                    self.record_improvement(generation, error, &params);
                    best = Some((error, params));
                }
            }

            self.state = DriverState::Stepping;
            optimizer.step(&mut self.rng);

            if best
                .as_ref()
                .is_some_and(|(b, _)| *b <= self.config.precision)
            {
                self.state = DriverState::Converged;
                break Termination::Converged;
            }
            if optimizer.current_epoch() >= self.config.max_generations {
                self.state = DriverState::Exhausted;
                break Termination::Exhausted;
            }
        };

        let (error, params) = best.ok_or_else(|| {
            CalibrationError::DegenerateGeometry(format!(
                "no candidate produced a finite error in {} generations",
                optimizer.current_epoch()
            ))
        })?;
        model.set_params(&params)?;

        let result = CalibrationResult {
            params,
            error,
            generations: optimizer.current_epoch(),
            termination,
        };
        match termination {
            Termination::Converged => info!(
                "Calibration converged after {} generations, error {:.6}{}",
                result.generations,
                result.error,
                evaluator.direction().unit()
            ),
            Termination::Exhausted => warn!(
                "Calibration stopped after {} generations above precision {}: error {:.6}{}",
                result.generations,
                self.config.precision,
                result.error,
                evaluator.direction().unit()
            ),
        }
        Ok(result)
    }

    /// Scores every candidate of the current generation.
    ///
    /// Each evaluation works on its own clone of the model and only reads the
    /// shared correspondence set.
    fn evaluate_generation<M: ProjectionModel>(
        &self,
        model: &M,
        evaluator: &FitnessEvaluator<'_>,
        optimizer: &dyn EvolutionaryOptimizer,
    ) -> Vec<f64> {
        let candidates: Vec<&[f64]> = (0..optimizer.population_size())
            .map(|index| optimizer.candidate_at(index))
            .collect();
        let score = |candidate: &&[f64]| {
            let mut trial = model.clone();
            match trial.set_params(candidate) {
                Ok(()) => evaluator.score(&trial),
                Err(_) => f64::INFINITY,
            }
        };
        if self.config.parallel {
            candidates.par_iter().map(score).collect()
        } else {
            candidates.iter().map(score).collect()
        }
    }

    fn record_improvement(&mut self, generation: usize, error: f64, params: &[f64]) {
        let record = ProgressRecord {
            generation,
            best_error: error,
            params: params.to_vec(),
        };
        for observer in self.observers.iter_mut() {
            observer.on_improvement(&record);
        }
        self.history.push(record);
    }
}
