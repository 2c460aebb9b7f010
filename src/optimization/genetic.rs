//! Elitist genetic algorithm over bounded float genes.
//!
//! Each generation keeps the `elite_count` fittest candidates unchanged. Every
//! other slot is filled either by a random immigrant or by a uniform crossover of
//! two elites followed by mutation. The mutation scale is drawn log-uniformly
//! over six decades of the bound width, so one population explores coarse and
//! fine steps at the same time.

use log::debug;
use rand::{Rng, RngCore};
use std::cmp::Ordering;

use super::EvolutionaryOptimizer;
use crate::camera::{Bounds, CalibrationError};

/// Probability that a non-elite slot is refilled with a fresh random candidate.
const IMMIGRANT_RATE: f64 = 0.05;
/// Per-gene mutation probability; at least one gene always mutates.
const GENE_MUTATION_RATE: f64 = 0.3;
/// Mutation steps span `10^-MUTATION_DECADES ..= 1` times the bound width.
const MUTATION_DECADES: f64 = 6.0;

#[derive(Debug, Clone)]
pub struct GeneticAlgorithm {
    population_size: usize,
    elite_count: usize,
    bounds: Vec<Bounds>,
    population: Vec<Vec<f64>>,
    fitness: Vec<f64>,
    epoch: usize,
}

impl GeneticAlgorithm {
    /// Creates an optimizer with `float_genes` genes per candidate, each bounded to
    /// `[0, 1]` until [`EvolutionaryOptimizer::set_bounds`] is called.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::InvalidParams`] if the population is empty, the elite
    ///   count is not in `1..population_size`, there are no float genes, or
    ///   `int_genes` is non-zero (integer genes are not supported).
    pub fn new(
        population_size: usize,
        elite_count: usize,
        float_genes: usize,
        int_genes: usize,
    ) -> Result<Self, CalibrationError> {
        if population_size == 0 || elite_count == 0 || elite_count >= population_size {
            return Err(CalibrationError::InvalidParams(format!(
                "elite count {elite_count} must be in 1..{population_size}"
            )));
        }
        if float_genes == 0 {
            return Err(CalibrationError::InvalidParams(
                "a candidate needs at least one float gene".to_string(),
            ));
        }
        if int_genes != 0 {
            return Err(CalibrationError::InvalidParams(format!(
                "integer genes are not supported ({int_genes} requested)"
            )));
        }
        let unit = Bounds { lo: 0.0, hi: 1.0 };
        Ok(Self {
            population_size,
            elite_count,
            bounds: vec![unit; float_genes],
            population: vec![vec![0.0; float_genes]; population_size],
            fitness: vec![f64::NEG_INFINITY; population_size],
            epoch: 0,
        })
    }

    fn random_candidate(&self, rng: &mut dyn RngCore) -> Vec<f64> {
        self.bounds
            .iter()
            .map(|b| if b.is_fixed() { b.lo } else { rng.random_range(b.lo..=b.hi) })
            .collect()
    }

    fn offspring(&self, rng: &mut dyn RngCore) -> Vec<f64> {
        let mother = &self.population[rng.random_range(0..self.elite_count)];
        let father = &self.population[rng.random_range(0..self.elite_count)];
        let mut child: Vec<f64> = mother
            .iter()
            .zip(father)
            .map(|(&m, &f)| if rng.random_bool(0.5) { m } else { f })
            .collect();

        let scale = 10f64.powf(-rng.random_range(0.0..=MUTATION_DECADES));
        let mut mutated = false;
        for gene in 0..child.len() {
            if rng.random_bool(GENE_MUTATION_RATE) {
                self.mutate_gene(&mut child, gene, scale, rng);
                mutated = true;
            }
        }
        if !mutated {
            let gene = rng.random_range(0..child.len());
            self.mutate_gene(&mut child, gene, scale, rng);
        }
        child
    }

    fn mutate_gene(&self, child: &mut [f64], gene: usize, scale: f64, rng: &mut dyn RngCore) {
        let bounds = &self.bounds[gene];
        let step = scale * bounds.width() * rng.random_range(-1.0..=1.0);
        child[gene] = bounds.clamp(child[gene] + step);
    }

    /// Indices of the current population, fittest first.
    fn ranking(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.population_size).collect();
        order.sort_by(|&a, &b| compare_fitness(self.fitness[b], self.fitness[a]));
        order
    }
}

/// Total order on fitness values; NaN never ranks above a number.
fn compare_fitness(a: f64, b: f64) -> Ordering {
    let key = |v: f64| if v.is_nan() { f64::NEG_INFINITY } else { v };
    key(a).total_cmp(&key(b))
}

impl EvolutionaryOptimizer for GeneticAlgorithm {
    fn population_size(&self) -> usize {
        self.population_size
    }

    fn elite_count(&self) -> usize {
        self.elite_count
    }

    fn dimension(&self) -> usize {
        self.bounds.len()
    }

    fn set_bounds(&mut self, index: usize, bounds: Bounds) -> Result<(), CalibrationError> {
        let dimension = self.bounds.len();
        let slot = self.bounds.get_mut(index).ok_or_else(|| {
            CalibrationError::InvalidParams(format!(
                "gene index {index} is out of range for {dimension} genes"
            ))
        })?;
        *slot = Bounds::new(bounds.lo, bounds.hi)?;
        Ok(())
    }

    fn initialize(&mut self, rng: &mut dyn RngCore) {
        self.population = (0..self.population_size)
            .map(|_| self.random_candidate(rng))
            .collect();
        self.fitness = vec![f64::NEG_INFINITY; self.population_size];
        self.epoch = 0;
    }

    fn current_epoch(&self) -> usize {
        self.epoch
    }

    fn candidate_at(&self, index: usize) -> &[f64] {
        &self.population[index]
    }

    fn set_fitness(&mut self, index: usize, fitness: f64) {
        self.fitness[index] = if fitness.is_nan() {
            f64::NEG_INFINITY
        } else {
            fitness
        };
    }

    fn step(&mut self, rng: &mut dyn RngCore) {
        let order = self.ranking();
        let elites: Vec<Vec<f64>> = order[..self.elite_count]
            .iter()
            .map(|&i| self.population[i].clone())
            .collect();
        let elite_fitness: Vec<f64> = order[..self.elite_count]
            .iter()
            .map(|&i| self.fitness[i])
            .collect();

        // Offspring are bred from the elites only, so move them to the front first.
        self.population[..self.elite_count].clone_from_slice(&elites);

        let mut next = elites;
        while next.len() < self.population_size {
            let child = if rng.random_bool(IMMIGRANT_RATE) {
                self.random_candidate(rng)
            } else {
                self.offspring(rng)
            };
            next.push(child);
        }

        self.population = next;
        self.fitness = elite_fitness;
        self.fitness.resize(self.population_size, f64::NEG_INFINITY);
        self.epoch += 1;

        debug!("generation {} best fitness {}", self.epoch, self.fitness[0]);
    }

    fn best_candidate(&self) -> &[f64] {
        let best = (0..self.population_size)
            .max_by(|&a, &b| compare_fitness(self.fitness[a], self.fitness[b]))
            .unwrap_or(0);
        &self.population[best]
    }
}
