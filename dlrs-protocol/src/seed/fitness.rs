//! Pluggable fitness and mutation-trigger policies

use crate::error::{DlrsError, Result};
use crate::factor::{LowRankFactorSet, Matrix};
use serde::{Deserialize, Serialize};

/// Observed data fed back to a seed's owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub observed: Matrix,
    /// Step size of the mutation toward `observed`
    pub learning_rate: f64,
}

impl Feedback {
    pub fn new(observed: Matrix, learning_rate: f64) -> Result<Self> {
        if !learning_rate.is_finite() || learning_rate <= 0.0 {
            return Err(DlrsError::InvalidInput(format!(
                "learning rate must be positive, got {}",
                learning_rate
            )));
        }
        Ok(Self {
            observed,
            learning_rate,
        })
    }

    pub(crate) fn check_shape(&self, factors: &LowRankFactorSet) -> Result<()> {
        if self.observed.nrows() != factors.m || self.observed.ncols() != factors.n {
            return Err(DlrsError::InvalidInput(format!(
                "feedback is {}x{}, seed is {}x{}",
                self.observed.nrows(),
                self.observed.ncols(),
                factors.m,
                factors.n
            )));
        }
        Ok(())
    }
}

/// Scores a factor set against feedback; higher is fitter, range [0, 1]
pub trait FitnessPolicy: Send + Sync {
    fn fitness(&self, factors: &LowRankFactorSet, feedback: &Feedback) -> Result<f64>;
}

/// 1 / (1 + relative reconstruction error)
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconstructionFitness;

impl FitnessPolicy for ReconstructionFitness {
    fn fitness(&self, factors: &LowRankFactorSet, feedback: &Feedback) -> Result<f64> {
        feedback.check_shape(factors)?;
        let scale = feedback.observed.norm().max(f64::EPSILON);
        let relative = factors.reconstruction_error(&feedback.observed) / scale;
        Ok(1.0 / (1.0 + relative))
    }
}

/// Decides from the fitness before and after feedback whether to mutate
pub trait MutationTrigger: Send + Sync {
    fn should_mutate(&self, previous: f64, current: f64) -> bool;
}

/// Fires when fitness fell by at least `min_drop`
#[derive(Debug, Clone, Copy)]
pub struct FitnessDropTrigger {
    pub min_drop: f64,
}

impl Default for FitnessDropTrigger {
    fn default() -> Self {
        Self { min_drop: 0.01 }
    }
}

impl MutationTrigger for FitnessDropTrigger {
    fn should_mutate(&self, previous: f64, current: f64) -> bool {
        previous - current >= self.min_drop
    }
}

/// Fires on every feedback that moved fitness at all
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyChangeTrigger;

impl MutationTrigger for AnyChangeTrigger {
    fn should_mutate(&self, previous: f64, current: f64) -> bool {
        previous != current
    }
}
