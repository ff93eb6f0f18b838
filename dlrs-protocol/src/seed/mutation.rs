//! MutationRules — when a seed may mutate and by how much
//!
//! The rules gate mutation on a fitness window and a cooldown, and scale the
//! perturbation bound by a strategy-dependent rate.

use crate::error::{DlrsError, Result};
use serde::{Deserialize, Serialize};

/// How the mutation rate moves with fitness and epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationStrategy {
    /// Same rate regardless of fitness
    Constant,
    /// Explore when fitness is low, exploit when high
    AdaptiveFitness,
    /// Rate shrinks geometrically per epoch
    EpochDecay { decay_rate: f64 },
    /// Temperature cools geometrically per epoch
    Annealing { initial_temp: f64, cooling_rate: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRules {
    /// Below this fitness a seed is not worth mutating
    pub min_fitness: f64,
    /// Above this fitness a seed is left alone
    pub max_fitness: f64,
    pub base_rate: f64,
    /// Largest change applied to any single factor entry
    pub max_perturbation: f64,
    pub strategy: MutationStrategy,
    /// Epochs that must pass between two mutations
    pub cooldown_epochs: u64,
    pub last_mutation_epoch: Option<u64>,
}

impl Default for MutationRules {
    fn default() -> Self {
        Self {
            min_fitness: 0.05,
            max_fitness: 0.98,
            base_rate: 0.8,
            max_perturbation: 0.1,
            strategy: MutationStrategy::AdaptiveFitness,
            cooldown_epochs: 0,
            last_mutation_epoch: None,
        }
    }
}

impl MutationRules {
    /// High bar, small steps
    pub fn strict() -> Self {
        Self {
            min_fitness: 0.3,
            max_fitness: 0.95,
            base_rate: 0.3,
            max_perturbation: 0.01,
            strategy: MutationStrategy::EpochDecay { decay_rate: 0.99 },
            cooldown_epochs: 5,
            last_mutation_epoch: None,
        }
    }

    /// Mutate on every opportunity
    pub fn aggressive() -> Self {
        Self {
            min_fitness: 0.0,
            max_fitness: 1.0,
            base_rate: 1.0,
            max_perturbation: 0.5,
            strategy: MutationStrategy::Constant,
            cooldown_epochs: 0,
            last_mutation_epoch: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let unit = |x: f64| (0.0..=1.0).contains(&x);
        if !unit(self.min_fitness) || !unit(self.max_fitness) || self.min_fitness > self.max_fitness {
            return Err(DlrsError::InvalidInput(format!(
                "mutation fitness window [{}, {}] is not inside [0, 1]",
                self.min_fitness, self.max_fitness
            )));
        }
        if !unit(self.base_rate) {
            return Err(DlrsError::InvalidInput(format!(
                "mutation base rate {} is not inside [0, 1]",
                self.base_rate
            )));
        }
        if !self.max_perturbation.is_finite() || self.max_perturbation < 0.0 {
            return Err(DlrsError::InvalidInput(format!(
                "max perturbation must be non-negative, got {}",
                self.max_perturbation
            )));
        }
        match self.strategy {
            MutationStrategy::EpochDecay { decay_rate } if !(0.0..=1.0).contains(&decay_rate) => Err(
                DlrsError::InvalidInput(format!("decay rate {} is not inside [0, 1]", decay_rate)),
            ),
            MutationStrategy::Annealing {
                initial_temp,
                cooling_rate,
            } if initial_temp <= 0.0 || !(0.0..=1.0).contains(&cooling_rate) => {
                Err(DlrsError::InvalidInput(format!(
                    "annealing needs a positive temperature and a cooling rate in [0, 1], got {} and {}",
                    initial_temp, cooling_rate
                )))
            }
            _ => Ok(()),
        }
    }

    fn in_window(&self, fitness: f64) -> bool {
        fitness >= self.min_fitness && fitness <= self.max_fitness
    }

    fn cooled_down(&self, epoch: u64) -> bool {
        match self.last_mutation_epoch {
            Some(last) => epoch >= last.saturating_add(self.cooldown_epochs),
            None => true,
        }
    }

    /// Whether a mutation at `epoch` is permitted at all
    pub fn allows(&self, fitness: f64, epoch: u64) -> bool {
        self.in_window(fitness) && self.cooled_down(epoch) && self.effective_rate(fitness, epoch) > 0.0
    }

    /// Rate in [0, base_rate]; zero outside the fitness window
    pub fn effective_rate(&self, fitness: f64, epoch: u64) -> f64 {
        if !self.in_window(fitness) {
            return 0.0;
        }
        let epoch = epoch as f64;
        match self.strategy {
            MutationStrategy::Constant => self.base_rate,
            MutationStrategy::AdaptiveFitness => self.base_rate * (0.2 + 0.8 * (1.0 - fitness)),
            MutationStrategy::EpochDecay { decay_rate } => self.base_rate * decay_rate.powf(epoch),
            MutationStrategy::Annealing {
                initial_temp,
                cooling_rate,
            } => {
                let temp = initial_temp * cooling_rate.powf(epoch);
                self.base_rate * (temp / initial_temp).min(1.0)
            }
        }
    }

    /// Bound on any single entry change for a mutation at `epoch`
    pub fn perturbation_bound(&self, fitness: f64, epoch: u64) -> f64 {
        self.max_perturbation * self.effective_rate(fitness, epoch)
    }

    pub fn record(&mut self, epoch: u64) {
        self.last_mutation_epoch = Some(epoch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fitness_window() {
        let rules = MutationRules::default();
        assert!(rules.allows(0.5, 0));
        assert!(!rules.allows(0.01, 0));
        assert!(!rules.allows(0.99, 0));
        assert_eq!(rules.effective_rate(0.99, 0), 0.0);
    }

    #[test]
    fn test_cooldown() {
        let mut rules = MutationRules::strict();
        assert!(rules.allows(0.5, 1));
        rules.record(1);
        assert!(!rules.allows(0.5, 3));
        assert!(rules.allows(0.5, 6));
    }

    #[test]
    fn test_strategies_shape_the_rate() {
        let adaptive = MutationRules::default();
        assert!(adaptive.effective_rate(0.1, 0) > adaptive.effective_rate(0.9, 0));

        let decay = MutationRules::strict();
        assert!(decay.effective_rate(0.5, 0) > decay.effective_rate(0.5, 100));

        let annealing = MutationRules {
            strategy: MutationStrategy::Annealing {
                initial_temp: 1.0,
                cooling_rate: 0.95,
            },
            ..MutationRules::default()
        };
        assert!(annealing.effective_rate(0.5, 0) > annealing.effective_rate(0.5, 50));

        let constant = MutationRules::aggressive();
        assert_eq!(constant.effective_rate(0.0, 0), constant.effective_rate(1.0, 1000));
    }

    #[test]
    fn test_perturbation_bound_never_exceeds_max() {
        let rules = MutationRules::aggressive();
        for epoch in [0, 1, 10, 1000] {
            for fitness in [0.0, 0.3, 1.0] {
                assert!(rules.perturbation_bound(fitness, epoch) <= rules.max_perturbation);
            }
        }
    }

    #[test]
    fn test_validate() {
        MutationRules::default().validate().unwrap();
        MutationRules::strict().validate().unwrap();
        let inverted = MutationRules {
            min_fitness: 0.9,
            max_fitness: 0.1,
            ..MutationRules::default()
        };
        assert!(inverted.validate().is_err());
        let cold = MutationRules {
            strategy: MutationStrategy::Annealing {
                initial_temp: 0.0,
                cooling_rate: 0.5,
            },
            ..MutationRules::default()
        };
        assert!(cold.validate().is_err());
    }
}
