//! ReplicationPolicy — when a node re-announces a seed it owns
//!
//! Seeds are content addressed, so replication is propagation: each
//! replication is one more announce round for the seed, bounded by the
//! policy's offspring budget.

use crate::error::{DlrsError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplicationTrigger {
    FitnessThreshold { threshold: f64 },
    /// Every `interval` epochs after the first
    EpochInterval { interval: u64 },
    FitnessAndEpoch { fitness_threshold: f64, min_epochs: u64 },
}

impl ReplicationTrigger {
    fn fires(&self, fitness: f64, epoch: u64) -> bool {
        match *self {
            ReplicationTrigger::FitnessThreshold { threshold } => fitness >= threshold,
            ReplicationTrigger::EpochInterval { interval } => {
                interval > 0 && epoch > 0 && epoch % interval == 0
            }
            ReplicationTrigger::FitnessAndEpoch {
                fitness_threshold,
                min_epochs,
            } => fitness >= fitness_threshold && epoch >= min_epochs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationPolicy {
    pub trigger: ReplicationTrigger,
    pub max_offspring: u32,
    pub offspring_count: u32,
    /// Announced fitness of a replica relative to its source
    pub child_fitness_decay: f64,
    pub min_parent_fitness: f64,
}

impl Default for ReplicationPolicy {
    fn default() -> Self {
        Self {
            trigger: ReplicationTrigger::FitnessThreshold { threshold: 0.3 },
            max_offspring: 10,
            offspring_count: 0,
            child_fitness_decay: 0.9,
            min_parent_fitness: 0.1,
        }
    }
}

impl ReplicationPolicy {
    /// Spread early and often
    pub fn prolific() -> Self {
        Self {
            trigger: ReplicationTrigger::FitnessThreshold { threshold: 0.0 },
            max_offspring: 100,
            offspring_count: 0,
            child_fitness_decay: 0.95,
            min_parent_fitness: 0.0,
        }
    }

    /// Only mature, strong seeds spread
    pub fn selective() -> Self {
        Self {
            trigger: ReplicationTrigger::FitnessAndEpoch {
                fitness_threshold: 0.9,
                min_epochs: 20,
            },
            max_offspring: 3,
            offspring_count: 0,
            child_fitness_decay: 0.98,
            min_parent_fitness: 0.8,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.child_fitness_decay) {
            return Err(DlrsError::InvalidInput(format!(
                "child fitness decay {} is not inside [0, 1]",
                self.child_fitness_decay
            )));
        }
        if let ReplicationTrigger::EpochInterval { interval: 0 } = self.trigger {
            return Err(DlrsError::InvalidInput("epoch interval must be positive".into()));
        }
        Ok(())
    }

    pub fn should_replicate(&self, fitness: f64, epoch: u64) -> bool {
        self.remaining() > 0 && fitness >= self.min_parent_fitness && self.trigger.fires(fitness, epoch)
    }

    pub fn remaining(&self) -> u32 {
        self.max_offspring.saturating_sub(self.offspring_count)
    }

    pub fn child_fitness(&self, parent_fitness: f64) -> f64 {
        parent_fitness * self.child_fitness_decay
    }

    pub fn record_replication(&mut self) {
        self.offspring_count = self.offspring_count.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fitness_and_epoch() {
        let policy = ReplicationPolicy::selective();
        assert!(!policy.should_replicate(0.95, 10));
        assert!(!policy.should_replicate(0.85, 30));
        assert!(policy.should_replicate(0.95, 30));
    }

    #[test]
    fn test_budget_exhausts() {
        let mut policy = ReplicationPolicy {
            max_offspring: 2,
            ..ReplicationPolicy::prolific()
        };
        policy.record_replication();
        assert!(policy.should_replicate(0.5, 0));
        policy.record_replication();
        assert_eq!(policy.remaining(), 0);
        assert!(!policy.should_replicate(0.5, 0));
    }

    #[test]
    fn test_epoch_interval() {
        let policy = ReplicationPolicy {
            trigger: ReplicationTrigger::EpochInterval { interval: 10 },
            ..ReplicationPolicy::default()
        };
        assert!(!policy.should_replicate(0.5, 0));
        assert!(!policy.should_replicate(0.5, 5));
        assert!(policy.should_replicate(0.5, 20));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let policy = ReplicationPolicy {
            trigger: ReplicationTrigger::EpochInterval { interval: 0 },
            ..ReplicationPolicy::default()
        };
        assert!(policy.validate().is_err());
        assert!(!policy.should_replicate(0.9, 10));
    }

    #[test]
    fn test_child_fitness() {
        let policy = ReplicationPolicy::default();
        assert!((policy.child_fitness(0.8) - 0.72).abs() < 1e-10);
    }
}
