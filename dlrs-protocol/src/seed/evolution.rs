//! Evolution and pruning decisions
//!
//! [`evolve`] is pure: it looks at an owned seed and a piece of feedback and
//! returns what should happen. [`OwnedSeed::apply`](super::OwnedSeed::apply)
//! performs the re-commitment and the lineage append.

use super::fitness::{Feedback, FitnessPolicy, MutationTrigger};
use super::{OwnedSeed, Seed};
use crate::config::LifecycleConfig;
use crate::error::Result;
use crate::factor::LowRankFactorSet;
use log::debug;
use nalgebra::DVector;

/// Outcome of one round of feedback
#[derive(Debug, Clone, PartialEq)]
pub enum Evolution {
    /// Fitness re-scored, factors kept
    Unchanged { fitness: f64 },
    /// New factors to re-commit as the next generation
    Mutated {
        factors: LowRankFactorSet,
        fitness: f64,
    },
}

impl Evolution {
    pub fn fitness(&self) -> f64 {
        match self {
            Evolution::Unchanged { fitness } | Evolution::Mutated { fitness, .. } => *fitness,
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self, Evolution::Mutated { .. })
    }
}

/// Decide whether `seed` mutates on `feedback`, and compute the mutation
pub fn evolve(
    seed: &OwnedSeed,
    feedback: &Feedback,
    policy: &dyn FitnessPolicy,
    trigger: &dyn MutationTrigger,
) -> Result<Evolution> {
    let factors = seed.factors();
    let record = seed.seed();
    let current = policy.fitness(factors, feedback)?;
    let epoch = record.epoch + 1;

    if !trigger.should_mutate(record.fitness, current) || !record.mutation.allows(current, epoch) {
        debug!(
            "No mutation for {} (fitness {:.3} -> {:.3})",
            record.root().short(),
            record.fitness,
            current
        );
        return Ok(Evolution::Unchanged { fitness: current });
    }

    let bound = record.mutation.perturbation_bound(current, epoch);
    let factors = perturb(factors, feedback, bound)?;
    let fitness = policy.fitness(&factors, feedback)?;
    Ok(Evolution::Mutated { factors, fitness })
}

/// One preconditioned gradient step toward the feedback, every entry change
/// clamped to `bound`
fn perturb(factors: &LowRankFactorSet, feedback: &Feedback, bound: f64) -> Result<LowRankFactorSet> {
    feedback.check_shape(factors)?;
    let lr = feedback.learning_rate;
    let error = &feedback.observed - factors.reconstruct();
    let inv_sigma = factors
        .sigma
        .map(|s| if s.abs() > 1e-10 { 1.0 / s } else { 0.0 });
    let clamp = |x: f64| x.clamp(-bound, bound);

    let mut du = &error * &factors.v;
    let mut dv = error.transpose() * &factors.u;
    for i in 0..factors.rank {
        du.column_mut(i).scale_mut(lr * inv_sigma[i]);
        dv.column_mut(i).scale_mut(lr * inv_sigma[i]);
    }
    let dsigma = DVector::from_fn(factors.rank, |i, _| {
        lr * factors.u.column(i).dot(&(&error * factors.v.column(i)))
    });

    LowRankFactorSet::new(
        &factors.u + du.map(clamp),
        &factors.sigma + dsigma.map(clamp),
        &factors.v + dv.map(clamp),
    )
}

/// Why a seed leaves the store
#[derive(Debug, Clone, PartialEq)]
pub enum PruneReason {
    FitnessBelowFloor { fitness: f64, floor: f64 },
    LineageTooDeep { depth: usize, limit: usize },
}

pub fn prune_reason(seed: &Seed, lifecycle: &LifecycleConfig) -> Option<PruneReason> {
    if seed.fitness < lifecycle.fitness_floor {
        return Some(PruneReason::FitnessBelowFloor {
            fitness: seed.fitness,
            floor: lifecycle.fitness_floor,
        });
    }
    let depth = seed.lineage.depth();
    if depth > lifecycle.max_lineage_depth {
        return Some(PruneReason::LineageTooDeep {
            depth,
            limit: lifecycle.max_lineage_depth,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CryptoParams;
    use crate::seed::{
        AnyChangeTrigger, FitnessDropTrigger, MutationRules, ReconstructionFitness, SeedState,
    };
    use crate::zk::ZkContext;
    use nalgebra::DMatrix;

    fn ctx() -> ZkContext {
        ZkContext::new(CryptoParams::default()).unwrap()
    }

    fn shared_seed(ctx: &ZkContext, k: &DMatrix<f64>, rules: MutationRules) -> OwnedSeed {
        let mut owned = OwnedSeed::new(ctx, "evolvable", k, 2, vec!["test".into()], &mut rand::thread_rng())
            .unwrap()
            .with_mutation_rules(rules);
        owned.mark_shared().unwrap();
        owned
    }

    #[test]
    fn test_mutation_moves_toward_feedback() {
        let ctx = ctx();
        let k = DMatrix::new_random(8, 6);
        let owned = shared_seed(&ctx, &k, MutationRules::aggressive());
        let target = &k + DMatrix::new_random(8, 6) * 0.3;
        let feedback = Feedback::new(target, 0.05).unwrap();

        let before = ReconstructionFitness.fitness(owned.factors(), &feedback).unwrap();
        let evolution = evolve(&owned, &feedback, &ReconstructionFitness, &AnyChangeTrigger).unwrap();
        assert!(evolution.is_mutation());
        assert!(evolution.fitness() >= before - 1e-9, "{} < {}", evolution.fitness(), before);
    }

    #[test]
    fn test_perturbation_is_bounded() {
        let k = DMatrix::new_random(6, 6);
        let f = LowRankFactorSet::from_matrix(&k, 2).unwrap();
        let feedback = Feedback::new(DMatrix::new_random(6, 6) * 50.0, 10.0).unwrap();
        let mutated = perturb(&f, &feedback, 0.01).unwrap();
        assert!((&mutated.u - &f.u).amax() <= 0.01 + 1e-12);
        assert!((&mutated.v - &f.v).amax() <= 0.01 + 1e-12);
        assert!((&mutated.sigma - &f.sigma).amax() <= 0.01 + 1e-12);
    }

    #[test]
    fn test_rules_gate_mutation() {
        let ctx = ctx();
        let k = DMatrix::new_random(6, 5);
        let frozen = MutationRules {
            base_rate: 0.0,
            ..MutationRules::default()
        };
        let owned = shared_seed(&ctx, &k, frozen);
        let feedback = Feedback::new(-&k, 0.05).unwrap();
        let evolution = evolve(&owned, &feedback, &ReconstructionFitness, &AnyChangeTrigger).unwrap();
        assert!(!evolution.is_mutation());

        // fitness rose, so a drop trigger stays quiet
        let owned = shared_seed(&ctx, &k, MutationRules::aggressive());
        let feedback = Feedback::new(k.clone(), 0.05).unwrap();
        let evolution = evolve(&owned, &feedback, &ReconstructionFitness, &FitnessDropTrigger::default())
            .unwrap();
        assert!(!evolution.is_mutation());
    }

    struct Always;

    impl MutationTrigger for Always {
        fn should_mutate(&self, _previous: f64, _current: f64) -> bool {
            true
        }
    }

    #[test]
    fn test_apply_appends_generation() {
        let ctx = ctx();
        let mut rng = rand::thread_rng();
        let k = DMatrix::new_random(7, 5);
        let mut owned = shared_seed(&ctx, &k, MutationRules::aggressive());
        let original_id = owned.id();
        let feedback = Feedback::new(&k * 2.0, 0.05).unwrap();

        for round in 1..=3u64 {
            let evolution = evolve(&owned, &feedback, &ReconstructionFitness, &Always).unwrap();
            let new_root = owned.apply(&ctx, evolution, 0.05, &mut rng).unwrap();
            assert_eq!(new_root, Some(owned.seed().root()));
            assert_eq!(owned.seed().epoch, round);
            assert_eq!(owned.state(), SeedState::Shared);
        }
        assert_ne!(owned.id(), original_id);
        assert_eq!(owned.seed().lineage.depth(), 4);
        assert_eq!(owned.seed().lineage.entries()[1].parent_root.unwrap().to_hex(), original_id);
        owned.seed().verify(&ctx, &LifecycleConfig::default()).unwrap();
        crate::zk::open(&ctx, &owned.seed().commitment, owned.secret()).unwrap();
    }

    #[test]
    fn test_prune_reasons() {
        let ctx = ctx();
        let k = DMatrix::new_random(5, 5);
        let owned = shared_seed(&ctx, &k, MutationRules::default());
        let lifecycle = LifecycleConfig::default();
        assert_eq!(prune_reason(owned.seed(), &lifecycle), None);

        let mut weak = owned.seed().clone();
        weak.fitness = 0.01;
        assert!(matches!(
            prune_reason(&weak, &lifecycle),
            Some(PruneReason::FitnessBelowFloor { .. })
        ));

        let shallow = LifecycleConfig {
            max_lineage_depth: 0,
            ..LifecycleConfig::default()
        };
        assert_eq!(
            prune_reason(owned.seed(), &shallow),
            Some(PruneReason::LineageTooDeep { depth: 1, limit: 0 })
        );
    }
}
