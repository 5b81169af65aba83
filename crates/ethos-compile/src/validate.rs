// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Compiled-slice validation.
//!
//! Draws a seeded synthetic set of continuous situations, evaluates both
//! sides — the floating-point source semantics and the compiled
//! fixed-point pipeline on the discretized frame — and measures veto
//! recall/precision and score divergence.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use ethos_core::eval::evaluate;
use ethos_core::profile::{ProfileSlice, DIMENSIONS, SCORE_ONE};

use crate::error::CompileResult;
use crate::report::ValidationReport;
use crate::source::{source_dimension_score, DriverInputs, Situation, SourceProfile};
use crate::CompilerConfig;

fn sample_situation(rng: &mut ChaCha8Rng) -> Situation {
    let mut flag_bits = |p: f64| {
        let mut bits = 0_u8;
        for bit in 0..4 {
            if rng.gen_bool(p) {
                bits |= 1 << bit;
            }
        }
        bits
    };
    let vulnerable = flag_bits(0.2);
    let zone = flag_bits(0.2);
    Situation {
        distance_m: rng.gen_range(0.0..40.0),
        closing_speed: rng.gen_range(-2.0..4.0),
        risk: rng.gen_range(0.0..1.0),
        vulnerable,
        zone,
        consent_state: rng.gen_range(0..4),
        bystanders: rng.gen_range(0..64),
        action_type: rng.gen_range(0..64),
    }
}

/// Source-side (floating point) normative score for a situation: weighted
/// dimension scores, then lexical ceilings in declared order.
fn source_score(profile: &SourceProfile, situation: &Situation) -> f64 {
    let inputs = DriverInputs::from_situation(situation, profile);
    let total_weight: f64 = profile.dimensions.iter().map(|d| d.weight).sum();
    let mut score = 0.0;
    for i in 0..DIMENSIONS {
        let w = profile.dimensions[i].weight / total_weight;
        score += w * source_dimension_score(profile, i, &inputs);
    }
    for layer in &profile.lexical_layers {
        if layer.trigger.holds(situation) {
            score = score.min(layer.ceiling);
        }
    }
    score.clamp(0.0, 1.0)
}

pub fn validate(
    source: &SourceProfile,
    slice: &ProfileSlice,
    config: &CompilerConfig,
) -> CompileResult<ValidationReport> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let samples = config.validation_samples.max(1) as u64;

    let mut truth_triggers = 0_u64;
    let mut compiled_triggers = 0_u64;
    let mut missed = 0_u64;
    let mut spurious = 0_u64;
    let mut divergence_sum = 0.0;
    let mut divergence_max: f64 = 0.0;
    let mut dim_error_sum = [0.0_f64; DIMENSIONS];

    for _ in 0..samples {
        let situation = sample_situation(&mut rng);
        let frame = situation.discretize(slice.slice_id);
        let compiled = evaluate(&frame, slice);

        for veto in &source.vetoes {
            let truth = veto.when.holds(&situation);
            let fired = compiled.hard_violation_flags.contains(veto.violation);
            if truth {
                truth_triggers += 1;
                if !fired {
                    missed += 1;
                }
            }
            if fired {
                compiled_triggers += 1;
                if !truth {
                    spurious += 1;
                }
            }
        }

        let truth_score = source_score(source, &situation);
        let compiled_score = f64::from(compiled.normative_score) / f64::from(SCORE_ONE);
        let gap = (truth_score - compiled_score).abs();
        divergence_sum += gap;
        divergence_max = divergence_max.max(gap);

        let inputs = DriverInputs::from_situation(&situation, source);
        for i in 0..DIMENSIONS {
            let truth_dim = source_dimension_score(source, i, &inputs);
            let compiled_dim =
                f64::from(compiled.dimension_scores[i]) / f64::from(SCORE_ONE);
            dim_error_sum[i] += (truth_dim - compiled_dim).abs();
        }
    }

    let n = samples as f64;
    let mut mean_dimension_error = [0.0_f64; DIMENSIONS];
    for i in 0..DIMENSIONS {
        mean_dimension_error[i] = dim_error_sum[i] / n;
    }

    Ok(ValidationReport {
        profile_name: source.name.clone(),
        samples,
        seed: config.seed,
        veto_recall: if truth_triggers == 0 {
            1.0
        } else {
            1.0 - missed as f64 / truth_triggers as f64
        },
        veto_precision: if compiled_triggers == 0 {
            1.0
        } else {
            1.0 - spurious as f64 / compiled_triggers as f64
        },
        truth_triggers,
        compiled_triggers,
        missed_triggers: missed,
        spurious_triggers: spurious,
        mean_score_divergence: divergence_sum / n,
        max_score_divergence: divergence_max,
        mean_dimension_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::reference_profile;
    use crate::{compile, CompilerConfig};

    #[test]
    fn reference_profile_has_full_recall() {
        let source = reference_profile();
        let config = CompilerConfig {
            validation_samples: 20_000,
            ..CompilerConfig::default()
        };
        let (_, report) = compile(&source, &config).unwrap();
        assert_eq!(report.missed_triggers, 0);
        assert!(report.truth_triggers > 0, "validation set never triggered a veto");
    }

    #[test]
    fn validation_is_reproducible_for_a_seed() {
        let source = reference_profile();
        let config = CompilerConfig::default();
        let (slice, _) = compile(&source, &config).unwrap();
        let a = validate(&source, &slice, &config).unwrap();
        let b = validate(&source, &slice, &config).unwrap();
        assert_eq!(a.truth_triggers, b.truth_triggers);
        assert_eq!(a.compiled_triggers, b.compiled_triggers);
        assert!((a.mean_score_divergence - b.mean_score_divergence).abs() < f64::EPSILON);
    }

    #[test]
    fn divergence_stays_under_default_bound() {
        let source = reference_profile();
        let config = CompilerConfig::default();
        let (slice, report) = compile(&source, &config).unwrap();
        assert!(report.mean_score_divergence <= config.max_score_divergence);
        // Spot check one deterministic situation end to end.
        let situation = Situation {
            distance_m: 10.0,
            closing_speed: 0.0,
            risk: 0.1,
            vulnerable: 0,
            zone: 0,
            consent_state: 2,
            bystanders: 4,
            action_type: 7,
        };
        let truth = source_score(&source, &situation);
        let compiled = evaluate(&situation.discretize(slice.slice_id), &slice);
        let compiled_score = f64::from(compiled.normative_score) / f64::from(SCORE_ONE);
        assert!((truth - compiled_score).abs() < 0.15);
    }
}
