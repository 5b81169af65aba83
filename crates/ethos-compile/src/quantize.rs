// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Transform 2: weight quantization.
//!
//! Source weights are normalized to sum 1.0 and quantized to `WEIGHT_ONE`
//! by largest remainder, so the integer sum is exact and the per-weight
//! error is at most one quantum. The summed absolute error is still checked
//! against the configured bound.

use ethos_core::profile::{DIMENSIONS, WEIGHT_ONE};

use crate::error::{CompileError, CompileResult};
use crate::source::SourceProfile;
use crate::CompilerConfig;

pub fn quantize_weights(
    source: &SourceProfile,
    config: &CompilerConfig,
) -> CompileResult<[u32; DIMENSIONS]> {
    let total: f64 = source.dimensions.iter().map(|d| d.weight).sum();
    if !(total > 0.0) {
        return Err(CompileError::Invalid(
            "weights must have a positive sum".to_string(),
        ));
    }
    let normalized: Vec<f64> = source.dimensions.iter().map(|d| d.weight / total).collect();

    // Largest remainder: floor everything, then hand the leftover quanta to
    // the largest fractional parts.
    let exact: Vec<f64> = normalized
        .iter()
        .map(|w| w * f64::from(WEIGHT_ONE))
        .collect();
    let mut quantized: Vec<u32> = exact.iter().map(|e| e.floor() as u32).collect();
    let assigned: u32 = quantized.iter().sum();
    // Rounding error can leave the floored sum at (or in principle past)
    // the target, in which case there is nothing to distribute.
    let mut remainder = WEIGHT_ONE.saturating_sub(assigned);

    let mut order: Vec<usize> = (0..DIMENSIONS).collect();
    order.sort_by(|a, b| {
        let fa = exact[*a] - exact[*a].floor();
        let fb = exact[*b] - exact[*b].floor();
        fb.partial_cmp(&fa).unwrap_or(std::cmp::Ordering::Equal)
    });
    for idx in order {
        if remainder == 0 {
            break;
        }
        quantized[idx] += 1;
        remainder -= 1;
    }

    let error: f64 = quantized
        .iter()
        .zip(normalized.iter())
        .map(|(q, w)| (f64::from(*q) / f64::from(WEIGHT_ONE) - w).abs())
        .sum();
    if error > config.max_weight_error {
        return Err(CompileError::WeightErrorExceeded {
            actual: error,
            bound: config.max_weight_error,
        });
    }

    let mut out = [0_u32; DIMENSIONS];
    out.copy_from_slice(&quantized);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::reference_profile;

    #[test]
    fn quantized_sum_is_exact() {
        let weights =
            quantize_weights(&reference_profile(), &CompilerConfig::default()).unwrap();
        assert_eq!(weights.iter().map(|w| u64::from(*w)).sum::<u64>(), u64::from(WEIGHT_ONE));
    }

    #[test]
    fn unnormalized_source_weights_are_accepted() {
        let mut source = reference_profile();
        for dim in &mut source.dimensions {
            dim.weight *= 7.0; // sum no longer 1.0
        }
        let weights = quantize_weights(&source, &CompilerConfig::default()).unwrap();
        assert_eq!(weights.iter().map(|w| u64::from(*w)).sum::<u64>(), u64::from(WEIGHT_ONE));
    }

    #[test]
    fn per_weight_error_is_within_one_quantum() {
        let source = reference_profile();
        let weights = quantize_weights(&source, &CompilerConfig::default()).unwrap();
        let total: f64 = source.dimensions.iter().map(|d| d.weight).sum();
        for (q, dim) in weights.iter().zip(source.dimensions.iter()) {
            let err = (f64::from(*q) / f64::from(WEIGHT_ONE) - dim.weight / total).abs();
            assert!(err <= 1.0 / f64::from(WEIGHT_ONE));
        }
    }

    #[test]
    fn exactly_representable_weights_leave_no_remainder() {
        let mut source = reference_profile();
        let dyadic = [0.5, 0.25, 0.125, 0.0625, 0.0625];
        for (dim, w) in source.dimensions.iter_mut().zip(dyadic) {
            dim.weight = w;
        }
        let weights = quantize_weights(&source, &CompilerConfig::default()).unwrap();
        assert_eq!(weights[0], WEIGHT_ONE / 2);
        assert_eq!(weights.iter().map(|w| u64::from(*w)).sum::<u64>(), u64::from(WEIGHT_ONE));
    }

    #[test]
    fn zero_sum_rejected() {
        let mut source = reference_profile();
        for dim in &mut source.dimensions {
            dim.weight = 0.0;
        }
        assert!(quantize_weights(&source, &CompilerConfig::default()).is_err());
    }
}
