// Copyright [2026] [EthosOS Contributors]
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! ethos-compile
//!
//! Host-side profile compiler. Translates a rich floating-point
//! `SourceProfile` into the fixed-point, veto-conservative `ProfileSlice`
//! the evaluation pipeline consumes, in three ordered transforms:
//!
//! 1. hard-veto extraction (conservative discretization, `extract`)
//! 2. weight quantization (`quantize`)
//! 3. scoring-function approximation (`approx`)
//!
//! followed by validation against a seeded synthetic situation set
//! (`validate`). Compilation fails — and no slice is emitted — if compiled
//! veto recall is below 100% or score divergence exceeds the configured
//! bound. Conservative over-approximation of vetoes is policy: false
//! positives are acceptable, false negatives are not.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod approx;
pub mod error;
pub mod extract;
pub mod quantize;
pub mod report;
pub mod source;
pub mod validate;

use ed25519_dalek::SigningKey;

use ethos_core::profile::{ProfileSlice, SignedProfileSlice};

pub use crate::error::{CompileError, CompileResult};
pub use crate::report::ValidationReport;
pub use crate::source::SourceProfile;

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Synthetic validation set size; the recall gate needs a dense set.
    pub validation_samples: usize,
    /// Seed for the validation sampler; fixed so reports are reproducible.
    pub seed: u64,
    /// Bound on the sum of absolute weight quantization errors.
    pub max_weight_error: f64,
    /// Bound on mean |source - compiled| score divergence.
    pub max_score_divergence: f64,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            validation_samples: 10_000,
            seed: 0x4554_4853,
            max_weight_error: 0.01,
            max_score_divergence: 0.05,
        }
    }
}

/// Runs the full compile: extract, quantize, approximate, validate.
pub fn compile(
    source: &SourceProfile,
    config: &CompilerConfig,
) -> CompileResult<(ProfileSlice, ValidationReport)> {
    source.validate()?;

    let vetoes = extract::extract_vetoes(source)?;
    let layers = extract::extract_layers(source)?;
    let weights = quantize::quantize_weights(source, config)?;
    let tables = approx::build_tables(source)?;

    let slice = ProfileSlice {
        slice_id: source.slice_id,
        version: source.version,
        name: source.name.clone(),
        weights,
        tables,
        vetoes,
        layers,
    };
    slice
        .validate()
        .map_err(|e| CompileError::Invalid(e.to_string()))?;

    let report = validate::validate(source, &slice, config)?;
    report.enforce(config)?;
    Ok((slice, report))
}

/// Compiles and signs. The signature is over the slice's canonical bytes;
/// an unvalidated slice is never signed.
pub fn compile_and_sign(
    source: &SourceProfile,
    config: &CompilerConfig,
    key_id: &str,
    signing_key: &SigningKey,
) -> CompileResult<(SignedProfileSlice, ValidationReport)> {
    let (slice, report) = compile(source, config)?;
    let signed = SignedProfileSlice::sign(slice, key_id, signing_key)
        .map_err(|e| CompileError::Invalid(e.to_string()))?;
    Ok((signed, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_profile_compiles_and_validates() {
        let source = source::reference_profile();
        let config = CompilerConfig::default();
        let (slice, report) = compile(&source, &config).unwrap();
        assert_eq!(slice.slice_id, source.slice_id);
        assert!((report.veto_recall - 1.0).abs() < f64::EPSILON);
        assert!(report.mean_score_divergence <= config.max_score_divergence);
    }

    #[test]
    fn compile_and_sign_produces_verifiable_envelope() {
        let sk = SigningKey::from_bytes(&[9_u8; 32]);
        let (signed, _) = compile_and_sign(
            &source::reference_profile(),
            &CompilerConfig::default(),
            "gov-test",
            &sk,
        )
        .unwrap();

        let mut trusted = ethos_core::profile::TrustedGovernanceKeys::default();
        trusted
            .insert_hex("gov-test", &hex::encode(sk.verifying_key().to_bytes()))
            .unwrap();
        signed.verify(&trusted).unwrap();
    }
}
