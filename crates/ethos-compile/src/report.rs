// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use ethos_core::profile::DIMENSIONS;

use crate::error::{CompileError, CompileResult};
use crate::CompilerConfig;

/// Outcome of validating a compiled slice against the synthetic situation
/// set. Precision loss from conservative veto extraction is tracked but
/// never penalized; recall below 1.0 fails the build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub profile_name: String,
    pub samples: u64,
    pub seed: u64,

    /// Fraction of source veto triggers the compiled slice reproduced.
    pub veto_recall: f64,
    /// Fraction of compiled firings backed by a source trigger.
    pub veto_precision: f64,
    pub truth_triggers: u64,
    pub compiled_triggers: u64,
    pub missed_triggers: u64,
    pub spurious_triggers: u64,

    pub mean_score_divergence: f64,
    pub max_score_divergence: f64,
    pub mean_dimension_error: [f64; DIMENSIONS],
}

impl ValidationReport {
    /// Applies the hard gates. An error here aborts compilation before
    /// anything is signed or written.
    pub fn enforce(&self, config: &CompilerConfig) -> CompileResult<()> {
        if self.missed_triggers > 0 {
            return Err(CompileError::RecallBelowOne {
                recall: self.veto_recall,
                misses: self.missed_triggers,
                samples: self.samples,
            });
        }
        if self.mean_score_divergence > config.max_score_divergence {
            return Err(CompileError::DivergenceExceeded {
                actual: self.mean_score_divergence,
                bound: config.max_score_divergence,
            });
        }
        Ok(())
    }
}
