// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("invalid source profile: {0}")]
    Invalid(String),

    #[error("weight quantization error {actual:.5} exceeds bound {bound:.5}")]
    WeightErrorExceeded { actual: f64, bound: f64 },

    #[error("compiled veto recall {recall:.5} below 1.0 ({misses} missed triggers of {samples})")]
    RecallBelowOne {
        recall: f64,
        misses: u64,
        samples: u64,
    },

    #[error("mean score divergence {actual:.5} exceeds bound {bound:.5}")]
    DivergenceExceeded { actual: f64, bound: f64 },

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
