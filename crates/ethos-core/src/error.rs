// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

pub type EthosResult<T> = Result<T, EthosError>;

#[derive(Debug, Error)]
pub enum EthosError {
    #[error("invalid frame format: {0}")]
    InvalidFrameFormat(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown profile: {0}")]
    UnknownProfile(String),

    #[error("signature rejected: {0}")]
    SignatureRejected(String),

    #[error("profile slot quarantined: {0}")]
    Quarantined(String),

    #[error("internal error: {0}")]
    Internal(String),
}
