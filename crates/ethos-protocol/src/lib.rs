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

//! ethos-protocol
//!
//! Wire contract shared by the EthosOS daemon and its clients:
//! - gRPC service and message definitions (`pb`)
//! - caller-visible status codes
//! - signature domain constants and the domain-separated digest

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
#![forbid(unsafe_code)]

pub mod pb {
    pub mod v1 {
        tonic::include_proto!("ethos.v1");
    }

    pub use v1::*;
}

pub const PROTOCOL_SEMVER: &str = "1.0.0";

pub const MIN_DAEMON_VERSION: &str = "0.1.0-alpha";

pub const DOMAIN_PROFILE_SLICE_V1: &[u8] = b"ethos:profile_slice:v1";
pub const DOMAIN_DECISION_RECORD_V1: &[u8] = b"ethos:decision_record:v1";

/// Returns `SHA256(domain || payload)`.
///
/// Shared by the daemon, the profile compiler, and clients verifying
/// governance signatures. Do not modify without a coordinated protocol
/// version bump.
#[must_use]
pub fn sha256_domain(domain: &[u8], payload: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(payload);

    let digest = hasher.finalize();
    let mut out = [0_u8; 32];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_separation_changes_digest() {
        let a = sha256_domain(DOMAIN_PROFILE_SLICE_V1, b"payload");
        let b = sha256_domain(DOMAIN_DECISION_RECORD_V1, b"payload");
        assert_ne!(a, b);
    }

    #[test]
    fn digest_is_stable() {
        let a = sha256_domain(DOMAIN_PROFILE_SLICE_V1, b"payload");
        let b = sha256_domain(DOMAIN_PROFILE_SLICE_V1, b"payload");
        assert_eq!(a, b);
    }
}
