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

//! ethos-core
//!
//! The pure EthosOS evaluation kernel.
//!
//! This crate implements the deterministic half of the system:
//! - the fixed-width `EthicsFrame` codec (8/16/32-byte layouts)
//! - the evaluation pipeline: hard-veto predicates plus quantized weighted
//!   scoring with lexical-priority overrides, integer arithmetic only
//! - `ProfileSlice` configuration, its canonical signing envelope, and the
//!   fixed-capacity hot-swappable `ProfileStore`
//!
//! Nothing here performs I/O or reads a clock; for a fixed
//! (frame, slice) pair the output is bit-identical on every call.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod error;
pub mod eval;
pub mod frame;
pub mod profile;
pub mod store;

pub use crate::error::{EthosError, EthosResult};
pub use crate::eval::{evaluate, Evaluation, Verdict};
pub use crate::frame::EthicsFrame;
pub use crate::profile::{ProfileSlice, SignedProfileSlice};
pub use crate::store::ProfileStore;
