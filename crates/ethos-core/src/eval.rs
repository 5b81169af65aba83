// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Deterministic evaluation pipeline.
//!
//! Two stages over a decoded frame and one profile slice, both pure:
//!
//! - **Hard-veto stage**: every compiled predicate is evaluated, every call,
//!   with no short-circuiting; results OR into named violation bits. A
//!   nonzero flag set makes the verdict FORBIDDEN regardless of score.
//! - **Scoring stage**: per-dimension table lookups multiplied by quantized
//!   weights and summed, then lexical layers applied in declared order, each
//!   only able to clamp the running score downward.
//!
//! All arithmetic is integer fixed point. Work per call is bounded by the
//! slice caps enforced in `ProfileSlice::validate`, independent of input
//! values.

use serde::{Deserialize, Serialize};

use crate::error::{EthosError, EthosResult};
use crate::frame::{EthicsFrame, FrameExt, FrameField};
use crate::profile::{
    Dimension, ProfileSlice, ViolationFlags, DIMENSIONS, DIMENSION_ORDER, SCORE_ONE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Permitted,
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Q0.15 normative score in [0, SCORE_ONE].
    pub normative_score: u16,
    pub hard_violation_flags: ViolationFlags,
    /// Aggregate ordinal, 0..3.
    pub risk_assessment: u8,
    pub dimension_scores: [u16; DIMENSIONS],
    pub profile_slice_id: u8,
    pub profile_version: u32,
}

impl Evaluation {
    /// Veto dominance: any violation bit forbids, whatever the score says.
    #[must_use]
    pub fn verdict(&self) -> Verdict {
        if self.hard_violation_flags.any() {
            Verdict::Forbidden
        } else {
            Verdict::Permitted
        }
    }
}

/// Closing-speed bucket used by the safety feature index. Raw Q3.4 speed:
/// at most stationary, under half a scaled unit, under two, or faster.
#[must_use]
fn closing_bucket(relative_speed: i8) -> u8 {
    let raw = i32::from(relative_speed);
    if raw <= 0 {
        0
    } else if raw < 8 {
        1
    } else if raw < 32 {
        2
    } else {
        3
    }
}

#[must_use]
fn bystander_bucket(bystander_band: i32) -> u8 {
    (bystander_band / 16).clamp(0, 3) as u8
}

/// The fixed feature index each dimension's table is keyed by. The mapping
/// is part of the pipeline contract: the compiler enumerates exactly these
/// indexes when it fills a table.
#[must_use]
pub fn feature_index(dimension: Dimension, frame: &EthicsFrame) -> u8 {
    match dimension {
        Dimension::Safety => {
            frame.distance_band
                | (closing_bucket(frame.relative_speed) << 3)
                | (frame.risk_band << 5)
        }
        Dimension::Rights => {
            frame.zone_flags.0 | ((frame.field(FrameField::ConsentState) as u8) << 4)
        }
        Dimension::Welfare => frame.vulnerable_presence.0 | (frame.risk_band << 4),
        Dimension::Fairness => {
            frame.vulnerable_presence.0
                | (bystander_bucket(frame.field(FrameField::BystanderBand)) << 4)
        }
        Dimension::Mission => frame.action_type,
    }
}

/// Evaluates `frame` against `slice`. Pure and bit-exact: repeated calls
/// with the same inputs yield identical results.
#[must_use]
pub fn evaluate(frame: &EthicsFrame, slice: &ProfileSlice) -> Evaluation {
    // Hard-veto stage. Fold over every predicate and every term so the cost
    // never depends on which vetoes fire.
    let mut flags = ViolationFlags::default();
    for veto in &slice.vetoes {
        let fired = veto
            .terms
            .iter()
            .fold(true, |acc, term| acc & term.holds(frame.field(term.field)));
        if fired {
            flags.set(veto.violation);
        }
    }

    // Scoring stage: table lookup per dimension, hint clamp, weighted sum.
    let hints = match frame.ext {
        FrameExt::Ext256(_, h) => h.dimension_hints,
        _ => [0_u8; DIMENSIONS],
    };
    let mut dimension_scores = [0_u16; DIMENSIONS];
    let mut acc: u64 = 0;
    for (i, dimension) in DIMENSION_ORDER.iter().enumerate() {
        let idx = usize::from(feature_index(*dimension, frame));
        let mut score = slice.tables[i].entries[idx];
        // A nonzero extension hint is a conservative per-dimension cap; zero
        // means no hint, so base-width frames evaluate unchanged.
        if hints[i] != 0 {
            score = score.min(u16::from(hints[i]) << 7);
        }
        dimension_scores[i] = score;
        acc += u64::from(slice.weights[i]) * u64::from(score);
    }
    let mut score = ((acc >> 16) as u32).min(u32::from(SCORE_ONE)) as u16;

    // Lexical layers in declared priority order; each may only lower.
    for layer in &slice.layers {
        let triggered = layer
            .trigger
            .iter()
            .fold(true, |acc, term| acc & term.holds(frame.field(term.field)));
        if triggered {
            score = score.min(layer.ceiling);
        }
    }

    let risk_assessment = if flags.any() {
        3
    } else if score < SCORE_ONE / 4 {
        frame.risk_band.max(2)
    } else {
        frame.risk_band
    };

    Evaluation {
        normative_score: score,
        hard_violation_flags: flags,
        risk_assessment,
        dimension_scores,
        profile_slice_id: slice.slice_id,
        profile_version: slice.version,
    }
}

/// Probe frame used by the self-check. Any valid frame works; this one
/// touches every base field.
#[must_use]
fn probe_frame() -> EthicsFrame {
    EthicsFrame {
        option_id: 0x5a5a,
        distance_band: 3,
        relative_speed: 10,
        zone_flags: crate::frame::ZoneFlags(crate::frame::ZoneFlags::PROTECTED_ZONE),
        vulnerable_presence: crate::frame::VulnerableFlags(crate::frame::VulnerableFlags::CHILD),
        risk_band: 2,
        profile_slice_id: 0,
        action_type: 1,
        ext: FrameExt::None,
    }
}

/// Pipeline self-check for a loaded slice: structural validity plus a
/// repeated-probe determinism comparison. The daemon quarantines a slot
/// whose slice fails this rather than returning a verdict it cannot stand
/// behind.
pub fn self_check(slice: &ProfileSlice) -> EthosResult<()> {
    slice.validate()?;
    let probe = probe_frame();
    let first = evaluate(&probe, slice);
    let second = evaluate(&probe, slice);
    if first != second {
        return Err(EthosError::Internal(
            "pipeline self-check: probe evaluation not reproducible".to_string(),
        ));
    }
    if first.normative_score > SCORE_ONE {
        return Err(EthosError::Internal(
            "pipeline self-check: score exceeds unit interval".to_string(),
        ));
    }
    Ok(())
}
