// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Transform 1: hard-veto extraction.
//!
//! Translates each continuous source guard into terms over the frame's
//! discretized fields. Every clause is mapped conservatively: at a band
//! boundary the compiled threshold lands on the side that still triggers,
//! so discretization can only widen a veto, never miss one. The recall
//! gate in `validate` re-checks this on the synthetic set anyway.

use ethos_core::frame::FrameField;
use ethos_core::profile::{FieldTerm, LexicalLayer, TermOp, VetoPredicate, SCORE_ONE};

use crate::error::{CompileError, CompileResult};
use crate::source::{distance_band_of, SourceCondition, SourceProfile};

/// Compiles one continuous condition into conjunctive frame terms.
pub fn compile_condition(condition: &SourceCondition) -> CompileResult<Vec<FieldTerm>> {
    condition.validate()?;
    let mut terms = Vec::new();

    if let Some(d) = condition.max_distance_m {
        // The band containing d still intersects [0, d], so it must trigger.
        terms.push(FieldTerm {
            field: FrameField::DistanceBand,
            op: TermOp::Le,
            value: i32::from(distance_band_of(d)),
        });
    }
    if let Some(v) = condition.min_closing_speed {
        // Floor biases the threshold down: slightly slower approaches still
        // trip the compiled veto.
        let raw = (v * 16.0).floor().clamp(-128.0, 127.0) as i32;
        terms.push(FieldTerm {
            field: FrameField::RelativeSpeed,
            op: TermOp::Ge,
            value: raw,
        });
    }
    if let Some(r) = condition.min_risk {
        let band = ((r * 4.0).floor() as i64).clamp(0, 3) as i32;
        terms.push(FieldTerm {
            field: FrameField::RiskBand,
            op: TermOp::Ge,
            value: band,
        });
    }
    if condition.vulnerable_any {
        terms.push(FieldTerm {
            field: FrameField::VulnerablePresence,
            op: TermOp::MaskAny,
            value: 0x0f,
        });
    }
    if let Some(mask) = condition.zone_any {
        terms.push(FieldTerm {
            field: FrameField::ZoneFlags,
            op: TermOp::MaskAny,
            value: i32::from(mask),
        });
    }
    if condition.consent_refused {
        // Unknown consent (state 0) must also trigger: a base-width frame
        // cannot prove consent was not refused.
        terms.push(FieldTerm {
            field: FrameField::ConsentState,
            op: TermOp::Le,
            value: 1,
        });
    }

    Ok(terms)
}

pub fn extract_vetoes(source: &SourceProfile) -> CompileResult<Vec<VetoPredicate>> {
    source
        .vetoes
        .iter()
        .map(|veto| {
            Ok(VetoPredicate {
                violation: veto.violation,
                terms: compile_condition(&veto.when)?,
            })
        })
        .collect()
}

pub fn extract_layers(source: &SourceProfile) -> CompileResult<Vec<LexicalLayer>> {
    source
        .lexical_layers
        .iter()
        .map(|layer| {
            if !(0.0..=1.0).contains(&layer.ceiling) {
                return Err(CompileError::Invalid(format!(
                    "layer {:?} ceiling out of range",
                    layer.name
                )));
            }
            Ok(LexicalLayer {
                name: layer.name.clone(),
                trigger: compile_condition(&layer.trigger)?,
                // Floor: a quantized ceiling may only be stricter.
                ceiling: (layer.ceiling * f64::from(SCORE_ONE)).floor() as u16,
            })
        })
        .collect()
}
