// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Transform 3: scoring-function approximation.
//!
//! The pipeline scores a dimension by a table lookup keyed on its fixed
//! feature index. This module fills those tables by enumerating every
//! index, reconstructing the band-midpoint driver inputs the index stands
//! for, and sampling the source response curve there. Divergence against
//! continuous held-out samples is measured in `validate`.

use ethos_core::profile::{Dimension, ScoreTable, DIMENSIONS, DIMENSION_ORDER, SCORE_ONE, SCORE_TABLE_LEN};

use crate::error::CompileResult;
use crate::source::{
    consent_relief, vulnerability_load, zone_burden, DriverInputs, SourceProfile,
    DISTANCE_BAND_LOWER_M, DISTANCE_BAND_UPPER_M,
};

/// Raw Q3.4 midpoints of the four closing-speed buckets the safety index
/// uses (at-most-stationary, slow, moderate, fast).
const CLOSING_BUCKET_MID_RAW: [f64; 4] = [0.0, 4.0, 20.0, 60.0];

fn neutral_inputs() -> DriverInputs {
    DriverInputs {
        proximity: 0.0,
        closing: 0.0,
        risk: 0.0,
        vulnerability_load: 0.0,
        zone_burden: 0.0,
        consent_relief: 0.0,
        bystander_density: 0.0,
        mission_affinity: 0.0,
    }
}

fn risk_band_mid(band: u8) -> f64 {
    (f64::from(band) + 0.5) / 4.0
}

/// Band-midpoint driver inputs for one (dimension, feature index) pair.
/// Components irrelevant to the dimension stay neutral; its driver formula
/// never reads them.
#[must_use]
pub fn midpoint_inputs(dimension: Dimension, index: u8, profile: &SourceProfile) -> DriverInputs {
    let idx = usize::from(index);
    let mut inputs = neutral_inputs();
    match dimension {
        Dimension::Safety => {
            let band = (idx & 0x7) as u8;
            let bucket = (idx >> 3) & 0x3;
            let risk_band = ((idx >> 5) & 0x3) as u8;
            let mid_m =
                (DISTANCE_BAND_LOWER_M[usize::from(band)] + DISTANCE_BAND_UPPER_M[usize::from(band)]) / 2.0;
            inputs.proximity = (1.0 - mid_m / 32.0).clamp(0.0, 1.0);
            inputs.closing = (CLOSING_BUCKET_MID_RAW[bucket] / 16.0 / 8.0).clamp(0.0, 1.0);
            inputs.risk = risk_band_mid(risk_band);
        }
        Dimension::Rights => {
            inputs.zone_burden = zone_burden((idx & 0xf) as u8);
            inputs.consent_relief = consent_relief(((idx >> 4) & 0x3) as u8);
        }
        Dimension::Welfare => {
            inputs.vulnerability_load = vulnerability_load((idx & 0xf) as u8);
            inputs.risk = risk_band_mid(((idx >> 4) & 0x3) as u8);
        }
        Dimension::Fairness => {
            inputs.vulnerability_load = vulnerability_load((idx & 0xf) as u8);
            let bucket = ((idx >> 4) & 0x3) as u8;
            inputs.bystander_density = (f64::from(bucket) * 16.0 + 8.0) / 63.0;
            inputs.bystander_density = inputs.bystander_density.min(1.0);
        }
        Dimension::Mission => {
            inputs.mission_affinity = profile.mission_affinity[idx & 0x3f];
        }
    }
    inputs
}

fn quantize_score(y: f64) -> u16 {
    let q = (y.clamp(0.0, 1.0) * f64::from(SCORE_ONE)).round();
    (q as u32).min(u32::from(SCORE_ONE)) as u16
}

pub fn build_tables(profile: &SourceProfile) -> CompileResult<Vec<ScoreTable>> {
    let mut tables = Vec::with_capacity(DIMENSIONS);
    for (i, dimension) in DIMENSION_ORDER.iter().enumerate() {
        let mut entries = Vec::with_capacity(SCORE_TABLE_LEN);
        for index in 0..SCORE_TABLE_LEN {
            let inputs = midpoint_inputs(*dimension, index as u8, profile);
            let y = profile.dimensions[i].response.eval(inputs.driver(*dimension));
            entries.push(quantize_score(y));
        }
        tables.push(ScoreTable { entries });
    }
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::reference_profile;

    #[test]
    fn tables_cover_every_index() {
        let tables = build_tables(&reference_profile()).unwrap();
        assert_eq!(tables.len(), DIMENSIONS);
        for table in &tables {
            assert_eq!(table.entries.len(), SCORE_TABLE_LEN);
            assert!(table.entries.iter().all(|e| *e <= SCORE_ONE));
        }
    }

    #[test]
    fn safety_scores_fall_as_threat_rises() {
        let profile = reference_profile();
        let tables = build_tables(&profile).unwrap();
        // Far, stationary, low risk vs. near, fast, high risk.
        let benign = usize::from(7_u8) | (0 << 3) | (0 << 5);
        let dire = usize::from(0_u8) | (3 << 3) | (3 << 5);
        assert!(tables[0].entries[benign] > tables[0].entries[dire]);
    }

    #[test]
    fn welfare_scores_fall_with_vulnerability() {
        let profile = reference_profile();
        let tables = build_tables(&profile).unwrap();
        let none = 0_usize | (3 << 4);
        let child = 1_usize | (3 << 4);
        assert!(tables[2].entries[none] > tables[2].entries[child]);
    }

    #[test]
    fn quantization_hits_the_endpoints() {
        assert_eq!(quantize_score(0.0), 0);
        assert_eq!(quantize_score(1.0), SCORE_ONE);
        assert_eq!(quantize_score(2.5), SCORE_ONE);
    }
}
