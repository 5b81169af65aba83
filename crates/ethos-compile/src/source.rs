// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Rich source-profile model.
//!
//! A `SourceProfile` speaks in continuous, physical terms: meters, scaled
//! speed units, risk in [0,1], floating-point weights and response curves.
//! The runtime never sees any of this; the compiler is the only component
//! that knows what a distance band means in meters.

use serde::{Deserialize, Serialize};

use ethos_core::frame::{
    EthicsFrame, Ext128, FrameExt, VulnerableFlags, ZoneFlags, BYSTANDER_BAND_MAX,
};
use ethos_core::profile::{Dimension, Violation, DIMENSIONS, DIMENSION_ORDER};

use crate::error::{CompileError, CompileResult};

/// Lower edges in meters of the eight ordinal distance bands.
pub const DISTANCE_BAND_LOWER_M: [f64; 8] = [0.0, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0];

/// Upper edges; the farthest band is treated as closing at 64m for
/// midpoint purposes.
pub const DISTANCE_BAND_UPPER_M: [f64; 8] = [0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0];

/// Largest band whose lower edge does not exceed `distance_m`.
#[must_use]
pub fn distance_band_of(distance_m: f64) -> u8 {
    let mut band = 0_u8;
    for (i, lower) in DISTANCE_BAND_LOWER_M.iter().enumerate().skip(1) {
        if distance_m >= *lower {
            band = i as u8;
        }
    }
    band
}

/// A response curve mapping a normalized dimension driver x in [0,1] to a
/// score in [0,1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseCurve {
    Constant { value: f64 },
    Linear { intercept: f64, slope: f64 },
    /// Piecewise-linear over sorted (x, y) points covering [0,1].
    Piecewise { points: Vec<[f64; 2]> },
}

impl ResponseCurve {
    #[must_use]
    pub fn eval(&self, x: f64) -> f64 {
        let x = x.clamp(0.0, 1.0);
        let y = match self {
            ResponseCurve::Constant { value } => *value,
            ResponseCurve::Linear { intercept, slope } => intercept + slope * x,
            ResponseCurve::Piecewise { points } => {
                if points.is_empty() {
                    0.0
                } else {
                    piecewise_eval(points, x)
                }
            }
        };
        y.clamp(0.0, 1.0)
    }

    pub fn validate(&self) -> CompileResult<()> {
        if let ResponseCurve::Piecewise { points } = self {
            if points.len() < 2 {
                return Err(CompileError::Invalid(
                    "piecewise curve needs at least two points".to_string(),
                ));
            }
            for pair in points.windows(2) {
                if pair[1][0] <= pair[0][0] {
                    return Err(CompileError::Invalid(
                        "piecewise curve x values must be strictly increasing".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn piecewise_eval(points: &[[f64; 2]], x: f64) -> f64 {
    if x <= points[0][0] {
        return points[0][1];
    }
    for pair in points.windows(2) {
        let ([x0, y0], [x1, y1]) = (pair[0], pair[1]);
        if x <= x1 {
            let t = (x - x0) / (x1 - x0);
            return y0 + t * (y1 - y0);
        }
    }
    points[points.len() - 1][1]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDimension {
    pub dimension: Dimension,
    pub weight: f64,
    pub response: ResponseCurve,
}

/// A continuous guard; present conditions are conjoined.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceCondition {
    /// Triggers at or inside this range.
    pub max_distance_m: Option<f64>,
    /// Triggers at or above this closing speed (scaled units).
    pub min_closing_speed: Option<f64>,
    /// Triggers at or above this risk level in [0,1].
    pub min_risk: Option<f64>,
    /// Triggers when any vulnerable party is present.
    #[serde(default)]
    pub vulnerable_any: bool,
    /// Triggers when any of these zone-flag bits is set.
    pub zone_any: Option<u8>,
    /// Triggers when consent has been refused.
    #[serde(default)]
    pub consent_refused: bool,
}

impl SourceCondition {
    pub fn validate(&self) -> CompileResult<()> {
        if self.max_distance_m.is_none()
            && self.min_closing_speed.is_none()
            && self.min_risk.is_none()
            && !self.vulnerable_any
            && self.zone_any.is_none()
            && !self.consent_refused
        {
            return Err(CompileError::Invalid(
                "condition has no clauses".to_string(),
            ));
        }
        if let Some(d) = self.max_distance_m {
            if !(d > 0.0) {
                return Err(CompileError::Invalid(
                    "max_distance_m must be positive".to_string(),
                ));
            }
        }
        if let Some(r) = self.min_risk {
            if !(0.0..=1.0).contains(&r) {
                return Err(CompileError::Invalid(
                    "min_risk must be in [0,1]".to_string(),
                ));
            }
        }
        if let Some(mask) = self.zone_any {
            if mask == 0 || mask & !ZoneFlags::MASK != 0 {
                return Err(CompileError::Invalid(
                    "zone_any mask has no valid bits".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Ground-truth trigger over the continuous situation.
    #[must_use]
    pub fn holds(&self, s: &Situation) -> bool {
        if let Some(d) = self.max_distance_m {
            if s.distance_m > d {
                return false;
            }
        }
        if let Some(v) = self.min_closing_speed {
            if s.closing_speed < v {
                return false;
            }
        }
        if let Some(r) = self.min_risk {
            if s.risk < r {
                return false;
            }
        }
        if self.vulnerable_any && s.vulnerable == 0 {
            return false;
        }
        if let Some(mask) = self.zone_any {
            if s.zone & mask == 0 {
                return false;
            }
        }
        if self.consent_refused && s.consent_state != 1 {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceVeto {
    pub name: String,
    pub violation: Violation,
    pub when: SourceCondition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceLayer {
    pub name: String,
    pub trigger: SourceCondition,
    /// Score ceiling in [0,1] applied while the trigger holds.
    pub ceiling: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceProfile {
    pub name: String,
    pub slice_id: u8,
    pub version: u32,
    pub dimensions: Vec<SourceDimension>,
    pub vetoes: Vec<SourceVeto>,
    pub lexical_layers: Vec<SourceLayer>,
    /// Mission affinity per action type, 64 entries in [0,1].
    pub mission_affinity: Vec<f64>,
}

impl SourceProfile {
    pub fn validate(&self) -> CompileResult<()> {
        if self.dimensions.len() != DIMENSIONS {
            return Err(CompileError::Invalid(format!(
                "expected {DIMENSIONS} dimensions, found {}",
                self.dimensions.len()
            )));
        }
        for (i, dim) in DIMENSION_ORDER.iter().enumerate() {
            if self.dimensions[i].dimension != *dim {
                return Err(CompileError::Invalid(format!(
                    "dimension {i} must be {dim:?} (canonical order)"
                )));
            }
        }
        let total: f64 = self.dimensions.iter().map(|d| d.weight).sum();
        if !(total > 0.0) {
            return Err(CompileError::Invalid(
                "dimension weights must have a positive sum".to_string(),
            ));
        }
        for dim in &self.dimensions {
            if !(dim.weight >= 0.0) {
                return Err(CompileError::Invalid(
                    "dimension weights must be non-negative".to_string(),
                ));
            }
            dim.response.validate()?;
        }
        for veto in &self.vetoes {
            veto.when.validate()?;
        }
        for layer in &self.lexical_layers {
            layer.trigger.validate()?;
            if !(0.0..=1.0).contains(&layer.ceiling) {
                return Err(CompileError::Invalid(format!(
                    "layer {:?} ceiling must be in [0,1]",
                    layer.name
                )));
            }
        }
        if self.mission_affinity.len() != 64 {
            return Err(CompileError::Invalid(
                "mission_affinity must have 64 entries".to_string(),
            ));
        }
        if self.mission_affinity.iter().any(|a| !(0.0..=1.0).contains(a)) {
            return Err(CompileError::Invalid(
                "mission_affinity entries must be in [0,1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// A continuous candidate-action situation: the compiler-side ground truth
/// an `EthicsFrame` discretizes.
#[derive(Debug, Clone, Copy)]
pub struct Situation {
    pub distance_m: f64,
    /// Scaled units, positive closing.
    pub closing_speed: f64,
    pub risk: f64,
    pub vulnerable: u8,
    pub zone: u8,
    pub consent_state: u8,
    pub bystanders: u8,
    pub action_type: u8,
}

impl Situation {
    /// Discretizes into the frame an upstream converter would emit.
    /// Monotone in every clause the veto extractor relies on: floor for
    /// speed and risk, lower-edge banding for distance.
    #[must_use]
    pub fn discretize(&self, slice_id: u8) -> EthicsFrame {
        let raw_speed = (self.closing_speed * 16.0).floor().clamp(-128.0, 127.0) as i8;
        let risk_band = ((self.risk * 4.0).floor() as i64).clamp(0, 3) as u8;
        EthicsFrame {
            option_id: 0,
            distance_band: distance_band_of(self.distance_m),
            relative_speed: raw_speed,
            zone_flags: ZoneFlags(self.zone & ZoneFlags::MASK),
            vulnerable_presence: VulnerableFlags(self.vulnerable & VulnerableFlags::MASK),
            risk_band,
            profile_slice_id: slice_id,
            action_type: self.action_type & 0x3f,
            ext: FrameExt::Ext128(Ext128 {
                bystander_band: self.bystanders.min(BYSTANDER_BAND_MAX),
                contact_time_band: 0,
                mission_phase: 0,
                consent_state: self.consent_state.min(3),
                environment_class: 0,
            }),
        }
    }
}

/// Normalized driver components the dimension curves consume. The same
/// formulas are used from continuous situations (validation) and from band
/// midpoints (table construction); only the inputs differ.
#[derive(Debug, Clone, Copy)]
pub struct DriverInputs {
    pub proximity: f64,
    pub closing: f64,
    pub risk: f64,
    pub vulnerability_load: f64,
    pub zone_burden: f64,
    pub consent_relief: f64,
    pub bystander_density: f64,
    pub mission_affinity: f64,
}

#[must_use]
pub fn vulnerability_load(vulnerable: u8) -> f64 {
    let mut load: f64 = 0.0;
    if vulnerable & VulnerableFlags::CHILD != 0 {
        load += 0.35;
    }
    if vulnerable & VulnerableFlags::ELDERLY != 0 {
        load += 0.25;
    }
    if vulnerable & VulnerableFlags::DISABLED != 0 {
        load += 0.25;
    }
    if vulnerable & VulnerableFlags::ANIMAL != 0 {
        load += 0.15;
    }
    load.min(1.0)
}

#[must_use]
pub fn zone_burden(zone: u8) -> f64 {
    let mut burden: f64 = 0.0;
    if zone & ZoneFlags::PROTECTED_ZONE != 0 {
        burden += 0.30;
    }
    if zone & ZoneFlags::CONSENT_REQUIRED != 0 {
        burden += 0.25;
    }
    if zone & ZoneFlags::LEGAL_CONSTRAINT != 0 {
        burden += 0.30;
    }
    if zone & ZoneFlags::SENSITIVE_AREA != 0 {
        burden += 0.15;
    }
    burden.min(1.0)
}

#[must_use]
pub fn consent_relief(consent_state: u8) -> f64 {
    match consent_state {
        3 => 0.20,
        2 => 0.10,
        _ => 0.0,
    }
}

impl DriverInputs {
    #[must_use]
    pub fn from_situation(s: &Situation, profile: &SourceProfile) -> Self {
        Self {
            proximity: (1.0 - s.distance_m / 32.0).clamp(0.0, 1.0),
            closing: (s.closing_speed / 8.0).clamp(0.0, 1.0),
            risk: s.risk.clamp(0.0, 1.0),
            vulnerability_load: vulnerability_load(s.vulnerable),
            zone_burden: zone_burden(s.zone),
            consent_relief: consent_relief(s.consent_state),
            bystander_density: f64::from(s.bystanders.min(BYSTANDER_BAND_MAX))
                / f64::from(BYSTANDER_BAND_MAX),
            mission_affinity: profile.mission_affinity[usize::from(s.action_type & 0x3f)],
        }
    }

    /// The per-dimension driver x each response curve is evaluated at.
    #[must_use]
    pub fn driver(&self, dimension: Dimension) -> f64 {
        let x = match dimension {
            Dimension::Safety => {
                1.0 - (0.45 * self.proximity + 0.35 * self.closing + 0.20 * self.risk)
            }
            Dimension::Rights => 1.0 - (self.zone_burden - self.consent_relief).max(0.0),
            Dimension::Welfare => 1.0 - self.vulnerability_load * (0.4 + 0.6 * self.risk),
            Dimension::Fairness => {
                1.0 - (0.6 * self.vulnerability_load + 0.25 * self.bystander_density)
            }
            Dimension::Mission => self.mission_affinity,
        };
        x.clamp(0.0, 1.0)
    }
}

/// Evaluates the source-side (floating point) score of one dimension.
#[must_use]
pub fn source_dimension_score(
    profile: &SourceProfile,
    dimension_index: usize,
    inputs: &DriverInputs,
) -> f64 {
    let dim = &profile.dimensions[dimension_index];
    dim.response.eval(inputs.driver(dim.dimension))
}

/// Built-in reference profile: a guardian-style policy exercising every
/// transform. Used by tests and as a worked example for profile authors.
#[must_use]
pub fn reference_profile() -> SourceProfile {
    SourceProfile {
        name: "reference-guardian".to_string(),
        slice_id: 0,
        version: 1,
        dimensions: vec![
            SourceDimension {
                dimension: Dimension::Safety,
                weight: 0.35,
                response: ResponseCurve::Linear {
                    intercept: 0.0,
                    slope: 1.0,
                },
            },
            SourceDimension {
                dimension: Dimension::Rights,
                weight: 0.25,
                response: ResponseCurve::Linear {
                    intercept: 0.05,
                    slope: 0.95,
                },
            },
            SourceDimension {
                dimension: Dimension::Welfare,
                weight: 0.20,
                response: ResponseCurve::Piecewise {
                    points: vec![[0.0, 0.0], [0.5, 0.55], [1.0, 1.0]],
                },
            },
            SourceDimension {
                dimension: Dimension::Fairness,
                weight: 0.12,
                response: ResponseCurve::Linear {
                    intercept: 0.1,
                    slope: 0.9,
                },
            },
            SourceDimension {
                dimension: Dimension::Mission,
                weight: 0.08,
                response: ResponseCurve::Linear {
                    intercept: 0.0,
                    slope: 1.0,
                },
            },
        ],
        vetoes: vec![
            SourceVeto {
                name: "vulnerable-risk".to_string(),
                violation: Violation::VulnerableRisk,
                when: SourceCondition {
                    min_risk: Some(0.5),
                    vulnerable_any: true,
                    ..SourceCondition::default()
                },
            },
            SourceVeto {
                name: "close-fast-harm".to_string(),
                violation: Violation::UnauthorizedHarm,
                when: SourceCondition {
                    max_distance_m: Some(2.0),
                    min_closing_speed: Some(0.5),
                    min_risk: Some(0.75),
                    ..SourceCondition::default()
                },
            },
            SourceVeto {
                name: "legal-constraint".to_string(),
                violation: Violation::LegalBreach,
                when: SourceCondition {
                    zone_any: Some(ZoneFlags::LEGAL_CONSTRAINT),
                    ..SourceCondition::default()
                },
            },
            SourceVeto {
                name: "consent-refused".to_string(),
                violation: Violation::ConsentBreach,
                when: SourceCondition {
                    zone_any: Some(ZoneFlags::CONSENT_REQUIRED),
                    consent_refused: true,
                    ..SourceCondition::default()
                },
            },
            SourceVeto {
                name: "protected-zone-incursion".to_string(),
                violation: Violation::ProtectedZoneBreach,
                when: SourceCondition {
                    zone_any: Some(ZoneFlags::PROTECTED_ZONE),
                    min_closing_speed: Some(0.25),
                    ..SourceCondition::default()
                },
            },
        ],
        lexical_layers: vec![
            SourceLayer {
                name: "protected-zone-cap".to_string(),
                trigger: SourceCondition {
                    zone_any: Some(ZoneFlags::PROTECTED_ZONE),
                    ..SourceCondition::default()
                },
                ceiling: 0.25,
            },
            SourceLayer {
                name: "vulnerable-caution".to_string(),
                trigger: SourceCondition {
                    vulnerable_any: true,
                    min_risk: Some(0.25),
                    ..SourceCondition::default()
                },
                ceiling: 0.6,
            },
        ],
        mission_affinity: vec![0.6; 64],
    }
}
