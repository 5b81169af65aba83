// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Compiled profile configuration.
//!
//! A `ProfileSlice` is the unit the evaluation pipeline consumes: quantized
//! dimension weights, per-dimension score tables, hard-veto predicates and
//! lexical-priority layers. Slices are produced by `ethos-compile`, signed
//! by a governance authority, and installed whole; they are never mutated
//! in place.

use std::collections::BTreeMap;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EthosError, EthosResult};
use crate::frame::FrameField;
use ethos_protocol::{sha256_domain, DOMAIN_PROFILE_SLICE_V1};

/// Scores are Q0.15 fixed point over the closed unit interval.
pub const SCORE_ONE: u16 = 1 << 15;

/// Quantized dimension weights sum to this value.
pub const WEIGHT_ONE: u32 = 1 << 16;

/// Accepted drift of the integer weight sum, ~1% of `WEIGHT_ONE`.
pub const WEIGHT_SUM_TOLERANCE: u32 = 656;

pub const PROFILE_SLOTS: usize = 16;

pub const MAX_VETO_PREDICATES: usize = 32;
pub const MAX_TERMS_PER_PREDICATE: usize = 8;
pub const MAX_LEXICAL_LAYERS: usize = 8;

pub const SCORE_TABLE_LEN: usize = 256;

/// The weighted scoring dimensions, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dimension {
    Safety,
    Rights,
    Welfare,
    Fairness,
    Mission,
}

pub const DIMENSIONS: usize = 5;

pub const DIMENSION_ORDER: [Dimension; DIMENSIONS] = [
    Dimension::Safety,
    Dimension::Rights,
    Dimension::Welfare,
    Dimension::Fairness,
    Dimension::Mission,
];

/// Named hard-violation categories, one bit each in the response flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Violation {
    UnauthorizedHarm,
    RightsViolation,
    VulnerableRisk,
    LegalBreach,
    ConsentBreach,
    ProtectedZoneBreach,
}

impl Violation {
    #[must_use]
    pub fn bit(self) -> u16 {
        match self {
            Violation::UnauthorizedHarm => 1 << 0,
            Violation::RightsViolation => 1 << 1,
            Violation::VulnerableRisk => 1 << 2,
            Violation::LegalBreach => 1 << 3,
            Violation::ConsentBreach => 1 << 4,
            Violation::ProtectedZoneBreach => 1 << 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ViolationFlags(pub u16);

impl ViolationFlags {
    #[must_use]
    pub fn any(self) -> bool {
        self.0 != 0
    }

    #[must_use]
    pub fn contains(self, violation: Violation) -> bool {
        self.0 & violation.bit() != 0
    }

    pub fn set(&mut self, violation: Violation) {
        self.0 |= violation.bit();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermOp {
    /// Field value >= threshold.
    Ge,
    /// Field value <= threshold.
    Le,
    /// Field value == threshold.
    Eq,
    /// Field value & mask != 0.
    MaskAny,
    /// Field value & mask == mask.
    MaskAll,
}

/// One guarded comparison over a single frame field. A predicate is the
/// conjunction of its terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldTerm {
    pub field: FrameField,
    pub op: TermOp,
    pub value: i32,
}

impl FieldTerm {
    #[must_use]
    pub fn holds(&self, field_value: i32) -> bool {
        match self.op {
            TermOp::Ge => field_value >= self.value,
            TermOp::Le => field_value <= self.value,
            TermOp::Eq => field_value == self.value,
            TermOp::MaskAny => field_value & self.value != 0,
            TermOp::MaskAll => field_value & self.value == self.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VetoPredicate {
    pub violation: Violation,
    pub terms: Vec<FieldTerm>,
}

/// A priority-ordered override that can only lower the running score, never
/// raise it: when every trigger term holds, the score is clamped to
/// `ceiling`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexicalLayer {
    pub name: String,
    pub trigger: Vec<FieldTerm>,
    pub ceiling: u16,
}

/// Per-dimension compiled response table, indexed by the pipeline's fixed
/// feature index for that dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreTable {
    pub entries: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSlice {
    pub slice_id: u8,
    pub version: u32,
    pub name: String,
    pub weights: [u32; DIMENSIONS],
    pub tables: Vec<ScoreTable>,
    pub vetoes: Vec<VetoPredicate>,
    pub layers: Vec<LexicalLayer>,
}

impl ProfileSlice {
    pub fn validate(&self) -> EthosResult<()> {
        if usize::from(self.slice_id) >= PROFILE_SLOTS {
            return Err(EthosError::InvalidArgument(format!(
                "slice_id {} exceeds slot count {}",
                self.slice_id, PROFILE_SLOTS
            )));
        }
        if self.version == 0 {
            return Err(EthosError::InvalidArgument(
                "profile version must be positive".to_string(),
            ));
        }
        let sum: u64 = self.weights.iter().map(|w| u64::from(*w)).sum();
        let drift = sum.abs_diff(u64::from(WEIGHT_ONE));
        if drift > u64::from(WEIGHT_SUM_TOLERANCE) {
            return Err(EthosError::InvalidArgument(format!(
                "weight sum {sum} drifts {drift} from {WEIGHT_ONE}"
            )));
        }
        if self.tables.len() != DIMENSIONS {
            return Err(EthosError::InvalidArgument(format!(
                "expected {DIMENSIONS} score tables, found {}",
                self.tables.len()
            )));
        }
        for (i, table) in self.tables.iter().enumerate() {
            if table.entries.len() != SCORE_TABLE_LEN {
                return Err(EthosError::InvalidArgument(format!(
                    "table {i} has {} entries, expected {SCORE_TABLE_LEN}",
                    table.entries.len()
                )));
            }
            if let Some(bad) = table.entries.iter().find(|e| **e > SCORE_ONE) {
                return Err(EthosError::InvalidArgument(format!(
                    "table {i} entry {bad} exceeds SCORE_ONE"
                )));
            }
        }
        if self.vetoes.len() > MAX_VETO_PREDICATES {
            return Err(EthosError::InvalidArgument(format!(
                "{} veto predicates exceed cap {MAX_VETO_PREDICATES}",
                self.vetoes.len()
            )));
        }
        for veto in &self.vetoes {
            if veto.terms.is_empty() || veto.terms.len() > MAX_TERMS_PER_PREDICATE {
                return Err(EthosError::InvalidArgument(format!(
                    "veto for {:?} has {} terms (1..={MAX_TERMS_PER_PREDICATE} required)",
                    veto.violation,
                    veto.terms.len()
                )));
            }
        }
        if self.layers.len() > MAX_LEXICAL_LAYERS {
            return Err(EthosError::InvalidArgument(format!(
                "{} lexical layers exceed cap {MAX_LEXICAL_LAYERS}",
                self.layers.len()
            )));
        }
        for layer in &self.layers {
            if layer.trigger.is_empty() || layer.trigger.len() > MAX_TERMS_PER_PREDICATE {
                return Err(EthosError::InvalidArgument(format!(
                    "layer {:?} has {} trigger terms",
                    layer.name,
                    layer.trigger.len()
                )));
            }
            if layer.ceiling > SCORE_ONE {
                return Err(EthosError::InvalidArgument(format!(
                    "layer {:?} ceiling {} exceeds SCORE_ONE",
                    layer.name, layer.ceiling
                )));
            }
        }
        Ok(())
    }

    /// Canonical signing payload bytes.
    pub fn canonical_bytes(&self) -> EthosResult<Vec<u8>> {
        canonical_json(self)
    }
}

/// JSON with recursively sorted object keys; the byte encoding every
/// signature in the system is computed over.
pub fn canonical_json(v: &impl Serialize) -> EthosResult<Vec<u8>> {
    let value = serde_json::to_value(v)
        .map_err(|e| EthosError::Internal(format!("canonical encode: {e}")))?;
    let sorted = sort_json(value);
    serde_json::to_vec(&sorted).map_err(|e| EthosError::Internal(format!("canonical encode: {e}")))
}

fn sort_json(v: Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, val) in entries {
                sorted.insert(k, sort_json(val));
            }
            Value::Object(sorted)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_json).collect()),
        other => other,
    }
}

/// Governance verifying keys trusted to sign profile slices.
#[derive(Debug, Clone, Default)]
pub struct TrustedGovernanceKeys {
    pub keys: BTreeMap<String, VerifyingKey>,
}

impl TrustedGovernanceKeys {
    pub fn insert_hex(&mut self, key_id: &str, verifying_key_hex: &str) -> EthosResult<()> {
        let bytes = hex::decode(verifying_key_hex)
            .map_err(|_| EthosError::InvalidArgument("verifying key must be hex".to_string()))?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            EthosError::InvalidArgument("verifying key must decode to 32 bytes".to_string())
        })?;
        let key = VerifyingKey::from_bytes(&arr)
            .map_err(|_| EthosError::InvalidArgument("verifying key is not valid".to_string()))?;
        self.keys.insert(key_id.to_string(), key);
        Ok(())
    }
}

/// A profile slice plus the governance signature that authorizes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedProfileSlice {
    pub slice: ProfileSlice,
    pub key_id: String,
    pub signature_hex: String,
}

impl SignedProfileSlice {
    pub fn sign(slice: ProfileSlice, key_id: &str, signing_key: &SigningKey) -> EthosResult<Self> {
        slice.validate()?;
        let payload = slice.canonical_bytes()?;
        let digest = sha256_domain(DOMAIN_PROFILE_SLICE_V1, &payload);
        let signature = signing_key.sign(&digest);
        Ok(Self {
            slice,
            key_id: key_id.to_string(),
            signature_hex: hex::encode(signature.to_bytes()),
        })
    }

    /// Verifies the envelope against the trusted key set and returns the
    /// validated slice.
    pub fn verify(&self, trusted: &TrustedGovernanceKeys) -> EthosResult<&ProfileSlice> {
        let key = trusted.keys.get(&self.key_id).ok_or_else(|| {
            EthosError::SignatureRejected(format!("unknown governance key id {:?}", self.key_id))
        })?;
        let raw = hex::decode(&self.signature_hex)
            .map_err(|_| EthosError::SignatureRejected("signature must be hex".to_string()))?;
        let arr: [u8; 64] = raw.try_into().map_err(|_| {
            EthosError::SignatureRejected("signature must decode to 64 bytes".to_string())
        })?;
        let signature = Signature::from_bytes(&arr);
        let payload = self.slice.canonical_bytes()?;
        let digest = sha256_domain(DOMAIN_PROFILE_SLICE_V1, &payload);
        key.verify(&digest, &signature)
            .map_err(|_| EthosError::SignatureRejected("signature does not verify".to_string()))?;
        self.slice.validate()?;
        Ok(&self.slice)
    }
}

#[cfg(test)]
pub(crate) fn test_slice(slice_id: u8, version: u32) -> ProfileSlice {
    let flat = |v: u16| ScoreTable {
        entries: vec![v; SCORE_TABLE_LEN],
    };
    ProfileSlice {
        slice_id,
        version,
        name: "test".to_string(),
        weights: [26214, 13107, 13107, 6553, 6555],
        tables: vec![
            flat(SCORE_ONE),
            flat(SCORE_ONE),
            flat(SCORE_ONE / 2),
            flat(SCORE_ONE / 2),
            flat(SCORE_ONE / 4),
        ],
        vetoes: vec![VetoPredicate {
            violation: Violation::VulnerableRisk,
            terms: vec![
                FieldTerm {
                    field: FrameField::VulnerablePresence,
                    op: TermOp::MaskAny,
                    value: 0x0f,
                },
                FieldTerm {
                    field: FrameField::RiskBand,
                    op: TermOp::Ge,
                    value: 2,
                },
            ],
        }],
        layers: vec![LexicalLayer {
            name: "rights-cap".to_string(),
            trigger: vec![FieldTerm {
                field: FrameField::ZoneFlags,
                op: TermOp::MaskAny,
                value: i32::from(crate::frame::ZoneFlags::PROTECTED_ZONE),
            }],
            ceiling: SCORE_ONE / 4,
        }],
    }
}
