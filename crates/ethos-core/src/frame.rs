// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fixed-width `EthicsFrame` codec.
//!
//! A frame's meaning is fully determined by its bits and the selected
//! profile slice; no frame carries session state. Three wire widths exist:
//! the 64-bit base layout, a 128-bit extension and a 256-bit extension.
//! Extension words are strictly additive: base bit positions never move and
//! an absent extension field reads as its neutral value (zero).
//!
//! Base word layout (bit offsets within a little-endian `u64`):
//!
//! ```text
//!  0..16  option_id          caller-assigned, echoed back
//! 16..19  distance_band      0 = nearest .. 7 = farthest
//! 19..27  relative_speed     signed Q3.4, scaled units (1/16 per step)
//! 27..31  zone_flags         protected / consent / legal / sensitive
//! 31..35  vulnerable_presence child / elderly / disabled / animal
//! 35..37  risk_band          0..3
//! 37..41  profile_slice_id   0..15
//! 41..47  action_type        opaque classifier, 0..63
//! 47..64  reserved, must be zero
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{EthosError, EthosResult};

pub const FRAME_LEN_BASE: usize = 8;
pub const FRAME_LEN_EXT128: usize = 16;
pub const FRAME_LEN_EXT256: usize = 32;

pub const DISTANCE_BAND_MAX: u8 = 7;
pub const RISK_BAND_MAX: u8 = 3;
pub const PROFILE_SLICE_ID_MAX: u8 = 15;
pub const ACTION_TYPE_MAX: u8 = 63;

/// Frames carry `relative_speed` as signed Q3.4: one scaled unit is 16 raw
/// steps. Positive values close on the subject, negative values open range.
pub const SPEED_Q: i32 = 16;

/// Zone attribute flags of the base layout (4-bit field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ZoneFlags(pub u8);

impl ZoneFlags {
    pub const PROTECTED_ZONE: u8 = 1 << 0;
    pub const CONSENT_REQUIRED: u8 = 1 << 1;
    pub const LEGAL_CONSTRAINT: u8 = 1 << 2;
    pub const SENSITIVE_AREA: u8 = 1 << 3;

    pub const MASK: u8 = 0x0f;

    #[must_use]
    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }
}

/// Vulnerable-presence flags of the base layout (4-bit field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VulnerableFlags(pub u8);

impl VulnerableFlags {
    pub const CHILD: u8 = 1 << 0;
    pub const ELDERLY: u8 = 1 << 1;
    pub const DISABLED: u8 = 1 << 2;
    pub const ANIMAL: u8 = 1 << 3;

    pub const MASK: u8 = 0x0f;

    #[must_use]
    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    #[must_use]
    pub fn any(self) -> bool {
        self.0 != 0
    }
}

/// 128-bit extension word: situational context beyond the base layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ext128 {
    /// Ordinal count band of uninvolved bystanders, 0..63.
    pub bystander_band: u8,
    /// Ordinal time-to-contact band, 0 = imminent .. 255 = none.
    pub contact_time_band: u8,
    /// Opaque mission phase classifier, 0..15.
    pub mission_phase: u8,
    /// 0 = unknown, 1 = refused, 2 = implied, 3 = explicit.
    pub consent_state: u8,
    /// Opaque environment classifier, 0..15.
    pub environment_class: u8,
}

pub const BYSTANDER_BAND_MAX: u8 = 63;
pub const MISSION_PHASE_MAX: u8 = 15;
pub const CONSENT_STATE_MAX: u8 = 3;
pub const ENVIRONMENT_CLASS_MAX: u8 = 15;

/// 256-bit extension words: per-dimension prior hints plus a reserved word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ext256 {
    /// One 8-bit hint per scoring dimension, in dimension order.
    pub dimension_hints: [u8; 5],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameExt {
    None,
    Ext128(Ext128),
    Ext256(Ext128, Ext256),
}

impl Default for FrameExt {
    fn default() -> Self {
        FrameExt::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EthicsFrame {
    pub option_id: u16,
    pub distance_band: u8,
    pub relative_speed: i8,
    pub zone_flags: ZoneFlags,
    pub vulnerable_presence: VulnerableFlags,
    pub risk_band: u8,
    pub profile_slice_id: u8,
    pub action_type: u8,
    pub ext: FrameExt,
}

/// Frame fields addressable by compiled veto/lexical terms.
///
/// Extension fields read as zero when the wire frame did not carry the
/// corresponding extension word, so a compiled predicate over an extension
/// field is simply inert for base-width traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameField {
    DistanceBand,
    RelativeSpeed,
    ZoneFlags,
    VulnerablePresence,
    RiskBand,
    ActionType,
    BystanderBand,
    ContactTimeBand,
    MissionPhase,
    ConsentState,
    EnvironmentClass,
}

impl EthicsFrame {
    pub fn validate(&self) -> EthosResult<()> {
        if self.distance_band > DISTANCE_BAND_MAX {
            return Err(EthosError::InvalidFrameFormat(format!(
                "distance_band {} out of range",
                self.distance_band
            )));
        }
        if self.zone_flags.0 & !ZoneFlags::MASK != 0 {
            return Err(EthosError::InvalidFrameFormat(
                "zone_flags has unknown bits".to_string(),
            ));
        }
        if self.vulnerable_presence.0 & !VulnerableFlags::MASK != 0 {
            return Err(EthosError::InvalidFrameFormat(
                "vulnerable_presence has unknown bits".to_string(),
            ));
        }
        if self.risk_band > RISK_BAND_MAX {
            return Err(EthosError::InvalidFrameFormat(format!(
                "risk_band {} out of range",
                self.risk_band
            )));
        }
        if self.profile_slice_id > PROFILE_SLICE_ID_MAX {
            return Err(EthosError::InvalidFrameFormat(format!(
                "profile_slice_id {} out of range",
                self.profile_slice_id
            )));
        }
        if self.action_type > ACTION_TYPE_MAX {
            return Err(EthosError::InvalidFrameFormat(format!(
                "action_type {} out of range",
                self.action_type
            )));
        }
        match self.ext {
            FrameExt::None => Ok(()),
            FrameExt::Ext128(ext) => validate_ext128(&ext),
            FrameExt::Ext256(ext, _) => validate_ext128(&ext),
        }
    }

    /// Reads a field as a widened integer, extension fields defaulting to
    /// zero for narrower wire widths.
    #[must_use]
    pub fn field(&self, field: FrameField) -> i32 {
        let ext128 = match self.ext {
            FrameExt::None => Ext128::default(),
            FrameExt::Ext128(e) | FrameExt::Ext256(e, _) => e,
        };
        match field {
            FrameField::DistanceBand => i32::from(self.distance_band),
            FrameField::RelativeSpeed => i32::from(self.relative_speed),
            FrameField::ZoneFlags => i32::from(self.zone_flags.0),
            FrameField::VulnerablePresence => i32::from(self.vulnerable_presence.0),
            FrameField::RiskBand => i32::from(self.risk_band),
            FrameField::ActionType => i32::from(self.action_type),
            FrameField::BystanderBand => i32::from(ext128.bystander_band),
            FrameField::ContactTimeBand => i32::from(ext128.contact_time_band),
            FrameField::MissionPhase => i32::from(ext128.mission_phase),
            FrameField::ConsentState => i32::from(ext128.consent_state),
            FrameField::EnvironmentClass => i32::from(ext128.environment_class),
        }
    }

    /// Encodes the frame at its declared wire width.
    pub fn encode(&self) -> EthosResult<Vec<u8>> {
        self.validate()?;
        let word0 = self.encode_base_word();
        match self.ext {
            FrameExt::None => Ok(word0.to_le_bytes().to_vec()),
            FrameExt::Ext128(ext) => {
                let mut out = Vec::with_capacity(FRAME_LEN_EXT128);
                out.extend_from_slice(&word0.to_le_bytes());
                out.extend_from_slice(&encode_ext_word(&ext).to_le_bytes());
                Ok(out)
            }
            FrameExt::Ext256(ext, hints) => {
                let mut out = Vec::with_capacity(FRAME_LEN_EXT256);
                out.extend_from_slice(&word0.to_le_bytes());
                out.extend_from_slice(&encode_ext_word(&ext).to_le_bytes());
                out.extend_from_slice(&encode_hint_word(&hints).to_le_bytes());
                out.extend_from_slice(&0_u64.to_le_bytes());
                Ok(out)
            }
        }
    }

    /// Decodes a fixed-width byte buffer, enforcing length and reserved-bit
    /// constraints. `decode(encode(x)) == x` for every valid `x`.
    pub fn decode(bytes: &[u8]) -> EthosResult<Self> {
        let ext = match bytes.len() {
            FRAME_LEN_BASE => FrameExt::None,
            FRAME_LEN_EXT128 => FrameExt::Ext128(decode_ext_word(read_word(bytes, 1)?)?),
            FRAME_LEN_EXT256 => {
                let ext = decode_ext_word(read_word(bytes, 1)?)?;
                let hints = decode_hint_word(read_word(bytes, 2)?)?;
                if read_word(bytes, 3)? != 0 {
                    return Err(EthosError::InvalidFrameFormat(
                        "reserved extension word is nonzero".to_string(),
                    ));
                }
                FrameExt::Ext256(ext, hints)
            }
            other => {
                return Err(EthosError::InvalidFrameFormat(format!(
                    "frame length {other} is not 8, 16 or 32"
                )))
            }
        };

        let word0 = read_word(bytes, 0)?;
        if word0 >> 47 != 0 {
            return Err(EthosError::InvalidFrameFormat(
                "reserved base bits are nonzero".to_string(),
            ));
        }

        let frame = EthicsFrame {
            option_id: (word0 & 0xffff) as u16,
            distance_band: ((word0 >> 16) & 0x7) as u8,
            relative_speed: ((word0 >> 19) & 0xff) as u8 as i8,
            zone_flags: ZoneFlags(((word0 >> 27) & 0xf) as u8),
            vulnerable_presence: VulnerableFlags(((word0 >> 31) & 0xf) as u8),
            risk_band: ((word0 >> 35) & 0x3) as u8,
            profile_slice_id: ((word0 >> 37) & 0xf) as u8,
            action_type: ((word0 >> 41) & 0x3f) as u8,
            ext,
        };
        frame.validate()?;
        Ok(frame)
    }

    fn encode_base_word(&self) -> u64 {
        u64::from(self.option_id)
            | (u64::from(self.distance_band) << 16)
            | (u64::from(self.relative_speed as u8) << 19)
            | (u64::from(self.zone_flags.0) << 27)
            | (u64::from(self.vulnerable_presence.0) << 31)
            | (u64::from(self.risk_band) << 35)
            | (u64::from(self.profile_slice_id) << 37)
            | (u64::from(self.action_type) << 41)
    }
}

fn validate_ext128(ext: &Ext128) -> EthosResult<()> {
    if ext.bystander_band > BYSTANDER_BAND_MAX {
        return Err(EthosError::InvalidFrameFormat(format!(
            "bystander_band {} out of range",
            ext.bystander_band
        )));
    }
    if ext.mission_phase > MISSION_PHASE_MAX {
        return Err(EthosError::InvalidFrameFormat(format!(
            "mission_phase {} out of range",
            ext.mission_phase
        )));
    }
    if ext.consent_state > CONSENT_STATE_MAX {
        return Err(EthosError::InvalidFrameFormat(format!(
            "consent_state {} out of range",
            ext.consent_state
        )));
    }
    if ext.environment_class > ENVIRONMENT_CLASS_MAX {
        return Err(EthosError::InvalidFrameFormat(format!(
            "environment_class {} out of range",
            ext.environment_class
        )));
    }
    Ok(())
}

fn encode_ext_word(ext: &Ext128) -> u64 {
    u64::from(ext.bystander_band)
        | (u64::from(ext.contact_time_band) << 6)
        | (u64::from(ext.mission_phase) << 14)
        | (u64::from(ext.consent_state) << 18)
        | (u64::from(ext.environment_class) << 20)
}

fn decode_ext_word(word: u64) -> EthosResult<Ext128> {
    if word >> 24 != 0 {
        return Err(EthosError::InvalidFrameFormat(
            "reserved ext128 bits are nonzero".to_string(),
        ));
    }
    Ok(Ext128 {
        bystander_band: (word & 0x3f) as u8,
        contact_time_band: ((word >> 6) & 0xff) as u8,
        mission_phase: ((word >> 14) & 0xf) as u8,
        consent_state: ((word >> 18) & 0x3) as u8,
        environment_class: ((word >> 20) & 0xf) as u8,
    })
}

fn encode_hint_word(hints: &Ext256) -> u64 {
    hints
        .dimension_hints
        .iter()
        .enumerate()
        .fold(0_u64, |acc, (i, h)| acc | (u64::from(*h) << (8 * i)))
}

fn decode_hint_word(word: u64) -> EthosResult<Ext256> {
    if word >> 40 != 0 {
        return Err(EthosError::InvalidFrameFormat(
            "reserved hint bits are nonzero".to_string(),
        ));
    }
    let mut dimension_hints = [0_u8; 5];
    for (i, slot) in dimension_hints.iter_mut().enumerate() {
        *slot = ((word >> (8 * i)) & 0xff) as u8;
    }
    Ok(Ext256 { dimension_hints })
}

fn read_word(bytes: &[u8], index: usize) -> EthosResult<u64> {
    let start = index * 8;
    let chunk: [u8; 8] = bytes
        .get(start..start + 8)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| EthosError::InvalidFrameFormat("frame truncated".to_string()))?;
    Ok(u64::from_le_bytes(chunk))
}
