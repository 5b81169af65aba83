// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory decision audit ring.
//!
//! Fixed capacity, preallocated, overwrite-oldest. Records are plain
//! fixed-size values so appending never allocates on the evaluation path;
//! the agent id is truncated into an inline tag.

use ethos_protocol::pb;

pub const AGENT_TAG_LEN: usize = 24;

/// Fixed-size audit record. One per terminal request outcome, including
/// rejections.
#[derive(Debug, Clone, Copy)]
pub struct DecisionRecord {
    pub seq: u64,
    pub frame_id: u64,
    pub agent_tag: [u8; AGENT_TAG_LEN],
    pub option_id: u16,
    pub status: pb::StatusCode,
    pub verdict: pb::Verdict,
    pub normative_score: u16,
    pub hard_violation_flags: u16,
    pub profile_slice_id: u8,
    pub profile_version: u32,
    pub latency_us: u64,
    pub unix_us: u64,
}

impl DecisionRecord {
    #[must_use]
    pub fn agent_tag_of(agent_id: &str) -> [u8; AGENT_TAG_LEN] {
        let mut tag = [0_u8; AGENT_TAG_LEN];
        let bytes = agent_id.as_bytes();
        let n = bytes.len().min(AGENT_TAG_LEN);
        tag[..n].copy_from_slice(&bytes[..n]);
        tag
    }

    #[must_use]
    pub fn agent_tag_str(&self) -> String {
        let end = self
            .agent_tag
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(AGENT_TAG_LEN);
        String::from_utf8_lossy(&self.agent_tag[..end]).into_owned()
    }

    #[must_use]
    pub fn to_proto(&self) -> pb::DecisionRecord {
        pb::DecisionRecord {
            seq: self.seq,
            frame_id: self.frame_id,
            agent_id: self.agent_tag_str(),
            option_id: u32::from(self.option_id),
            status: self.status as i32,
            verdict: self.verdict as i32,
            normative_score: u32::from(self.normative_score),
            hard_violation_flags: u32::from(self.hard_violation_flags),
            profile_slice_id: u32::from(self.profile_slice_id),
            profile_version: self.profile_version,
            latency_us: self.latency_us,
            unix_us: self.unix_us,
        }
    }
}

#[derive(Debug)]
pub struct DecisionRing {
    slots: Vec<Option<DecisionRecord>>,
    next_seq: u64,
    dropped_oldest: u64,
}

impl DecisionRing {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            next_seq: 0,
            dropped_oldest: 0,
        }
    }

    /// Appends, assigning the next sequence number. Overwrites the oldest
    /// record once the ring is full.
    pub fn push(&mut self, mut record: DecisionRecord) -> u64 {
        let seq = self.next_seq;
        record.seq = seq;
        let index = (seq % self.slots.len() as u64) as usize;
        if self.slots[index].is_some() {
            self.dropped_oldest += 1;
        }
        self.slots[index] = Some(record);
        self.next_seq += 1;
        seq
    }

    #[must_use]
    pub fn dropped_oldest(&self) -> u64 {
        self.dropped_oldest
    }

    #[must_use]
    pub fn len(&self) -> usize {
        (self.next_seq.min(self.slots.len() as u64)) as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.next_seq == 0
    }

    /// Newest-first page of up to `limit` records.
    #[must_use]
    pub fn newest(&self, limit: usize) -> Vec<DecisionRecord> {
        let mut out = Vec::with_capacity(limit.min(self.len()));
        let mut seq = self.next_seq;
        while seq > 0 && out.len() < limit {
            seq -= 1;
            let index = (seq % self.slots.len() as u64) as usize;
            match &self.slots[index] {
                Some(record) if record.seq == seq => out.push(*record),
                _ => break,
            }
        }
        out
    }
}
