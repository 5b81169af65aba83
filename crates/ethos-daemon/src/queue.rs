// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bounded three-class admission queues with aging.
//!
//! Capacities are fixed at admission time; nothing downstream allocates.
//! Critical and Normal refuse new work when full. Background sheds its
//! oldest entry instead, on the theory that a stale background frame is
//! worth less than a fresh one. An entry that waits a full aging interval
//! since enqueue is dispatched ahead of everything that arrived after it,
//! so no class waits longer than one interval under sustained Critical
//! load.

use tokio::sync::oneshot;

use ethos_core::frame::EthicsFrame;
use ethos_protocol::pb;

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Critical,
    Normal,
    Background,
}

impl Priority {
    #[must_use]
    pub fn from_proto(raw: i32) -> Self {
        match pb::PriorityClass::try_from(raw) {
            Ok(pb::PriorityClass::Critical) => Priority::Critical,
            Ok(pb::PriorityClass::Background) => Priority::Background,
            _ => Priority::Normal,
        }
    }

    #[must_use]
    pub fn to_proto(self) -> pb::PriorityClass {
        match self {
            Priority::Critical => pb::PriorityClass::Critical,
            Priority::Normal => pb::PriorityClass::Normal,
            Priority::Background => pb::PriorityClass::Background,
        }
    }
}

#[derive(Debug)]
pub struct QueueEntry {
    pub agent_id: String,
    pub frame_id: u64,
    pub frame: EthicsFrame,
    pub wanted_profile_version: u32,
    pub priority: Priority,
    pub enqueued_us: u64,
    pub deadline_us: u64,
    pub responder: oneshot::Sender<pb::EvaluateResponse>,
}

#[derive(Debug)]
pub enum PushOutcome {
    Enqueued,
    /// Background shed: the new entry is in, this one was dropped.
    EnqueuedDroppedOldest(QueueEntry),
    /// Class queue full; the entry comes back to the caller.
    Rejected(QueueEntry),
}

#[derive(Debug)]
pub struct PriorityQueues {
    /// Entries that waited a full interval, oldest first. Dispatched
    /// before every class.
    aged: VecDeque<QueueEntry>,
    critical: VecDeque<QueueEntry>,
    normal: VecDeque<QueueEntry>,
    background: VecDeque<QueueEntry>,
    critical_cap: usize,
    normal_cap: usize,
    background_cap: usize,
    aging_interval_us: u64,
}

impl PriorityQueues {
    #[must_use]
    pub fn new(
        critical_cap: usize,
        normal_cap: usize,
        background_cap: usize,
        aging_interval_ms: u64,
    ) -> Self {
        Self {
            aged: VecDeque::new(),
            critical: VecDeque::with_capacity(critical_cap),
            normal: VecDeque::with_capacity(normal_cap),
            background: VecDeque::with_capacity(background_cap),
            critical_cap,
            normal_cap,
            background_cap,
            aging_interval_us: aging_interval_ms.saturating_mul(1_000),
        }
    }

    pub fn push(&mut self, entry: QueueEntry) -> PushOutcome {
        match entry.priority {
            Priority::Critical => {
                if self.critical.len() >= self.critical_cap {
                    return PushOutcome::Rejected(entry);
                }
                self.critical.push_back(entry);
                PushOutcome::Enqueued
            }
            Priority::Normal => {
                if self.normal.len() >= self.normal_cap {
                    return PushOutcome::Rejected(entry);
                }
                self.normal.push_back(entry);
                PushOutcome::Enqueued
            }
            Priority::Background => {
                let dropped = if self.background.len() >= self.background_cap {
                    self.background.pop_front()
                } else {
                    None
                };
                self.background.push_back(entry);
                match dropped {
                    Some(old) => PushOutcome::EnqueuedDroppedOldest(old),
                    None => PushOutcome::Enqueued,
                }
            }
        }
    }

    /// Moves every Normal and Background entry that has waited a full
    /// interval since enqueue into the aged lane, oldest first. The lane
    /// dispatches ahead of all three classes, so a single interval is the
    /// longest any admitted entry sits behind newer arrivals. Promotion
    /// deliberately ignores class capacities: the caps bound what
    /// admission accepts, not what aging rearranges.
    pub fn promote_aged(&mut self, now_us: u64) {
        let interval = self.aging_interval_us;
        if interval == 0 {
            return;
        }
        let mut promoted: Vec<QueueEntry> = Vec::new();
        for class in [&mut self.normal, &mut self.background] {
            let mut i = 0;
            while i < class.len() {
                if now_us.saturating_sub(class[i].enqueued_us) >= interval {
                    if let Some(entry) = class.remove(i) {
                        promoted.push(entry);
                        continue;
                    }
                }
                i += 1;
            }
        }
        promoted.sort_by_key(|entry| entry.enqueued_us);
        self.aged.extend(promoted);
    }

    pub fn pop(&mut self, now_us: u64) -> Option<QueueEntry> {
        self.promote_aged(now_us);
        self.aged
            .pop_front()
            .or_else(|| self.critical.pop_front())
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.background.pop_front())
    }

    #[must_use]
    pub fn depths(&self) -> [(Priority, usize, usize); 3] {
        [
            (Priority::Critical, self.critical.len(), self.critical_cap),
            (Priority::Normal, self.normal.len(), self.normal_cap),
            (
                Priority::Background,
                self.background.len(),
                self.background_cap,
            ),
        ]
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aged.is_empty()
            && self.critical.is_empty()
            && self.normal.is_empty()
            && self.background.is_empty()
    }
}
