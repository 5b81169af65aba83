// Copyright (c) 2026 EthosOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity profile store.
//!
//! Sixteen slots, one per `profile_slice_id`. Updates are whole-slice
//! replacements behind a per-slot lock: a reader clones the `Arc` under the
//! read guard and from then on sees one consistent slice, old or new, never
//! a partial write. The store is the only long-lived shared mutable
//! resource in the system.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{EthosError, EthosResult};
use crate::profile::{ProfileSlice, PROFILE_SLOTS};

#[derive(Debug, Default)]
struct Slot {
    slice: Option<Arc<ProfileSlice>>,
    quarantined: bool,
}

/// Outcome of a slice lookup.
#[derive(Debug, Clone)]
pub struct SliceSelection {
    pub slice: Arc<ProfileSlice>,
    /// Set when the request's exact (slot, version) was unavailable and a
    /// nearby loaded slice was substituted.
    pub fallback: bool,
}

#[derive(Debug)]
pub struct ProfileStore {
    slots: [RwLock<Slot>; PROFILE_SLOTS],
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| RwLock::new(Slot::default())),
        }
    }

    /// Atomically replaces the slot named by the slice. Returns the version
    /// that was displaced, if any. Versions must move forward: reinstalling
    /// the same or an older version is rejected.
    pub fn install(&self, slice: ProfileSlice) -> EthosResult<Option<u32>> {
        slice.validate()?;
        let slot_index = usize::from(slice.slice_id);
        let mut slot = self.slots[slot_index].write();
        if let Some(existing) = &slot.slice {
            if slice.version <= existing.version {
                return Err(EthosError::InvalidArgument(format!(
                    "slot {} already holds version {} >= {}",
                    slice.slice_id, existing.version, slice.version
                )));
            }
        }
        let replaced = slot.slice.as_ref().map(|s| s.version);
        slot.slice = Some(Arc::new(slice));
        slot.quarantined = false;
        Ok(replaced)
    }

    /// Selects a slice for evaluation.
    ///
    /// Resolution order: the requested slot (tolerating a version mismatch,
    /// with the fallback flag), then the nearest loaded non-quarantined slot
    /// by ascending slot distance. A request is never blocked solely on a
    /// version mismatch; `UnknownProfile` means nothing usable is loaded at
    /// all, and a quarantined requested slot fails closed.
    pub fn select(&self, slice_id: u8, wanted_version: u32) -> EthosResult<SliceSelection> {
        let requested = usize::from(slice_id);
        if requested >= PROFILE_SLOTS {
            return Err(EthosError::UnknownProfile(format!(
                "slice id {slice_id} out of range"
            )));
        }

        {
            let slot = self.slots[requested].read();
            if slot.quarantined {
                return Err(EthosError::Quarantined(format!(
                    "slice slot {slice_id} is quarantined"
                )));
            }
            if let Some(slice) = &slot.slice {
                let fallback = wanted_version != 0 && slice.version != wanted_version;
                return Ok(SliceSelection {
                    slice: Arc::clone(slice),
                    fallback,
                });
            }
        }

        // Requested slot empty: nearest loaded slot, lower index preferred
        // on distance ties.
        for distance in 1..PROFILE_SLOTS {
            for candidate in [requested.checked_sub(distance), Some(requested + distance)]
                .into_iter()
                .flatten()
                .filter(|c| *c < PROFILE_SLOTS)
            {
                let slot = self.slots[candidate].read();
                if slot.quarantined {
                    continue;
                }
                if let Some(slice) = &slot.slice {
                    return Ok(SliceSelection {
                        slice: Arc::clone(slice),
                        fallback: true,
                    });
                }
            }
        }

        Err(EthosError::UnknownProfile(
            "no profile slices loaded".to_string(),
        ))
    }

    /// Marks a slot quarantined after a failed pipeline self-check. Reads
    /// of the slot fail until a fresh slice is installed over it.
    pub fn quarantine(&self, slice_id: u8) -> EthosResult<()> {
        let index = usize::from(slice_id);
        if index >= PROFILE_SLOTS {
            return Err(EthosError::UnknownProfile(format!(
                "slice id {slice_id} out of range"
            )));
        }
        self.slots[index].write().quarantined = true;
        Ok(())
    }

    /// (slice_id, version, quarantined) for every occupied slot.
    #[must_use]
    pub fn loaded(&self) -> Vec<(u8, u32, bool)> {
        let mut out = Vec::new();
        for (i, slot) in self.slots.iter().enumerate() {
            let guard = slot.read();
            if let Some(slice) = &guard.slice {
                out.push((i as u8, slice.version, guard.quarantined));
            }
        }
        out
    }

    /// Runs the pipeline self-check over every loaded slot, quarantining
    /// failures. Returns the ids that were fenced.
    pub fn sweep_self_check(&self) -> Vec<u8> {
        let mut fenced = Vec::new();
        for (slice_id, _, quarantined) in self.loaded() {
            if quarantined {
                continue;
            }
            let slice = {
                let slot = self.slots[usize::from(slice_id)].read();
                slot.slice.clone()
            };
            if let Some(slice) = slice {
                if crate::eval::self_check(&slice).is_err() {
                    self.slots[usize::from(slice_id)].write().quarantined = true;
                    fenced.push(slice_id);
                }
            }
        }
        fenced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::test_slice;

    #[test]
    fn install_and_exact_select() {
        let store = ProfileStore::new();
        store.install(test_slice(3, 1)).unwrap();
        let sel = store.select(3, 1).unwrap();
        assert_eq!(sel.slice.version, 1);
        assert!(!sel.fallback);
    }

    #[test]
    fn version_mismatch_falls_back_with_warning() {
        let store = ProfileStore::new();
        store.install(test_slice(3, 2)).unwrap();
        let sel = store.select(3, 9).unwrap();
        assert_eq!(sel.slice.version, 2);
        assert!(sel.fallback);
    }

    #[test]
    fn wildcard_version_is_not_a_fallback() {
        let store = ProfileStore::new();
        store.install(test_slice(3, 2)).unwrap();
        assert!(!store.select(3, 0).unwrap().fallback);
    }

    #[test]
    fn empty_slot_falls_back_to_nearest_loaded() {
        let store = ProfileStore::new();
        store.install(test_slice(1, 1)).unwrap();
        store.install(test_slice(6, 1)).unwrap();
        let sel = store.select(3, 0).unwrap();
        assert_eq!(sel.slice.slice_id, 1);
        assert!(sel.fallback);
    }

    #[test]
    fn empty_store_is_unknown_profile() {
        let store = ProfileStore::new();
        assert!(matches!(
            store.select(0, 0),
            Err(EthosError::UnknownProfile(_))
        ));
    }

    #[test]
    fn version_must_move_forward() {
        let store = ProfileStore::new();
        store.install(test_slice(2, 5)).unwrap();
        assert!(store.install(test_slice(2, 5)).is_err());
        assert!(store.install(test_slice(2, 4)).is_err());
        let replaced = store.install(test_slice(2, 6)).unwrap();
        assert_eq!(replaced, Some(5));
    }

    #[test]
    fn quarantined_slot_fails_closed() {
        let store = ProfileStore::new();
        store.install(test_slice(2, 1)).unwrap();
        store.quarantine(2).unwrap();
        assert!(matches!(store.select(2, 0), Err(EthosError::Quarantined(_))));
        // A fresh install clears the fence.
        store.install(test_slice(2, 2)).unwrap();
        assert!(store.select(2, 0).is_ok());
    }

    #[test]
    fn sweep_leaves_healthy_slots_alone() {
        let store = ProfileStore::new();
        store.install(test_slice(4, 1)).unwrap();
        store.install(test_slice(9, 1)).unwrap();
        assert!(store.sweep_self_check().is_empty());
        assert_eq!(store.loaded().len(), 2);
    }
}
