//! In-core equivalence map (SPEC_FULL.md §4.2): a shadow table mirroring
//! the decoded fields of every live snapshot row, plus an `equiv`
//! representative used on every snapshot-tagged key read/delete to fold
//! chains of single-child snapshots into one canonical id.
//!
//! Indexed by `U32_MAX - id` per the source's design note (§9): new
//! snapshot ids are allocated from the top of the id space downward
//! (§4.3), so the root of any tree holds the highest id in it and every
//! descendant a smaller one. The most active, shallowest nodes land at the
//! *lowest* transformed indices, keeping the backing `Vec` small and its
//! low end hot.

use crate::error::EngineError;
use crate::row::SnapshotRow;

fn transformed_index(id: u32) -> usize {
    (u32::MAX - id) as usize
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EquivSlot {
    pub parent: u32,
    pub children: [u32; 2],
    pub subvol: u32,
    pub deleted: bool,
    pub equiv: u32,
}

#[derive(Default)]
pub struct EquivCache {
    slots: Vec<Option<EquivSlot>>,
}

impl EquivCache {
    pub fn new() -> Self {
        EquivCache { slots: Vec::new() }
    }

    pub fn touch(&mut self, id: u32) -> Result<(), EngineError> {
        let idx = transformed_index(id);
        if idx >= self.slots.len() {
            let new_len = idx.checked_add(1).ok_or(EngineError::OutOfMemory)?;
            // Geometric growth so a run of touch() calls for descending ids
            // (the common case — see module docs) doesn't reallocate every time.
            self.slots.resize(new_len.max(self.slots.len() * 2), None);
        }
        if self.slots[idx].is_none() {
            self.slots[idx] = Some(EquivSlot { equiv: id, ..Default::default() });
        }
        Ok(())
    }

    pub fn update_from_row(&mut self, id: u32, row: &SnapshotRow) -> Result<(), EngineError> {
        self.touch(id)?;
        let idx = transformed_index(id);
        let slot = self.slots[idx].as_mut().expect("just touched");
        slot.parent = row.parent;
        slot.children = row.children;
        slot.subvol = row.subvol;
        slot.deleted = row.is_deleted();
        Ok(())
    }

    /// Drop a slot entirely (the row has been physically deleted).
    pub fn remove(&mut self, id: u32) {
        let idx = transformed_index(id);
        if idx < self.slots.len() {
            self.slots[idx] = None;
        }
    }

    pub fn get(&self, id: u32) -> Option<EquivSlot> {
        self.slots.get(transformed_index(id)).and_then(|s| *s)
    }

    pub fn is_live(&self, id: u32) -> bool {
        self.get(id).map(|s| !s.deleted).unwrap_or(false)
    }

    /// Read accessor used by the reclamation key sweep.
    pub fn equiv(&self, id: u32) -> u32 {
        self.get(id).map(|s| s.equiv).unwrap_or(id)
    }

    /// Every cached id, lowest first. Because `idx = U32_MAX - id`, lowest id
    /// is the *highest* transformed index, so this walks the backing `Vec`
    /// back to front.
    ///
    /// `recompute_equiv` relies on this order: a child's id is always less
    /// than its parent's (new ids are handed out top-down — see module
    /// docs), so visiting lowest-id-first guarantees a child's `equiv` is
    /// already final by the time its parent is computed. This is the same
    /// thing SPEC_FULL.md §4.2 calls "increasing id order".
    fn ids_children_first(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots
            .iter()
            .enumerate()
            .rev()
            .filter_map(|(idx, slot)| slot.as_ref().map(|_| u32::MAX - idx as u32))
    }

    pub fn recompute_equiv(&mut self) {
        let ids: Vec<u32> = self.ids_children_first().collect();
        for id in ids {
            let children = self.get(id).expect("id came from this cache").children;
            let live_children: Vec<u32> = children
                .into_iter()
                .filter(|&c| c != 0 && self.is_live(c))
                .collect();

            let new_equiv = match live_children.as_slice() {
                [only] => self.equiv(*only),
                _ => id,
            };

            let idx = transformed_index(id);
            self.slots[idx].as_mut().expect("id came from this cache").equiv = new_equiv;
        }
    }
}
