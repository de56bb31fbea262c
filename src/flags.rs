use bitflags::bitflags;

bitflags! {
    /// Snapshot row flags (SPEC_FULL.md §6).
    pub struct SnapshotFlags: u32 {
        /// A subvolume row points at this node.
        const IS_SUBVOL = 1 << 0;
        /// Reclamation pending; may still be referenced by keys in other trees.
        const DELETED   = 1 << 1;
    }
}

bitflags! {
    /// Subvolume row flags (SPEC_FULL.md §6).
    pub struct SubvolumeFlags: u32 {
        const READ_ONLY  = 1 << 0;
        /// This row was created by a snapshot operation rather than a fresh subvolume.
        const IS_SNAPSHOT = 1 << 1;
    }
}
