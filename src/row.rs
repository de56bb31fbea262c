//! Row codec & validator (SPEC_FULL.md §4.1): bit-exact little-endian
//! encode/decode for the two row kinds, plus the structural checks every
//! encoded row must pass before it is ever written.

use crate::flags::{SnapshotFlags, SubvolumeFlags};

/// Lowest valid snapshot/subvolume id. Id 0 always means "none".
pub const ID_MIN: u32 = 1;
/// Highest valid snapshot id (`U32_MAX - 1`, per SPEC_FULL.md §3).
pub const ID_MAX: u32 = u32::MAX - 1;

pub const SUBVOL_MIN: u32 = 1;
pub const SUBVOL_MAX: u32 = 0x000f_ffff;

pub const SNAPSHOT_ROW_SIZE: usize = 24;
pub const SUBVOLUME_ROW_SIZE: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnapshotRow {
    pub flags: SnapshotFlags,
    pub parent: u32,
    pub children: [u32; 2],
    pub subvol: u32,
}

impl SnapshotRow {
    pub fn new(parent: u32, subvol: u32, flags: SnapshotFlags) -> Self {
        SnapshotRow { flags, parent, children: [0, 0], subvol }
    }

    pub fn is_subvol(&self) -> bool {
        self.flags.contains(SnapshotFlags::IS_SUBVOL)
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(SnapshotFlags::DELETED)
    }

    /// Normalize `children` so `children[0] >= children[1]`, and collapse
    /// `{x, x}` (x != 0) into `{0, 0}` — that combination is never valid
    /// (SPEC_FULL.md §3 invariant 3) and only `encode` enforces it; callers
    /// that set `children` directly must call this first.
    pub fn normalize_children(&mut self) {
        if self.children[0] == self.children[1] {
            self.children = [0, 0];
        } else if self.children[0] < self.children[1] {
            self.children.swap(0, 1);
        }
    }

    pub fn encode(&self) -> [u8; SNAPSHOT_ROW_SIZE] {
        let mut buf = [0u8; SNAPSHOT_ROW_SIZE];
        buf[0..4].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf[4..8].copy_from_slice(&self.parent.to_le_bytes());
        buf[8..12].copy_from_slice(&self.children[0].to_le_bytes());
        buf[12..16].copy_from_slice(&self.children[1].to_le_bytes());
        buf[16..20].copy_from_slice(&self.subvol.to_le_bytes());
        buf[20..24].copy_from_slice(&0u32.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() != SNAPSHOT_ROW_SIZE {
            return None;
        }
        let flags = u32::from_le_bytes(buf[0..4].try_into().ok()?);
        let parent = u32::from_le_bytes(buf[4..8].try_into().ok()?);
        let child0 = u32::from_le_bytes(buf[8..12].try_into().ok()?);
        let child1 = u32::from_le_bytes(buf[12..16].try_into().ok()?);
        let subvol = u32::from_le_bytes(buf[16..20].try_into().ok()?);
        Some(SnapshotRow {
            flags: SnapshotFlags::from_bits_truncate(flags),
            parent,
            children: [child0, child1],
            subvol,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubvolumeRow {
    pub flags: SubvolumeFlags,
    pub snapshot: u32,
    pub inode: u64,
}

impl SubvolumeRow {
    pub fn new(snapshot: u32, inode: u64, flags: SubvolumeFlags) -> Self {
        SubvolumeRow { flags, snapshot, inode }
    }

    pub fn is_snapshot(&self) -> bool {
        self.flags.contains(SubvolumeFlags::IS_SNAPSHOT)
    }

    pub fn read_only(&self) -> bool {
        self.flags.contains(SubvolumeFlags::READ_ONLY)
    }

    pub fn encode(&self) -> [u8; SUBVOLUME_ROW_SIZE] {
        let mut buf = [0u8; SUBVOLUME_ROW_SIZE];
        buf[0..4].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf[4..8].copy_from_slice(&self.snapshot.to_le_bytes());
        buf[8..16].copy_from_slice(&self.inode.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() != SUBVOLUME_ROW_SIZE {
            return None;
        }
        let flags = u32::from_le_bytes(buf[0..4].try_into().ok()?);
        let snapshot = u32::from_le_bytes(buf[4..8].try_into().ok()?);
        let inode = u64::from_le_bytes(buf[8..16].try_into().ok()?);
        Some(SubvolumeRow {
            flags: SubvolumeFlags::from_bits_truncate(flags),
            snapshot,
            inode,
        })
    }
}

/// Validate a decoded snapshot row against its own key (SPEC_FULL.md §4.1).
/// Returns the textual reason on failure.
///
/// The id space is allocated top-down (`snapshot_store::find_free_run`
/// walks from `ID_MAX` toward `ID_MIN`): the first subvolume ever created
/// gets the highest free id, and every snapshot taken after it is assigned
/// the next ids below the occupied region. The tree therefore grows toward
/// *smaller* ids as it gets deeper — a row's `parent` is always greater
/// than the row's own key, and a row's `children` are always less than it.
pub fn validate_snapshot_row(key: u32, row: &SnapshotRow) -> Result<(), String> {
    if !(ID_MIN..=ID_MAX).contains(&key) {
        return Err(format!("snapshot key {key} out of range [{ID_MIN}, {ID_MAX}]"));
    }
    if row.parent != 0 && row.parent <= key {
        return Err(format!("snapshot {key}: parent {} <= own id", row.parent));
    }
    let [c0, c1] = row.children;
    if c0 < c1 {
        return Err(format!("snapshot {key}: children [{c0}, {c1}] not normalized"));
    }
    if c0 == c1 && c0 != 0 {
        return Err(format!("snapshot {key}: duplicate non-zero children {c0}"));
    }
    if c0 != 0 && c0 >= key {
        return Err(format!("snapshot {key}: child {c0} >= own id"));
    }
    if c1 != 0 && c1 >= key {
        return Err(format!("snapshot {key}: child {c1} >= own id"));
    }
    Ok(())
}

/// Validate raw bytes decode to a well-formed snapshot row at `key`.
pub fn validate_snapshot_bytes(key: u32, buf: &[u8]) -> Result<SnapshotRow, String> {
    if buf.len() != SNAPSHOT_ROW_SIZE {
        return Err(format!(
            "snapshot {key}: value size {} != {SNAPSHOT_ROW_SIZE}",
            buf.len()
        ));
    }
    let row = SnapshotRow::decode(buf).expect("size already checked");
    validate_snapshot_row(key, &row)?;
    Ok(row)
}

/// Validate a decoded subvolume row against its own key.
pub fn validate_subvolume_row(key: u32) -> Result<(), String> {
    if !(SUBVOL_MIN..=SUBVOL_MAX).contains(&key) {
        return Err(format!("subvolume key {key} out of range [{SUBVOL_MIN}, {SUBVOL_MAX}]"));
    }
    Ok(())
}

pub fn validate_subvolume_bytes(key: u32, buf: &[u8]) -> Result<SubvolumeRow, String> {
    if buf.len() != SUBVOLUME_ROW_SIZE {
        return Err(format!(
            "subvolume {key}: value size {} != {SUBVOLUME_ROW_SIZE}",
            buf.len()
        ));
    }
    validate_subvolume_row(key)?;
    Ok(SubvolumeRow::decode(buf).expect("size already checked"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_row_round_trips() {
        let mut row = SnapshotRow::new(5, 42, SnapshotFlags::IS_SUBVOL);
        row.children = [10, 7];
        let encoded = row.encode();
        let decoded = SnapshotRow::decode(&encoded).unwrap();
        assert_eq!(row, decoded);
    }

    #[test]
    fn subvolume_row_round_trips() {
        let row = SubvolumeRow::new(9, 0xdead_beef_0000, SubvolumeFlags::READ_ONLY | SubvolumeFlags::IS_SNAPSHOT);
        let encoded = row.encode();
        let decoded = SubvolumeRow::decode(&encoded).unwrap();
        assert_eq!(row, decoded);
    }

    #[test]
    fn rejects_key_out_of_range() {
        let row = SnapshotRow::new(0, 0, SnapshotFlags::empty());
        assert!(validate_snapshot_row(0, &row).is_err());
        assert!(validate_snapshot_row(u32::MAX, &row).is_err());
    }

    #[test]
    fn rejects_parent_not_greater_than_own_id() {
        // A row's parent always gets a *higher* id than the row itself (the
        // allocator hands out ids top-down), so parent == key or parent < key
        // are both invalid.
        let mut row = SnapshotRow::new(10, 0, SnapshotFlags::empty());
        row.parent = 10;
        assert!(validate_snapshot_row(10, &row).is_err());
        row.parent = 9;
        assert!(validate_snapshot_row(10, &row).is_err());
    }

    #[test]
    fn rejects_unnormalized_children() {
        let mut row = SnapshotRow::new(0, 0, SnapshotFlags::empty());
        row.children = [5, 9];
        assert!(validate_snapshot_row(20, &row).is_err());
    }

    #[test]
    fn rejects_duplicate_nonzero_children() {
        let mut row = SnapshotRow::new(0, 0, SnapshotFlags::empty());
        row.children = [9, 9];
        assert!(validate_snapshot_row(20, &row).is_err());
    }

    #[test]
    fn rejects_child_not_less_than_own_id() {
        // Children always get a *lower* id than their parent, so a child
        // id equal to or greater than the row's own key is invalid.
        let mut row = SnapshotRow::new(0, 0, SnapshotFlags::empty());
        row.children = [7, 2];
        assert!(validate_snapshot_row(5, &row).is_err());
    }

    #[test]
    fn accepts_well_formed_row() {
        let mut row = SnapshotRow::new(9, 0, SnapshotFlags::empty());
        row.children = [3, 2];
        assert!(validate_snapshot_row(5, &row).is_ok());
    }

    #[test]
    fn rejects_wrong_size_bytes() {
        assert!(validate_snapshot_bytes(1, &[0u8; 10]).is_err());
        assert!(validate_subvolume_bytes(1, &[0u8; 10]).is_err());
    }
}
