//! Textual rendering of snapshot and subvolume rows (SPEC_FULL.md §6), used
//! by the debug CLI and by log messages that want to show a whole row
//! rather than just the fields relevant to one failure.

use crate::row::{SnapshotRow, SubvolumeRow};

/// `is_subvol <0|1> deleted <0|1> parent <u32> children <u32> <u32> subvol <u32>`
pub fn format_snapshot_row(row: &SnapshotRow) -> String {
    format!(
        "is_subvol {} deleted {} parent {} children {} {} subvol {}",
        row.is_subvol() as u8,
        row.is_deleted() as u8,
        row.parent,
        row.children[0],
        row.children[1],
        row.subvol,
    )
}

/// `root <u64> snapshot id <u32>`
pub fn format_subvolume_row(row: &SubvolumeRow) -> String {
    format!("root {} snapshot id {}", row.inode, row.snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{SnapshotFlags, SubvolumeFlags};

    #[test]
    fn formats_snapshot_row() {
        let mut row = SnapshotRow::new(1, 42, SnapshotFlags::IS_SUBVOL);
        row.children = [9, 5];
        assert_eq!(
            format_snapshot_row(&row),
            "is_subvol 1 deleted 0 parent 1 children 9 5 subvol 42"
        );
    }

    #[test]
    fn formats_subvolume_row() {
        let row = SubvolumeRow::new(7, 1000, SubvolumeFlags::empty());
        assert_eq!(format_subvolume_row(&row), "root 1000 snapshot id 7");
    }
}
