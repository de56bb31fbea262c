//! Minimal debug/inspection CLI for the snapshot and subvolume engine
//! (SPEC_FULL.md §2 component L). Mirrors the shape of the teacher's
//! `subvolume` subcommand (create/delete/snapshot/list), but drives the
//! in-memory reference host rather than a real, on-disk filesystem — there
//! is no persistence between invocations, so this binary is meant to be
//! exercised interactively within a single run via repeated subcommands
//! piped through a shell loop, or driven directly in tests. It is ambient
//! tooling, not the product.

use anyhow::{bail, Result};
use bcachefs_snapshots::render::{format_snapshot_row, format_subvolume_row};
use bcachefs_snapshots::{Engine, EngineConfig};
use btree_host::MemHost;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "snapvol", about = "Inspect the snapshot/subvolume engine against an in-memory reference host")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a fresh, parentless subvolume.
    #[command(visible_aliases = ["new"])]
    Create {
        /// Root directory inode number to record on the new subvolume row.
        inode: u64,
        #[arg(long, short)]
        read_only: bool,
    },

    /// Snapshot an existing subvolume.
    #[command(visible_aliases = ["snap"])]
    Snapshot {
        /// Subvolume id to snapshot.
        src_subvol: u32,
        /// Root directory inode number for the new subvolume.
        inode: u64,
        #[arg(long, short)]
        read_only: bool,
    },

    /// Delete a subvolume by id.
    #[command(visible_aliases = ["del"])]
    Delete {
        subvol: u32,
        /// Require the row to be a snapshot (true) or a fresh subvolume (false).
        #[arg(long, conflicts_with = "expect_fresh")]
        expect_snapshot: bool,
        #[arg(long)]
        expect_fresh: bool,
    },

    /// List every snapshot and subvolume row currently on disk.
    #[command(visible_aliases = ["ls"])]
    List {
        /// Output as JSON instead of the plain textual rendering.
        #[arg(long)]
        json: bool,
    },

    /// Run the fsck consistency pass.
    Fsck,

    /// Run the reclamation pass synchronously and report completion.
    Reclaim,
}

fn expect_flag(expect_snapshot: bool, expect_fresh: bool) -> Option<bool> {
    match (expect_snapshot, expect_fresh) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        (false, false) => None,
        (true, true) => unreachable!("clap's conflicts_with rules this out"),
    }
}

fn run(engine: &Engine<MemHost>, command: Commands) -> Result<()> {
    match command {
        Commands::Create { inode, read_only } => {
            let created = engine.subvolume_create(inode, 0, read_only)?;
            println!("subvolume {} snapshot {}", created.subvol_id, created.snapshot_id);
        }
        Commands::Snapshot { src_subvol, inode, read_only } => {
            let created = engine.subvolume_create(inode, src_subvol, read_only)?;
            println!("subvolume {} snapshot {}", created.subvol_id, created.snapshot_id);
        }
        Commands::Delete { subvol, expect_snapshot, expect_fresh } => {
            engine.subvolume_delete(subvol, expect_flag(expect_snapshot, expect_fresh))?;
            println!("deleted subvolume {subvol}");
        }
        Commands::List { json } => {
            let (snapshots, subvols) = engine.debug_list()?;
            if json {
                let snaps_json: Vec<_> = snapshots
                    .iter()
                    .map(|(id, row)| {
                        serde_json::json!({
                            "id": id,
                            "is_subvol": row.is_subvol(),
                            "deleted": row.is_deleted(),
                            "parent": row.parent,
                            "children": row.children,
                            "subvol": row.subvol,
                        })
                    })
                    .collect();
                let subvols_json: Vec<_> = subvols
                    .iter()
                    .map(|(id, row)| {
                        serde_json::json!({
                            "id": id,
                            "root": row.inode,
                            "snapshot": row.snapshot,
                            "read_only": row.read_only(),
                            "is_snapshot": row.is_snapshot(),
                        })
                    })
                    .collect();
                let doc = serde_json::json!({ "snapshots": snaps_json, "subvolumes": subvols_json });
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                for (id, row) in snapshots {
                    println!("snapshot {id}: {}", format_snapshot_row(&row));
                }
                for (id, row) in subvols {
                    println!("subvolume {id}: {}", format_subvolume_row(&row));
                }
            }
        }
        Commands::Fsck => {
            let failures = engine.snapshots_check()?;
            if failures.is_empty() {
                println!("ok");
            } else {
                for f in &failures {
                    println!("{f}");
                }
                bail!("{} inconsistenc{} found", failures.len(), if failures.len() == 1 { "y" } else { "ies" });
            }
        }
        Commands::Reclaim => {
            engine.reclaim_now()?;
            println!("reclamation pass complete");
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let host = MemHost::new();
    let engine = Engine::new(host, EngineConfig::default());
    engine.snapshots_start()?;

    run(&engine, cli.command)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine<MemHost> {
        let host = MemHost::new();
        let engine = Engine::new(host, EngineConfig::default());
        engine.snapshots_start().unwrap();
        engine
    }

    fn parse(args: &[&str]) -> Commands {
        let mut full = vec!["snapvol"];
        full.extend_from_slice(args);
        Cli::parse_from(full).command
    }

    #[test]
    fn create_snapshot_delete_list_fsck_smoke_test() {
        let engine = engine();

        run(&engine, parse(&["create", "100"])).unwrap();
        run(&engine, parse(&["snapshot", "1", "200", "--read-only"])).unwrap();
        run(&engine, parse(&["list"])).unwrap();
        run(&engine, parse(&["fsck"])).unwrap();
        run(&engine, parse(&["delete", "2", "--expect-snapshot"])).unwrap();
        run(&engine, parse(&["reclaim"])).unwrap();
        run(&engine, parse(&["fsck"])).unwrap();
    }

    #[test]
    fn expect_flag_maps_clap_args_to_tri_state_option() {
        assert_eq!(expect_flag(true, false), Some(true));
        assert_eq!(expect_flag(false, true), Some(false));
        assert_eq!(expect_flag(false, false), None);
    }

    #[test]
    fn delete_rejects_wrong_kind_of_handle() {
        let engine = engine();
        run(&engine, parse(&["create", "1"])).unwrap();
        let err = run(&engine, parse(&["delete", "1", "--expect-snapshot"])).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
