/// Small, explicit configuration surface for the engine. Nothing here is
/// read from a file or environment variable — the host application decides
/// and passes an `EngineConfig` to `Engine::new`, the way the teacher's CLI
/// builds `bch_opts` before opening a filesystem.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Resolves the Open Question in SPEC_FULL.md §9: when
    /// `delete_physical` can't find its own id among the parent's children,
    /// should it tolerate the corruption (log and still re-normalize and
    /// write the parent) or abort?
    ///
    /// `true` (default) matches the source's observed lenient behavior.
    pub tolerant_missing_backpointer: bool,

    /// How many snapshot rows the reclamation engine's dead-detection and
    /// deleted-set passes (phases 1 and 3) fetch from the host per
    /// `iter_rows_from` call. Purely a batching knob; does not change
    /// observable behavior.
    pub reclaim_batch_size: usize,

    /// Upper bound of the subvolume slot range, `[SUBVOL_MIN, subvol_max]`.
    /// Defaults to `row::SUBVOL_MAX`; tests shrink it to exercise `NO_SPACE`
    /// without actually allocating a million rows.
    pub subvol_max: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            tolerant_missing_backpointer: true,
            reclaim_batch_size: 512,
            subvol_max: crate::row::SUBVOL_MAX,
        }
    }
}
