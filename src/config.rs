//! Job configuration handed from the CLI collaborator to the orchestrator
//! (spec §6's configuration struct).

use std::path::PathBuf;

/// Whether overwrite passes use the full [`crate::pattern::PatternSource`]
/// table or simply zero every region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WipeMode {
    Pattern,
    Zero,
}

/// Which on-disk format `device` holds, selecting the [`crate::backend::FsBackend`]
/// implementation the orchestrator dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendTag {
    Ext23,
    Ntfs,
    ReiserV3,
}

/// One wipe job, as assembled by the CLI from parsed arguments (spec §6).
#[derive(Debug, Clone)]
pub struct WipeJobConfig {
    pub device: PathBuf,
    pub backend: BackendTag,
    /// Must be > 0; default 25 per spec §6.
    pub pass_count: usize,
    /// ext2/3 only: byte offset of the superblock, 0 for the standard layout.
    pub superblock_offset: u64,
    pub block_size_override: Option<u64>,
    pub wipe_free_space: bool,
    pub wipe_slack: bool,
    pub wipe_undelete: bool,
    pub mode: WipeMode,
    pub zero_pass: bool,
    pub no_wipe_zero_blocks: bool,
    pub use_dedicated: bool,
    pub verbose: bool,
}

impl WipeJobConfig {
    /// Whether any phase flag was set; per spec §7 a config with none set is
    /// `Nothing` (exit code 1), not an error.
    pub fn has_any_phase(&self) -> bool {
        self.wipe_free_space || self.wipe_slack || self.wipe_undelete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn base() -> WipeJobConfig {
        WipeJobConfig {
            device: PathBuf::from("/dev/null"),
            backend: BackendTag::Ext23,
            pass_count: 25,
            superblock_offset: 0,
            block_size_override: None,
            wipe_free_space: false,
            wipe_slack: false,
            wipe_undelete: false,
            mode: WipeMode::Pattern,
            zero_pass: false,
            no_wipe_zero_blocks: false,
            use_dedicated: false,
            verbose: false,
        }
    }

    #[test]
    fn no_phase_flags_means_nothing_to_do() {
        assert!(!base().has_any_phase());
        let mut cfg = base();
        cfg.wipe_slack = true;
        assert!(cfg.has_any_phase());
    }

    #[test_case(false, false, false => false; "no phases")]
    #[test_case(true, false, false => true; "free space only")]
    #[test_case(false, true, false => true; "slack only")]
    #[test_case(false, false, true => true; "undelete only")]
    #[test_case(true, true, true => true; "all phases")]
    fn has_any_phase_matches_flag_combination(free_space: bool, slack: bool, undelete: bool) -> bool {
        let mut cfg = base();
        cfg.wipe_free_space = free_space;
        cfg.wipe_slack = slack;
        cfg.wipe_undelete = undelete;
        cfg.has_any_phase()
    }
}
