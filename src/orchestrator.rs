//! WipeOrchestrator (spec §4.7): check_mount → open → run each selected
//! phase, accumulating the worst error → close.
//!
//! Grounded in the teacher's top-level `wipe_orchestrator.rs`, which drives
//! the same check→open→phases→close shape over a `DriveType`-dispatched
//! backend; here the dispatch is over [`BackendTag`] instead.

use crate::backend::{check_mount, ext2::Ext2Backend, ntfs::NtfsBackend, reiserfs::ReiserBackend};
use crate::backend::{FsBackend, WipeContext, WipeOptions};
use crate::block::BlockDevice;
use crate::cancel::CancellationFlag;
use crate::config::{BackendTag, WipeJobConfig};
use crate::error::{WipeError, WipeResult};
use crate::progress::ProgressSink;

/// Drives one wipe job end to end. Owns nothing across calls: every `run`
/// opens, wipes, and closes a fresh backend, matching spec §4.7's per-target
/// lifecycle.
pub struct WipeOrchestrator;

impl WipeOrchestrator {
    /// Execute `config` against `cancel`/`progress`, returning `Ok(())` on a
    /// clean run or the worst error observed across phases.
    ///
    /// A config with no phase flags set never reaches here — the CLI
    /// collaborator is expected to short-circuit on [`WipeJobConfig::has_any_phase`]
    /// and report [`WipeError::Nothing`] itself (spec §6 exit code `1`).
    pub fn run(
        config: &WipeJobConfig,
        cancel: &CancellationFlag,
        progress: &mut dyn ProgressSink,
    ) -> WipeResult<()> {
        check_mount(&config.device)?;

        let device_path = config.device.clone();
        let device = BlockDevice::open(
            device_path.to_str().ok_or(WipeError::OpenFs)?,
            true,
            config.block_size_override,
        )?;

        let mut backend: Box<dyn FsBackend> = match config.backend {
            BackendTag::Ext23 => Box::new(Ext2Backend::open(
                device,
                config.superblock_offset,
                config.block_size_override,
            )?),
            BackendTag::Ntfs => Box::new(NtfsBackend::open(
                device,
                device_path,
                config.block_size_override,
            )?),
            BackendTag::ReiserV3 => {
                Box::new(ReiserBackend::open(device, config.block_size_override)?)
            }
        };

        let options = WipeOptions {
            pass_count: config.pass_count,
            zero_pass: config.zero_pass,
            no_wipe_zero_blocks: config.no_wipe_zero_blocks,
            use_dedicated: config.use_dedicated,
            mode: config.mode,
        };

        let mut worst: Option<WipeError> = None;
        let phases: [(bool, fn(&mut dyn FsBackend, &mut WipeContext) -> WipeResult<()>); 3] = [
            (config.wipe_free_space, |b, c| b.wipe_fs(c)),
            (config.wipe_slack, |b, c| b.wipe_part(c)),
            (config.wipe_undelete, |b, c| b.wipe_unrm(c)),
        ];

        for (enabled, run_phase) in phases {
            if !enabled {
                continue;
            }
            if cancel.is_set() {
                worst = WipeError::worst(worst, Err(WipeError::Signal));
                break;
            }
            let mut ctx = WipeContext {
                cancel,
                progress,
                options,
            };
            let result = run_phase(backend.as_mut(), &mut ctx);
            let is_signal = matches!(result, Err(WipeError::Signal));
            worst = WipeError::worst(worst, result);
            if is_signal {
                break;
            }
        }

        let close_result = backend.close();
        worst = WipeError::worst(worst, close_result);

        match worst {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WipeMode;
    use crate::progress::NullSink;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    fn base_config(device: PathBuf) -> WipeJobConfig {
        WipeJobConfig {
            device,
            backend: BackendTag::Ext23,
            pass_count: 1,
            superblock_offset: 0,
            block_size_override: Some(1024),
            wipe_free_space: false,
            wipe_slack: false,
            wipe_undelete: false,
            mode: WipeMode::Zero,
            zero_pass: true,
            no_wipe_zero_blocks: false,
            use_dedicated: false,
            verbose: false,
        }
    }

    #[test]
    fn open_failure_on_bad_superblock_is_reported() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 4096]).unwrap();
        tmp.flush().unwrap();

        let mut config = base_config(tmp.path().to_path_buf());
        config.wipe_free_space = true;

        let cancel = CancellationFlag::new();
        let mut sink = NullSink;
        let result = WipeOrchestrator::run(&config, &cancel, &mut sink);
        assert_eq!(result, Err(WipeError::OpenFs));
    }

    #[test]
    fn pre_set_cancellation_short_circuits() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 4096]).unwrap();
        tmp.flush().unwrap();

        let mut config = base_config(tmp.path().to_path_buf());
        config.wipe_free_space = true;

        let cancel = CancellationFlag::new();
        cancel.set();
        let mut sink = NullSink;
        // Mount check and open still run (they precede phase dispatch);
        // a malformed ext2 image fails open first, which is the expected
        // result here since there's no valid superblock to open.
        let result = WipeOrchestrator::run(&config, &cancel, &mut sink);
        assert!(result.is_err());
    }
}
