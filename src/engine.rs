//! PatternEngine — drives the pass loop for one wipe region (spec §4.2).
//!
//! Backends differ in how a "region" is read and written (a raw `pwrite` on
//! a byte range for NTFS/ext2 free-space blocks, a buffer-cache `bread`/
//! `bwrite` pair for ReiserFS, a channel-write primitive for ext2 blocks) so
//! the engine is generic over a small [`RegionIo`] seam rather than owning
//! I/O itself — the same split the teacher draws between `OptimizedIO`
//! (mechanism) and the per-algorithm wipe functions (policy) in
//! `algorithms/{dod,gutmann,random,zero}.rs`.

use crate::block::BlockBuffer;
use crate::cancel::CancellationFlag;
use crate::error::WipeError;
use crate::pattern::{PatternSource, SelectedState};

/// One region's I/O surface. `write` returning `Err` means the underlying
/// write failed; the engine consults [`RegionIo::is_known_bad`] to decide
/// whether to swallow it (spec §7 bad-block tolerance).
pub trait RegionIo {
    fn read(&mut self, out: &mut [u8]) -> Result<(), WipeError>;
    fn write(&mut self, data: &[u8]) -> Result<(), WipeError>;
    fn flush(&mut self) -> Result<(), WipeError>;

    /// Whether this region is already on the backend's bad-block list.
    fn is_known_bad(&self) -> bool {
        false
    }

    /// Record this region as bad after its first unlisted write failure.
    fn record_bad(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionOutcome {
    /// All passes ran (the common case).
    Wiped,
    /// Step 1's zero-skip fired; no writes were issued.
    SkippedZero,
    /// The cancellation flag was observed mid-run.
    Cancelled,
}

/// Which sub-range of the buffer the pattern passes actually overwrite.
/// The rest of the buffer (if any) is real file content read once up front
/// and carried unchanged across every pass — this is how slack-wiping
/// (spec §4.4/§4.6) preserves the prefix while only scribbling the tail.
#[derive(Debug, Clone, Copy)]
pub struct FillRange {
    pub start: usize,
    pub len: usize,
}

impl FillRange {
    pub fn full(len: usize) -> Self {
        Self { start: 0, len }
    }

    pub fn tail(buffer_len: usize, start: usize) -> Self {
        Self {
            start,
            len: buffer_len - start,
        }
    }

    fn is_whole_buffer(&self, buffer_len: usize) -> bool {
        self.start == 0 && self.len == buffer_len
    }
}

pub struct PatternEngine<'a> {
    pub source: &'a mut PatternSource,
    pub cancel: &'a CancellationFlag,
}

impl<'a> PatternEngine<'a> {
    pub fn new(source: &'a mut PatternSource, cancel: &'a CancellationFlag) -> Self {
        Self { source, cancel }
    }

    /// Run the full pass loop over one region, per spec §4.2's algorithm.
    #[allow(clippy::too_many_arguments)]
    pub fn wipe_region(
        &mut self,
        io: &mut dyn RegionIo,
        buffer: &mut BlockBuffer,
        fill: FillRange,
        selected: &mut SelectedState,
        pass_count: usize,
        no_wipe_zero_blocks: bool,
        zero_pass: bool,
    ) -> Result<RegionOutcome, WipeError> {
        assert!(pass_count > 0);

        let whole_buffer = fill.is_whole_buffer(buffer.len());
        let needs_prefix_read = no_wipe_zero_blocks || !whole_buffer;

        if needs_prefix_read {
            io.read(buffer.as_mut_slice())?;
            if no_wipe_zero_blocks {
                let region = &buffer.as_slice()[fill.start..fill.start + fill.len];
                if region.iter().all(|&b| b == 0) {
                    return Ok(RegionOutcome::SkippedZero);
                }
            }
        }

        for pass in 0..pass_count {
            if self.cancel.is_set() {
                return Ok(RegionOutcome::Cancelled);
            }

            self.source.fill(
                &mut buffer.as_mut_slice()[fill.start..fill.start + fill.len],
                pass,
                pass_count,
                selected,
            );

            self.write_with_bad_block_tolerance(io, buffer.as_slice())?;

            if pass_count > 1 {
                io.flush()?;
            }

            if self.cancel.is_set() {
                return Ok(RegionOutcome::Cancelled);
            }
        }

        if zero_pass {
            buffer.as_mut_slice()[fill.start..fill.start + fill.len].fill(0);
            self.write_with_bad_block_tolerance(io, buffer.as_slice())?;
        }

        Ok(RegionOutcome::Wiped)
    }

    fn write_with_bad_block_tolerance(
        &mut self,
        io: &mut dyn RegionIo,
        data: &[u8],
    ) -> Result<(), WipeError> {
        match io.write(data) {
            Ok(()) => Ok(()),
            Err(e) => {
                if io.is_known_bad() {
                    Ok(())
                } else {
                    io.record_bad();
                    Err(e)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MemRegion {
        data: Vec<u8>,
        fail_writes: usize,
        known_bad: bool,
        writes_seen: Vec<Vec<u8>>,
    }

    impl RegionIo for MemRegion {
        fn read(&mut self, out: &mut [u8]) -> Result<(), WipeError> {
            out.copy_from_slice(&self.data);
            Ok(())
        }

        fn write(&mut self, data: &[u8]) -> Result<(), WipeError> {
            self.writes_seen.push(data.to_vec());
            if self.fail_writes > 0 {
                self.fail_writes -= 1;
                return Err(WipeError::BlockWrite);
            }
            self.data.copy_from_slice(data);
            Ok(())
        }

        fn flush(&mut self) -> Result<(), WipeError> {
            Ok(())
        }

        fn is_known_bad(&self) -> bool {
            self.known_bad
        }

        fn record_bad(&mut self) {
            self.known_bad = true;
        }
    }

    #[test]
    fn zero_skip_issues_no_writes() {
        let mut region = MemRegion {
            data: vec![0u8; 16],
            fail_writes: 0,
            known_bad: false,
            writes_seen: Vec::new(),
        };
        let mut source = PatternSource::from_seed(1);
        let cancel = CancellationFlag::new();
        let mut engine = PatternEngine::new(&mut source, &cancel);
        let mut buffer = BlockBuffer::new(16);
        let mut selected = SelectedState::new();

        let outcome = engine
            .wipe_region(
                &mut region,
                &mut buffer,
                FillRange::full(16),
                &mut selected,
                3,
                true,
                false,
            )
            .unwrap();

        assert_eq!(outcome, RegionOutcome::SkippedZero);
        assert!(region.writes_seen.is_empty());
    }

    #[test]
    fn non_zero_region_runs_all_passes_plus_zero_pass() {
        let mut region = MemRegion {
            data: vec![0xFFu8; 16],
            fail_writes: 0,
            known_bad: false,
            writes_seen: Vec::new(),
        };
        let mut source = PatternSource::from_seed(2);
        let cancel = CancellationFlag::new();
        let mut engine = PatternEngine::new(&mut source, &cancel);
        let mut buffer = BlockBuffer::new(16);
        let mut selected = SelectedState::new();

        let outcome = engine
            .wipe_region(
                &mut region,
                &mut buffer,
                FillRange::full(16),
                &mut selected,
                3,
                true,
                true,
            )
            .unwrap();

        assert_eq!(outcome, RegionOutcome::Wiped);
        // 3 passes + 1 terminating zero pass
        assert_eq!(region.writes_seen.len(), 4);
        assert!(region.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn slack_mode_preserves_prefix() {
        let mut region = MemRegion {
            data: {
                let mut v = vec![0u8; 16];
                v[..6].copy_from_slice(b"hello!");
                v
            },
            fail_writes: 0,
            known_bad: false,
            writes_seen: Vec::new(),
        };
        let mut source = PatternSource::from_seed(3);
        let cancel = CancellationFlag::new();
        let mut engine = PatternEngine::new(&mut source, &cancel);
        let mut buffer = BlockBuffer::new(16);
        let mut selected = SelectedState::new();

        engine
            .wipe_region(
                &mut region,
                &mut buffer,
                FillRange::tail(16, 6),
                &mut selected,
                2,
                false,
                true,
            )
            .unwrap();

        assert_eq!(&region.data[..6], b"hello!");
        assert!(region.data[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn bad_block_write_failure_is_swallowed_when_known() {
        let mut region = MemRegion {
            data: vec![0xFFu8; 8],
            fail_writes: 1,
            known_bad: true,
            writes_seen: Vec::new(),
        };
        let mut source = PatternSource::from_seed(4);
        let cancel = CancellationFlag::new();
        let mut engine = PatternEngine::new(&mut source, &cancel);
        let mut buffer = BlockBuffer::new(8);
        let mut selected = SelectedState::new();

        let outcome = engine
            .wipe_region(
                &mut region,
                &mut buffer,
                FillRange::full(8),
                &mut selected,
                1,
                false,
                false,
            )
            .unwrap();
        assert_eq!(outcome, RegionOutcome::Wiped);
    }

    #[test]
    fn unlisted_write_failure_aborts_region() {
        let mut region = MemRegion {
            data: vec![0xFFu8; 8],
            fail_writes: 1,
            known_bad: false,
            writes_seen: Vec::new(),
        };
        let mut source = PatternSource::from_seed(5);
        let cancel = CancellationFlag::new();
        let mut engine = PatternEngine::new(&mut source, &cancel);
        let mut buffer = BlockBuffer::new(8);
        let mut selected = SelectedState::new();

        let result = engine.wipe_region(
            &mut region,
            &mut buffer,
            FillRange::full(8),
            &mut selected,
            1,
            false,
            false,
        );
        assert_eq!(result, Err(WipeError::BlockWrite));
        assert!(region.known_bad, "first failure should be recorded");
    }

    #[test]
    fn cancellation_stops_before_next_pass() {
        let mut region = MemRegion {
            data: vec![0xFFu8; 8],
            fail_writes: 0,
            known_bad: false,
            writes_seen: Vec::new(),
        };
        let mut source = PatternSource::from_seed(6);
        let cancel = CancellationFlag::new();
        cancel.set();
        let mut engine = PatternEngine::new(&mut source, &cancel);
        let mut buffer = BlockBuffer::new(8);
        let mut selected = SelectedState::new();

        let outcome = engine
            .wipe_region(
                &mut region,
                &mut buffer,
                FillRange::full(8),
                &mut selected,
                5,
                false,
                false,
            )
            .unwrap();
        assert_eq!(outcome, RegionOutcome::Cancelled);
        assert!(region.writes_seen.is_empty());
    }
}
