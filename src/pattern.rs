//! PatternSource — deterministic per-pass byte patterns for overwrite buffers.
//!
//! Implements spec §4.1. The table and the bit-fold-and-double expansion are
//! taken from the original `fill_buffer()` (itself credited there to
//! `shred`): a chosen value `bits` is folded with `bits | (bits << 12)`
//! before being sliced into three bytes, then the buffer is filled by
//! repeatedly doubling the already-written prefix.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{SystemTime, UNIX_EPOCH};

/// 22-entry table of 12-bit patterns, in the fixed order spec §4.1 lists.
pub const PATTERN_TABLE: [u32; 22] = [
    0x000, 0xFFF, 0x555, 0xAAA, 0x249, 0x492, 0x6DB, 0x924, 0xB6D, 0xDB6, 0x111, 0x222, 0x333,
    0x444, 0x666, 0x777, 0x888, 0x999, 0xBBB, 0xCCC, 0xDDD, 0xEEE,
];

/// A fixed constant mixed into the wall-clock seed at engine start, so two
/// runs started in the same second still diverge from a pure-time seed.
const SEED_CONSTANT: u64 = 0x5EED_FACE_D15C_5EED;

/// Bit-set over [`PATTERN_TABLE`] tracking which patterns a region has
/// already used this N-pass cycle. Owned by the caller (one per wipe
/// region) and reset at region boundaries, per spec §9 design note.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SelectedState(u32);

impl SelectedState {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }

    fn is_used(&self, i: usize) -> bool {
        self.0 & (1 << i) != 0
    }

    fn mark_used(&mut self, i: usize) {
        self.0 |= 1 << i;
    }
}

/// Produces the byte pattern for one pass of one wipe region.
pub struct PatternSource {
    rng: StdRng,
}

impl PatternSource {
    /// Seed from wall-clock time mixed with a fixed constant, per spec §4.1.
    pub fn new() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        Self::from_seed(now ^ SEED_CONSTANT)
    }

    /// Construct from an explicit seed (tests only need this for
    /// reproducibility; production always uses [`PatternSource::new`]).
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Fill `buffer` with the pattern for pass `pass_index` of `pass_count`.
    ///
    /// Passes 0, `pass_count - 1`, and `pass_count / 2` are random; every
    /// other pass draws one not-yet-used entry from [`PATTERN_TABLE`].
    /// `selected` is reset whenever `pass_index % pass_count == 0`, which —
    /// because callers always start a region's pass loop at index 0 — means
    /// it is reset exactly once per region.
    pub fn fill(
        &mut self,
        buffer: &mut [u8],
        pass_index: usize,
        pass_count: usize,
        selected: &mut SelectedState,
    ) {
        assert!(pass_count > 0, "pass_count must be > 0");

        if pass_index % pass_count == 0 {
            selected.reset();
        }

        let bits: u32 = if pass_index == 0
            || pass_index == pass_count - 1
            || pass_index == pass_count / 2
        {
            self.rng.gen::<u32>()
        } else {
            let mut idx;
            loop {
                idx = self.rng.gen_range(0..PATTERN_TABLE.len());
                if !selected.is_used(idx) {
                    break;
                }
            }
            selected.mark_used(idx);
            PATTERN_TABLE[idx]
        };

        fold_and_fill(buffer, bits);
    }
}

impl Default for PatternSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Fold `bits` per the `shred`-derived trick and replicate it across
/// `buffer` by repeatedly doubling the already-written prefix.
fn fold_and_fill(buffer: &mut [u8], bits: u32) {
    let folded = bits | (bits << 12);
    let buflen = buffer.len();

    if buflen >= 1 {
        buffer[0] = ((folded >> 4) & 0xFF) as u8;
    }
    if buflen >= 2 {
        buffer[1] = ((folded >> 8) & 0xFF) as u8;
    }
    if buflen >= 3 {
        buffer[2] = (folded & 0xFF) as u8;
    }

    let mut i = 3usize;
    while i * 2 < buflen {
        let (head, tail) = buffer.split_at_mut(i);
        tail[..i].copy_from_slice(&head[..i]);
        i *= 2;
    }
    if i < buflen {
        let (head, tail) = buffer.split_at_mut(i);
        let remaining = buflen - i;
        tail[..remaining].copy_from_slice(&head[..remaining]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fixed_pattern_replicates_across_buffer() {
        let mut buf = [0u8; 16];
        // 0xAAA folded: 0xAAA | 0xAAA000 = 0xAAAAA
        fold_and_fill(&mut buf, 0xAAA);
        assert_eq!(buf[0], 0xAA);
        assert_eq!(buf[1], 0xAA);
        assert_eq!(buf[2], 0xAA);
        assert!(buf.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn zero_pattern_is_all_zero() {
        let mut buf = [0xFFu8; 32];
        fold_and_fill(&mut buf, 0x000);
        assert!(buf.iter().all(|&b| b == 0x00));
    }

    #[test]
    fn all_ones_pattern_is_all_ff() {
        let mut buf = [0u8; 32];
        fold_and_fill(&mut buf, 0xFFF);
        assert!(buf.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn short_buffer_does_not_panic() {
        let mut buf = [0u8; 2];
        fold_and_fill(&mut buf, 0x555);
    }

    #[test]
    fn selected_state_resets_at_region_boundary() {
        let mut src = PatternSource::from_seed(42);
        let mut state = SelectedState::new();
        let mut buf = [0u8; 64];
        let n = 6;
        let mut seen = Vec::new();
        for p in 0..n {
            src.fill(&mut buf, p, n, &mut state);
            seen.push(buf);
        }
        // pass_index 1,2,3,4 (excluding 0, n-1=5, n/2=3) draw distinct table
        // entries without repetition; re-running the same region should be
        // able to reuse the whole table again.
        state.reset();
        assert_eq!(state, SelectedState::new());
    }

    #[test]
    fn pass_distinctness_excluding_random_passes() {
        // P8: for N >= 4 passes, non-random passes are pairwise distinct.
        let mut src = PatternSource::from_seed(7);
        let mut state = SelectedState::new();
        let n = 8;
        let mut fixed_firsts = Vec::new();
        for p in 0..n {
            let mut buf = [0u8; 8];
            src.fill(&mut buf, p, n, &mut state);
            if p != 0 && p != n - 1 && p != n / 2 {
                fixed_firsts.push(buf);
            }
        }
        for i in 0..fixed_firsts.len() {
            for j in (i + 1)..fixed_firsts.len() {
                assert_ne!(fixed_firsts[i], fixed_firsts[j]);
            }
        }
    }

    proptest! {
        /// `fold_and_fill` must never panic regardless of bit pattern or
        /// buffer length, and it always fills the buffer it's given.
        #[test]
        fn fold_and_fill_fills_arbitrary_length_buffers(
            bits in 0u32..0x1000,
            len in 0usize..300,
        ) {
            let mut buf = vec![0xAAu8; len];
            fold_and_fill(&mut buf, bits);
            prop_assert_eq!(buf.len(), len);
        }

        /// P8 generalised beyond the one hand-picked seed/pass-count above:
        /// non-random passes stay pairwise distinct for any seed and any
        /// pass count >= 4.
        #[test]
        fn pass_distinctness_holds_for_any_seed_and_pass_count(
            seed in any::<u64>(),
            n in 4usize..18,
        ) {
            let mut src = PatternSource::from_seed(seed);
            let mut state = SelectedState::new();
            let mut fixed = Vec::new();
            for p in 0..n {
                let mut buf = [0u8; 8];
                src.fill(&mut buf, p, n, &mut state);
                if p != 0 && p != n - 1 && p != n / 2 {
                    fixed.push(buf);
                }
            }
            for i in 0..fixed.len() {
                for j in (i + 1)..fixed.len() {
                    prop_assert_ne!(fixed[i], fixed[j]);
                }
            }
        }
    }
}
