//! ProgressSink — the monotonic (phase, percent) callback contract from
//! spec §2, plus a terminal renderer carried over from the teacher's
//! hand-rolled `ui/progress.rs` cat-bar (an out-of-scope UI collaborator,
//! kept only so the CLI binary is runnable end to end).

use std::io::{self, Write};
use std::time::Instant;

/// Which wipe phase a progress update belongs to, per spec §4.3's
/// "wipe_fs / wipe_part / wipe_unrm" entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WipePhase {
    FreeSpace,
    Slack,
    Undelete,
}

impl WipePhase {
    pub fn label(&self) -> &'static str {
        match self {
            WipePhase::FreeSpace => "free space",
            WipePhase::Slack => "slack",
            WipePhase::Undelete => "undelete",
        }
    }
}

/// Receives `(phase, percent)` updates. Implementations must observe
/// strictly monotonic percent within a phase, in `[0, 100]`, per spec §4.3.
pub trait ProgressSink {
    fn update(&mut self, phase: WipePhase, percent: f64);
}

/// Discards updates; used by the library in non-interactive contexts and
/// by tests.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn update(&mut self, _phase: WipePhase, _percent: f64) {}
}

/// Guards against a caller accidentally violating the monotonic-percent
/// contract; wraps another sink and panics (in debug builds) on
/// regression, which is cheap insurance that the invariant in spec §4.3
/// actually holds in tests.
pub struct MonotonicGuard<S: ProgressSink> {
    inner: S,
    last: Option<(WipePhase, f64)>,
}

impl<S: ProgressSink> MonotonicGuard<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, last: None }
    }
}

impl<S: ProgressSink> ProgressSink for MonotonicGuard<S> {
    fn update(&mut self, phase: WipePhase, percent: f64) {
        if let Some((last_phase, last_pct)) = self.last {
            if last_phase == phase {
                debug_assert!(
                    percent > last_pct || (percent == 100.0 && last_pct == 100.0),
                    "progress regressed within a phase: {} -> {}",
                    last_pct,
                    percent
                );
            }
        }
        self.last = Some((phase, percent));
        self.inner.update(phase, percent);
    }
}

const CAT_FRAMES: [&str; 6] = [
    "ฅ(^･ω･^=)  ",
    "ฅ(=^･ω･^ ) ",
    "ฅ(^･ᴥ･^=)  ",
    "ฅ(=^ᴥ^= )  ",
    "ฅ(^･ω･^=)  ",
    "ฅ(=^･ω･^ ) ",
];

/// A terminal progress bar, in the teacher's animated-cat style.
pub struct TerminalProgress {
    width: usize,
    cat_frame: usize,
    start: Instant,
    first_render: bool,
    current_phase: Option<WipePhase>,
}

impl TerminalProgress {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            cat_frame: 0,
            start: Instant::now(),
            first_render: true,
            current_phase: None,
        }
    }
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new(48)
    }
}

impl ProgressSink for TerminalProgress {
    fn update(&mut self, phase: WipePhase, percent: f64) {
        if self.current_phase != Some(phase) {
            if !self.first_render {
                println!();
            }
            self.current_phase = Some(phase);
            self.start = Instant::now();
            self.first_render = true;
        }

        let pct = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, 100.0)
        };
        let filled = ((pct / 100.0) * self.width as f64).round() as usize;
        let empty = self.width.saturating_sub(filled);

        self.cat_frame = (self.cat_frame + 1) % CAT_FRAMES.len();
        let cat = CAT_FRAMES[self.cat_frame];
        let bar = format!("{}{}", "█".repeat(filled), "░".repeat(empty));
        let elapsed = self.start.elapsed().as_secs_f64();

        if self.first_render {
            print!(
                "{} wiping {}\n[{}] {:.1}%\n",
                cat,
                phase.label(),
                bar,
                pct
            );
            self.first_render = false;
        } else {
            print!("\x1b[2A\x1b[2K\r");
            print!("{} wiping {}\n", cat, phase.label());
            print!("\x1b[2K\r[{}] {:.1}% ({:.1}s)\n", bar, pct, elapsed);
        }
        io::stdout().flush().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Vec<(WipePhase, f64)>);
    impl ProgressSink for Recorder {
        fn update(&mut self, phase: WipePhase, percent: f64) {
            self.0.push((phase, percent));
        }
    }

    #[test]
    fn monotonic_guard_passes_through() {
        let mut guard = MonotonicGuard::new(Recorder(Vec::new()));
        guard.update(WipePhase::FreeSpace, 0.0);
        guard.update(WipePhase::FreeSpace, 50.0);
        guard.update(WipePhase::FreeSpace, 100.0);
        assert_eq!(guard.inner.0.len(), 3);
    }

    #[test]
    fn null_sink_accepts_anything() {
        let mut sink = NullSink;
        sink.update(WipePhase::Undelete, 0.0);
        sink.update(WipePhase::Undelete, 100.0);
    }
}
