//! Process-wide cancellation flag (spec §2 CancellationFlag, §5).
//!
//! A single atomic boolean, set by an external signal handler (installed by
//! the CLI collaborator — out of scope for the core, spec §1) and polled by
//! the engine at every inner-loop boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// An `AtomicBool` handle suitable for `signal_hook::flag::register`.
    pub fn as_atomic(&self) -> Arc<AtomicBool> {
        self.0.clone()
    }
}

impl Default for CancellationFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_reset() {
        let flag = CancellationFlag::new();
        assert!(!flag.is_set());
        flag.set();
        assert!(flag.is_set());
        flag.reset();
        assert!(!flag.is_set());
    }

    #[test]
    fn clones_share_state() {
        let a = CancellationFlag::new();
        let b = a.clone();
        a.set();
        assert!(b.is_set());
    }
}
