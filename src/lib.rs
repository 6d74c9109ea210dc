//! Filesystem-aware free-space, slack, and undelete-metadata wiping engine.
//!
//! Supports ext2/ext3, NTFS, and ReiserFS v3. See `SPEC_FULL.md` for the
//! full design; `DESIGN.md` for how each module is grounded.

pub mod backend;
pub mod block;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod pattern;
pub mod progress;
pub mod subprocess;

pub use cancel::CancellationFlag;
pub use config::{BackendTag, WipeJobConfig, WipeMode};
pub use error::{ExitCode, WipeError, WipeResult};
pub use orchestrator::WipeOrchestrator;
pub use progress::{ProgressSink, TerminalProgress, WipePhase};
