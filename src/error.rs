//! Error taxonomy for the wipe engine.
//!
//! Mirrors the kinds in spec §7. Variants are ordered worst-to-best by
//! [`WipeError::severity`] so the orchestrator can aggregate the worst-seen
//! error across phases without losing track of which one "wins".

use thiserror::Error;

/// Exit codes the CLI maps a [`WipeError`] (or success) onto, per spec §6.
pub type ExitCode = i32;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WipeError {
    #[error("nothing to do")]
    Nothing,

    #[error("invalid command line arguments")]
    BadCmdln,

    #[error("mount check failed")]
    MountCheckFailed,

    #[error("filesystem is mounted read-write")]
    MountedReadWrite,

    #[error("failed to open filesystem")]
    OpenFs,

    #[error("failed to close filesystem")]
    CloseFs,

    #[error("failed to flush filesystem")]
    FlushFs,

    #[error("memory allocation failed")]
    MallocFailed,

    #[error("inode scan failed")]
    InodeScan,

    #[error("block iteration failed")]
    BlockIter,

    #[error("inode read failed")]
    InodeRead,

    #[error("directory iteration failed")]
    DirIter,

    #[error("attribute open failed")]
    AttrOpen,

    #[error("context error")]
    CtxError,

    #[error("NTFS runlist decode failed")]
    NtfsRunlist,

    #[error("block read failed")]
    BlockRead,

    #[error("block write failed")]
    BlockWrite,

    #[error("bitmap read failed")]
    BitmapRead,

    #[error("privilege drop failed")]
    Suid,

    #[error("failed to fork dedicated wiper subprocess")]
    ForkErr,

    #[error("failed to exec dedicated wiper subprocess")]
    ExecErr,

    #[error("filesystem has errors")]
    FsHasError,

    #[error("cancelled by signal")]
    Signal,
}

impl WipeError {
    /// The signed status code from spec §6 that the CLI exits with.
    pub fn exit_code(self) -> ExitCode {
        match self {
            WipeError::Nothing => 1,
            WipeError::BadCmdln => -1,
            WipeError::MountCheckFailed => -2,
            WipeError::MountedReadWrite => -3,
            WipeError::OpenFs => -4,
            WipeError::BitmapRead => -5,
            WipeError::MallocFailed => -6,
            WipeError::FsHasError => -7,
            WipeError::CloseFs => -8,
            WipeError::InodeScan => -9,
            WipeError::BlockIter => -10,
            WipeError::InodeRead => -11,
            WipeError::DirIter => -12,
            WipeError::Suid => -13,
            WipeError::FlushFs => -14,
            WipeError::Signal => -100,
            // Errors below have no dedicated slot in the canonical exit-code
            // table (spec §6); they are sub-cases folded into the closest
            // numbered category they propagate as.
            WipeError::AttrOpen | WipeError::CtxError | WipeError::NtfsRunlist => -11,
            WipeError::BlockRead | WipeError::BlockWrite => -10,
            WipeError::ForkErr => -6,
            WipeError::ExecErr => -6,
        }
    }

    /// Relative severity used to pick the "worst" of two errors seen across
    /// phases (spec §7 propagation policy). Higher is worse. `Signal` is
    /// always worst since it short-circuits the orchestrator.
    pub fn severity(self) -> u8 {
        match self {
            WipeError::Nothing => 0,
            WipeError::FsHasError => 1,
            WipeError::BlockRead
            | WipeError::BlockWrite
            | WipeError::BitmapRead
            | WipeError::InodeRead
            | WipeError::InodeScan
            | WipeError::BlockIter
            | WipeError::DirIter
            | WipeError::AttrOpen
            | WipeError::CtxError
            | WipeError::NtfsRunlist => 2,
            WipeError::FlushFs | WipeError::CloseFs | WipeError::OpenFs => 3,
            WipeError::MallocFailed | WipeError::ForkErr | WipeError::ExecErr => 4,
            WipeError::Suid => 5,
            WipeError::MountedReadWrite | WipeError::MountCheckFailed | WipeError::BadCmdln => 6,
            WipeError::Signal => 7,
        }
    }

    /// Fold a new phase result into a running worst-seen aggregate, per the
    /// orchestrator's "worst error wins" propagation policy (spec §7).
    pub fn worst(current: Option<WipeError>, next: Result<(), WipeError>) -> Option<WipeError> {
        match next {
            Ok(()) => current,
            Err(e) => match current {
                Some(c) if c.severity() >= e.severity() => Some(c),
                _ => Some(e),
            },
        }
    }
}

pub type WipeResult<T> = Result<T, WipeError>;
