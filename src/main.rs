//! CLI entry point. Spec §1 places argument parsing, privilege dropping,
//! mount-state discovery beyond the backend's own check, and signal
//! installation out of scope for the core; this binary is the thin
//! collaborator that wires them up around [`scrubfs::WipeOrchestrator`].

use clap::{Parser, ValueEnum};
use scrubfs::{
    BackendTag, CancellationFlag, ExitCode, ProgressSink, TerminalProgress, WipeError,
    WipeJobConfig, WipeMode, WipeOrchestrator,
};
use std::path::PathBuf;
use std::process::ExitCode as ProcessExitCode;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Ext2,
    Ext3,
    Ntfs,
    Reiser,
}

impl From<BackendArg> for BackendTag {
    fn from(b: BackendArg) -> Self {
        match b {
            BackendArg::Ext2 | BackendArg::Ext3 => BackendTag::Ext23,
            BackendArg::Ntfs => BackendTag::Ntfs,
            BackendArg::Reiser => BackendTag::ReiserV3,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Pattern,
    Zero,
}

impl From<ModeArg> for WipeMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Pattern => WipeMode::Pattern,
            ModeArg::Zero => WipeMode::Zero,
        }
    }
}

/// Securely erase free space, file slack, and undelete metadata on a
/// mounted-capable block device.
#[derive(Parser, Debug)]
#[command(name = "scrubfs", version, about)]
struct Cli {
    /// Device hosting the filesystem to wipe (e.g. /dev/sdb1).
    device: PathBuf,

    /// On-disk format the device holds.
    #[arg(long, value_enum)]
    backend: BackendArg,

    /// Number of overwrite passes (must be > 0).
    #[arg(short = 'n', long, default_value_t = 25)]
    passes: usize,

    /// ext2/3 only: byte offset of the superblock.
    #[arg(long, default_value_t = 0)]
    superblock_offset: u64,

    /// Override the backend's reported block size.
    #[arg(long)]
    block_size: Option<u64>,

    /// Wipe blocks the filesystem currently marks free.
    #[arg(short = 'f', long)]
    free_space: bool,

    /// Wipe the unused tail of partially-used file blocks.
    #[arg(short = 's', long)]
    slack: bool,

    /// Wipe deleted directory entries, MFT/log residue.
    #[arg(short = 'u', long)]
    undelete: bool,

    /// Pattern table vs. zero-only overwrite.
    #[arg(long, value_enum, default_value_t = ModeArg::Pattern)]
    mode: ModeArg,

    /// Append a final all-zero pass.
    #[arg(short = 'z', long)]
    zero_pass: bool,

    /// Skip regions that already read as all zero.
    #[arg(long)]
    no_wipe_zero_blocks: bool,

    /// NTFS only: delegate to the vendor `ntfswipe` binary.
    #[arg(long)]
    use_dedicated: bool,

    /// Emit progress to the terminal instead of running silently.
    #[arg(short, long)]
    verbose: bool,
}

impl From<Cli> for WipeJobConfig {
    fn from(cli: Cli) -> Self {
        WipeJobConfig {
            device: cli.device,
            backend: cli.backend.into(),
            pass_count: cli.passes,
            superblock_offset: cli.superblock_offset,
            block_size_override: cli.block_size,
            wipe_free_space: cli.free_space,
            wipe_slack: cli.slack,
            wipe_undelete: cli.undelete,
            mode: cli.mode.into(),
            zero_pass: cli.zero_pass,
            no_wipe_zero_blocks: cli.no_wipe_zero_blocks,
            use_dedicated: cli.use_dedicated,
            verbose: cli.verbose,
        }
    }
}

/// Installs the cancellation flag spec §5 describes: a process-wide atomic
/// set by external signal delivery, polled (never unwound-to) by the
/// engine. Grounded in the teacher's `setup_signal_handlers`, which spawns
/// a dedicated thread to drain `signal_hook::iterator::Signals` rather than
/// using an async-signal-safe handler directly.
fn install_signal_handler(cancel: CancellationFlag) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
    std::thread::spawn(move || {
        for _sig in signals.forever() {
            cancel.set();
        }
    });
    Ok(())
}

fn exit_code_to_process(code: ExitCode) -> ProcessExitCode {
    // `ExitCode` is the signed status from spec §6; std's process exit
    // code is an unsigned byte, so negative codes are carried through two's
    // complement the same way a shell sees them from a C `exit()` call.
    ProcessExitCode::from((code as i8) as u8)
}

fn main() -> ProcessExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let config: WipeJobConfig = cli.into();

    if config.pass_count == 0 {
        tracing::error!("pass count must be greater than zero");
        return exit_code_to_process(WipeError::BadCmdln.exit_code());
    }

    if !config.has_any_phase() {
        tracing::info!("no phase flags set, nothing to do");
        return exit_code_to_process(1);
    }

    let cancel = CancellationFlag::new();
    if let Err(err) = install_signal_handler(cancel.clone()) {
        tracing::error!(%err, "failed to install signal handler");
        return exit_code_to_process(WipeError::BadCmdln.exit_code());
    }

    let mut sink: Box<dyn ProgressSink> = if config.verbose {
        Box::new(TerminalProgress::default())
    } else {
        Box::new(scrubfs::progress::NullSink)
    };

    tracing::info!(device = %config.device.display(), backend = ?config.backend, "starting wipe");

    match WipeOrchestrator::run(&config, &cancel, sink.as_mut()) {
        Ok(()) => {
            tracing::info!("wipe completed successfully");
            ProcessExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(%err, "wipe failed");
            exit_code_to_process(err.exit_code())
        }
    }
}

