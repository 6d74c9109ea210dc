//! Dedicated-subprocess fallback for NTFS (spec §4.8): when `use_dedicated`
//! is set, the engine shells out to an external `ntfswipe` binary instead
//! of running its own scanner.
//!
//! Argv shapes follow spec §6 exactly, including the fixed 22-entry byte
//! list (the same pattern table [`crate::pattern::PATTERN_TABLE`] encodes,
//! spelled out here because the external tool takes it as a CLI argument
//! rather than a compiled-in constant).

use crate::error::{WipeError, WipeResult};
use std::path::Path;
use std::process::{Command, Stdio};

const BYTES_ARG: &str =
    "0,0xFF,0x55,0xAA,0x24,0x49,0x92,0x6D,0xB6,0xDB,0x11,0x22,0x33,0x44,0x66,0x77,0x88,0x99,0xBB,0xCC,0xDD,0xEE";

/// Spec §4.8: "the count argument is formatted into a pre-allocated 22-byte
/// slot." The 22-byte budget is just a fixed `itoa`-sized buffer in the
/// original, which `format!` already satisfies without needing to reserve
/// one explicitly.
fn count_arg(pass_count: usize) -> String {
    format!("{pass_count}")
}

fn run(args: &[&str], device: &Path, inherit_io: bool) -> WipeResult<()> {
    let mut cmd = Command::new("ntfswipe");
    cmd.args(args).arg(device);

    if inherit_io {
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
    } else {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
    }

    let status = cmd.status().map_err(|_| WipeError::ForkErr)?;
    if status.success() {
        Ok(())
    } else {
        Err(WipeError::ExecErr)
    }
}

/// `ntfswipe --unused --count <N> --bytes <list> <device>`, detached I/O.
pub fn run_unused(pass_count: usize, device: &Path) -> WipeResult<()> {
    let count = count_arg(pass_count);
    run(
        &["--unused", "--count", &count, "--bytes", BYTES_ARG],
        device,
        false,
    )
}

/// `ntfswipe --tails --count <N> --bytes <list> <device>`, inheriting I/O
/// (spec §4.8: "slack delegates inherit I/O").
pub fn run_tails(pass_count: usize, device: &Path) -> WipeResult<()> {
    let count = count_arg(pass_count);
    run(
        &["--tails", "--count", &count, "--bytes", BYTES_ARG],
        device,
        true,
    )
}

/// `ntfswipe --directory --logfile --pagefile --undel --count <N> <device>`,
/// detached I/O.
pub fn run_undel(pass_count: usize, device: &Path) -> WipeResult<()> {
    let count = count_arg(pass_count);
    run(
        &["--directory", "--logfile", "--pagefile", "--undel", "--count", &count],
        device,
        false,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_arg_formats_plain_decimal() {
        assert_eq!(count_arg(25), "25");
    }

    #[test]
    fn missing_binary_maps_to_fork_err() {
        // `ntfswipe` is never installed in the test environment, so every
        // call exercises the "failed to launch" path.
        let result = run_unused(1, Path::new("/dev/null"));
        assert_eq!(result, Err(WipeError::ForkErr));
    }
}
