//! Delegation to an external `verilator_coverage` binary
//!
//! When `VERILATOR_COVERAGE_BIN` names a binary, the whole command line is
//! handed to it and its exit status becomes ours.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use anyhow::{Context, Result};
use coverage_engine::CoverageError;
use tracing::debug;

pub const DELEGATE_ENV: &str = "VERILATOR_COVERAGE_BIN";
pub const ROOT_ENV: &str = "VERILATOR_ROOT";

/// Binary to delegate to, if one was requested.
pub fn delegate_target() -> Option<String> {
    env::var(DELEGATE_ENV).ok().filter(|value| !value.is_empty())
}

/// Find `binary` as a path, then in `$VERILATOR_ROOT/bin`, then on `PATH`.
pub fn locate(binary: &str, verilator_root: Option<&Path>) -> Result<PathBuf, CoverageError> {
    let direct = Path::new(binary);
    if direct.components().count() > 1 && direct.is_file() {
        return Ok(direct.to_path_buf());
    }
    if let Some(root) = verilator_root {
        let candidate = root.join("bin").join(binary);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    which::which(binary).map_err(|err| CoverageError::Misinstall {
        binary: binary.to_string(),
        hint: match verilator_root {
            Some(root) => format!("not in {}/bin or PATH: {err}", root.display()),
            None => format!("{ROOT_ENV} is not set and not on PATH: {err}"),
        },
    })
}

/// Run `binary` with `args`, returning the exit code to propagate.
pub fn delegate(binary: &Path, args: &[OsString]) -> Result<i32> {
    debug!(binary = %binary.display(), args = args.len(), "delegating");
    let status = Command::new(binary)
        .args(args)
        .env_remove(DELEGATE_ENV)
        .status()
        .with_context(|| format!("failed to launch {}", binary.display()))?;
    Ok(exit_code(status))
}

/// Child exit code; a signal death maps to 128 + signal, anything else to 255.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    255
}

/// Locate and run the delegate, reporting failures the way the rest of
/// the tool does.
pub fn run(binary: &str, args: &[OsString]) -> i32 {
    let root = env::var_os(ROOT_ENV).map(PathBuf::from);
    let path = match locate(binary, root.as_deref()) {
        Ok(path) => path,
        Err(err) => {
            eprintln!("%Error: {err}");
            return err.severity().exit_code();
        }
    };
    match delegate(&path, args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("%Error: {err:#}");
            255
        }
    }
}
