//! Discovery of the external tools the driver shells out to
//!
//! `verilator_coverage` is looked up in `$VERILATOR_ROOT/bin` first so a
//! checkout's own build wins over an installed copy; everything else comes
//! from `PATH`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing::debug;

pub const VERILATOR_COVERAGE: &str = "verilator_coverage";
pub const GENHTML: &str = "genhtml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSource {
    VerilatorRoot,
    Path,
}

impl fmt::Display for ToolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VerilatorRoot => write!(f, "VERILATOR_ROOT"),
            Self::Path => write!(f, "PATH"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tool {
    pub path: PathBuf,
    pub source: ToolSource,
}

pub fn find_tool(name: &str, verilator_root: Option<&Path>) -> Option<Tool> {
    if let Some(root) = verilator_root {
        let candidate = root.join("bin").join(name);
        if candidate.is_file() {
            debug!(tool = name, path = %candidate.display(), "found tool in VERILATOR_ROOT");
            return Some(Tool {
                path: candidate,
                source: ToolSource::VerilatorRoot,
            });
        }
    }
    let path = which::which(name).ok()?;
    debug!(tool = name, path = %path.display(), "found tool on PATH");
    Some(Tool {
        path,
        source: ToolSource::Path,
    })
}

pub fn require_tool(name: &str, verilator_root: Option<&Path>) -> Result<Tool> {
    match find_tool(name, verilator_root) {
        Some(tool) => Ok(tool),
        None => match verilator_root {
            Some(root) => bail!(
                "Could not find {name} in {}/bin or PATH",
                root.display()
            ),
            None => bail!("Could not find {name} on PATH; set VERILATOR_ROOT or install it"),
        },
    }
}

/// Merge `inputs` with an external `verilator_coverage`.
pub fn merge_with_binary(
    tool: &Tool,
    inputs: &[PathBuf],
    write_dat: &Path,
    write_info: &Path,
) -> Result<()> {
    println!("  Using {} from {}", tool.path.display(), tool.source);
    let status = Command::new(&tool.path)
        .arg("--write")
        .arg(write_dat)
        .arg("--write-info")
        .arg(write_info)
        .args(inputs)
        .status()
        .with_context(|| format!("Failed to run {}", tool.path.display()))?;
    if !status.success() {
        bail!("{} failed with {status}", tool.path.display());
    }
    Ok(())
}

/// Render `info` as an HTML site under `out_dir` with genhtml.
pub fn generate_html(tool: &Tool, info: &Path, out_dir: &Path) -> Result<()> {
    let status = Command::new(&tool.path)
        .arg(info)
        .arg("--branch-coverage")
        .arg("--output-directory")
        .arg(out_dir)
        .status()
        .with_context(|| format!("Failed to run {}", tool.path.display()))?;
    if !status.success() {
        bail!("genhtml failed with {status}");
    }
    Ok(())
}
