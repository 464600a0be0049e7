use std::env;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use coverage_engine::annotate::DEFAULT_ANNOTATE_MIN;
use coverage_engine::rank::format_rank_table;
use coverage_engine::{CoverageConfig, CoverageError};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Exit code for command-line mistakes, matching clap's own.
pub const USAGE_EXIT: i32 = 2;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "verilator_coverage",
    author,
    version,
    about = "Merge, annotate, export and rank Verilator coverage databases",
    long_about = None
)]
pub struct Args {
    /// Write annotated copies of the covered sources into this directory
    #[arg(long, value_name = "DIR")]
    pub annotate: Option<PathBuf>,

    /// Annotate every source, not only those with uncovered lines
    #[arg(long)]
    pub annotate_all: bool,

    /// Count below which a point is reported as uncovered
    #[arg(long, value_name = "COUNT", default_value_t = DEFAULT_ANNOTATE_MIN)]
    pub annotate_min: u64,

    /// List every point under its annotated line
    #[arg(long)]
    pub annotate_points: bool,

    /// Only consider points whose type matches this regex
    #[arg(long, value_name = "REGEX")]
    pub filter_type: Option<String>,

    /// Rank tests by the coverage they add
    #[arg(long)]
    pub rank: bool,

    /// Delete the input files once the merged output is written
    #[arg(long)]
    pub unlink: bool,

    /// Write the merged coverage database
    #[arg(long, value_name = "FILE")]
    pub write: Option<PathBuf>,

    /// Write the merged coverage as an lcov .info file
    #[arg(long, value_name = "FILE")]
    pub write_info: Option<PathBuf>,

    /// Directory stripped from source paths (defaults to the current directory)
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Enable debug logging at the given level
    #[arg(long, value_name = "LEVEL")]
    pub debugi: Option<u8>,

    /// Define a preprocessor symbol
    #[arg(short = 'D', value_name = "VAR[=VALUE]")]
    pub define: Vec<String>,

    /// Add a source search directory
    #[arg(short = 'I', value_name = "DIR")]
    pub incdir: Vec<PathBuf>,

    /// Add a library search directory
    #[arg(short = 'y', value_name = "DIR")]
    pub libdir: Vec<PathBuf>,

    /// Coverage files to read, mixed with +libext+, +define+ and +incdir+ options
    #[arg(value_name = "FILE")]
    pub inputs: Vec<String>,
}

impl Args {
    /// Log level implied by `--debug`/`--debugi`, if raised.
    pub fn log_level(&self) -> Option<&'static str> {
        match self.debugi {
            Some(level) if level >= 9 => Some("trace"),
            Some(level) if level > 0 => Some("debug"),
            _ if self.debug => Some("debug"),
            _ => None,
        }
    }
}

impl TryFrom<Args> for CoverageConfig {
    type Error = anyhow::Error;

    fn try_from(value: Args) -> Result<Self> {
        let mut config = CoverageConfig {
            annotate_dir: value.annotate,
            annotate_all: value.annotate_all,
            annotate_min: value.annotate_min,
            annotate_points: value.annotate_points,
            filter_type: value.filter_type,
            rank: value.rank,
            unlink: value.unlink,
            write_dat: value.write,
            write_info: value.write_info,
            root: value.root.or_else(|| env::current_dir().ok()),
            search_paths: value.incdir,
            ..CoverageConfig::default()
        };
        config.search_paths.extend(value.libdir);
        for define in &value.define {
            add_define(&mut config, define);
        }
        for arg in value.inputs {
            if arg.starts_with('+') {
                apply_plusarg(&mut config, &arg)?;
            } else {
                config.inputs.push(PathBuf::from(arg));
            }
        }
        Ok(config)
    }
}

fn add_define(config: &mut CoverageConfig, define: &str) {
    let (name, value) = define.split_once('=').unwrap_or((define, ""));
    config.defines.insert(name.to_string(), value.to_string());
}

/// `+libext+v+sv`, `+define+A=1+B`, `+incdir+dir1+dir2`
fn apply_plusarg(config: &mut CoverageConfig, arg: &str) -> Result<()> {
    let mut parts = arg.trim_start_matches('+').split('+');
    let option = parts.next().unwrap_or_default();
    let values = parts.filter(|part| !part.is_empty());
    match option {
        "libext" => config.libext.extend(values.map(str::to_string)),
        "incdir" => config.search_paths.extend(values.map(PathBuf::from)),
        "define" => {
            for define in values {
                add_define(config, define);
            }
        }
        _ => bail!("Invalid option: {arg}"),
    }
    Ok(())
}

pub fn init_tracing(level: Option<&str>) {
    let env_filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Run one invocation and return its exit code. Reports go to stdout,
/// diagnostics to stderr.
pub fn execute(config: CoverageConfig) -> i32 {
    debug!(?config, "coverage configuration");
    let outcome = match coverage_engine::run(&config) {
        Ok(outcome) => outcome,
        Err(err @ CoverageError::InvalidPattern { .. }) => {
            eprintln!("%Error: {err}");
            return USAGE_EXIT;
        }
        Err(err) => {
            eprintln!("%Error: {err}");
            return err.severity().exit_code();
        }
    };

    if let (Some(summary), Some(dir)) = (&outcome.annotation, &config.annotate_dir) {
        print!("{}", summary.render(dir));
    }
    if let Some(ranking) = &outcome.ranking {
        print!("{}", format_rank_table(ranking));
    }
    for path in &outcome.unlinked {
        info!(path = %path.display(), "removed input");
    }

    eprint!("{}", outcome.diagnostics.render());
    outcome.severity().exit_code()
}
