//! # Coverage driver for Verilator CI
//!
//! Runs instrumented tests in parallel, collects the coverage databases
//! they write, and turns the merged result into lcov reports.
//!
//! ## Usage Examples
//!
//! ```bash
//! # Whole flow: clean, run, collect, report
//! code_coverage full --tests-file tests.txt -j 8 --format text
//!
//! # Or step by step:
//! code_coverage clean
//! code_coverage run --test "obj_dir/Vtop +verilator+coverage+file+%c" -j 4
//! code_coverage clone --source 'src/*.cpp' --source 'include/*.h'
//! code_coverage collect
//! code_coverage report --format html
//! ```
//!
//! ## Environment Variables
//!
//! - `VERILATOR_ROOT`: source tree root; also where `bin/verilator_coverage`
//!   is looked up first
//! - `VERILATOR_COVERAGE_FILE`: set for each test to its database path

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use coverage_engine::CoverageConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

mod clone;
mod runner;
mod summary;
mod toolchains;

use runner::Shard;
use summary::CoverageSummary;

pub const TOTAL_DAT: &str = "app_total.dat";
pub const TOTAL_INFO: &str = "app_total.info";
pub const DEFAULT_REMOVE: &[&str] = &["/usr/*", "*/test_regress/*"];

#[derive(Parser)]
#[command(name = "code_coverage")]
#[command(about = "Coverage driver for Verilator regressions")]
struct Cli {
    /// Source tree root; paths below it are reported relative to it
    #[arg(long, env = "VERILATOR_ROOT", global = true)]
    verilator_root: Option<PathBuf>,

    /// Directory holding per-test coverage databases
    #[arg(long, default_value = "obj_coverage", global = true)]
    coverage_dir: PathBuf,

    /// Directory for merged outputs and reports
    #[arg(long, default_value = "obj_coverage_report", global = true)]
    report_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Test command; `%c` is replaced by its coverage file path
    #[arg(long = "test", value_name = "CMD")]
    tests: Vec<String>,

    /// File with one test command per line
    #[arg(long, value_name = "FILE")]
    tests_file: Option<PathBuf>,

    /// Parallel test workers
    #[arg(short = 'j', long, default_value_t = 1)]
    jobs: usize,

    /// Only run tests whose command hashes to N modulo M
    #[arg(long, value_name = "N/M")]
    hashset: Option<Shard>,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove coverage databases and reports
    Clean,
    /// Run tests in parallel, one coverage file per test
    Run(RunArgs),
    /// Copy sources with lcov exclusion markers added
    Clone {
        /// Source glob, relative to the root
        #[arg(long = "source", value_name = "GLOB", required = true)]
        sources: Vec<String>,

        /// Destination directory
        #[arg(long, default_value = "obj_coverage_clone")]
        dest: PathBuf,

        /// Extra line exclusion regexp
        #[arg(long, value_name = "REGEX")]
        exclude_line: Vec<String>,

        /// Extra branch exclusion regexp
        #[arg(long, value_name = "REGEX")]
        exclude_branch: Vec<String>,
    },
    /// Merge coverage databases into app_total.dat and app_total.info
    Collect {
        /// Glob of files to drop from the .info output
        #[arg(long, value_name = "GLOB")]
        remove: Vec<String>,

        /// Merge with the verilator_coverage binary instead of in-process
        #[arg(long)]
        external: bool,
    },
    /// Generate coverage report
    Report {
        /// Output format (text, json, html)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Run full coverage workflow (clean, run, collect, report)
    Full {
        #[command(flatten)]
        run: RunArgs,

        /// Output format for final report
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

/// Where everything lives, resolved once from the command line.
#[derive(Debug, Clone)]
struct Layout {
    root: PathBuf,
    coverage_dir: PathBuf,
    report_dir: PathBuf,
}

impl From<&Cli> for Layout {
    fn from(cli: &Cli) -> Self {
        let root = cli
            .verilator_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            root,
            coverage_dir: cli.coverage_dir.clone(),
            report_dir: cli.report_dir.clone(),
        }
    }
}

impl Layout {
    fn total_dat(&self) -> PathBuf {
        self.report_dir.join(TOTAL_DAT)
    }

    fn total_info(&self) -> PathBuf {
        self.report_dir.join(TOTAL_INFO)
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let layout = Layout::from(&cli);

    match cli.command {
        Commands::Clean => clean_coverage(&layout),
        Commands::Run(args) => run_tests(&layout, &args),
        Commands::Clone {
            sources,
            dest,
            exclude_line,
            exclude_branch,
        } => clone_sources(&layout, &sources, &dest, &exclude_line, &exclude_branch),
        Commands::Collect { remove, external } => collect_coverage(&layout, &remove, external),
        Commands::Report { format } => generate_report(&layout, &format),
        Commands::Full { run, format } => {
            let start = Instant::now();

            println!("[TIMING] Starting full coverage workflow");

            let clean_start = Instant::now();
            clean_coverage(&layout)?;
            println!(
                "[TIMING] Clean completed in {:.2}s",
                clean_start.elapsed().as_secs_f32()
            );

            let test_start = Instant::now();
            run_tests(&layout, &run)?;
            println!(
                "[TIMING] Tests with coverage completed in {:.2}s",
                test_start.elapsed().as_secs_f32()
            );

            let collect_start = Instant::now();
            collect_coverage(&layout, &[], false)?;
            println!(
                "[TIMING] Coverage collection completed in {:.2}s",
                collect_start.elapsed().as_secs_f32()
            );

            let report_start = Instant::now();
            generate_report(&layout, &format)?;
            println!(
                "[TIMING] Report generation completed in {:.2}s",
                report_start.elapsed().as_secs_f32()
            );

            println!(
                "[TIMING] Total full coverage workflow: {:.2}s",
                start.elapsed().as_secs_f32()
            );

            Ok(())
        }
    }
}

fn clean_coverage(layout: &Layout) -> Result<()> {
    println!("Cleaning coverage data...");

    for dir in [&layout.coverage_dir, &layout.report_dir] {
        if dir.exists() {
            fs::remove_dir_all(dir)
                .with_context(|| format!("Failed to remove {}", dir.display()))?;
        }
    }
    fs::create_dir_all(&layout.coverage_dir).context("Failed to create coverage directory")?;

    println!("Coverage data cleaned.");
    Ok(())
}

fn run_tests(layout: &Layout, args: &RunArgs) -> Result<()> {
    let mut commands = args.tests.clone();
    if let Some(path) = &args.tests_file {
        commands.extend(runner::read_tests_file(path)?);
    }
    if commands.is_empty() {
        bail!("No tests given; use --test or --tests-file");
    }

    fs::create_dir_all(&layout.coverage_dir).context("Failed to create coverage directory")?;
    let jobs = runner::plan(&commands, &layout.coverage_dir, args.hashset)?;
    println!(
        "Running {} of {} tests with {} workers...",
        jobs.len(),
        commands.len(),
        args.jobs
    );

    let results = runner::run_jobs(&jobs, args.jobs);
    let failed: Vec<&str> = results
        .iter()
        .filter(|result| !result.passed())
        .map(|result| result.job.command.as_str())
        .collect();
    if !failed.is_empty() {
        bail!("{} tests failed:\n  {}", failed.len(), failed.join("\n  "));
    }

    println!("Tests completed.");
    Ok(())
}

fn clone_sources(
    layout: &Layout,
    sources: &[String],
    dest: &Path,
    exclude_line: &[String],
    exclude_branch: &[String],
) -> Result<()> {
    println!("Cloning sources into {}...", dest.display());
    let policy = clone::default_policy()?
        .with_line_regexps(exclude_line)?
        .with_branch_regexps(exclude_branch)?;
    let report = clone::clone_sources(&policy, sources, &layout.root, dest)?;
    println!(
        "  Cloned {} files; auto-excluded {} lines and {} branch lines",
        report.files.len(),
        report.stats.excluded_lines,
        report.stats.excluded_branch_lines
    );
    Ok(())
}

fn find_databases(coverage_dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(coverage_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            let path = e.path();
            path.is_file()
                && path.extension().map_or(false, |ext| ext == "dat")
                && path.file_name().map_or(true, |name| name != TOTAL_DAT)
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    found.sort();
    found
}

fn collect_coverage(layout: &Layout, remove: &[String], external: bool) -> Result<()> {
    println!("Collecting coverage data...");

    fs::create_dir_all(&layout.report_dir).context("Failed to create report directory")?;
    let inputs = find_databases(&layout.coverage_dir);
    if inputs.is_empty() {
        println!("  No coverage data found. Make sure tests were run with coverage enabled.");
        return Ok(());
    }
    println!("  Found {} coverage files", inputs.len());

    if external {
        let tool = toolchains::require_tool(
            toolchains::VERILATOR_COVERAGE,
            Some(layout.root.as_path()),
        )?;
        toolchains::merge_with_binary(&tool, &inputs, &layout.total_dat(), &layout.total_info())?;
    } else {
        let mut info_remove: Vec<String> = DEFAULT_REMOVE.iter().map(|s| s.to_string()).collect();
        info_remove.extend(remove.iter().cloned());
        let config = CoverageConfig {
            inputs,
            write_dat: Some(layout.total_dat()),
            write_info: Some(layout.total_info()),
            root: Some(layout.root.clone()),
            info_remove,
            ..CoverageConfig::default()
        };
        let outcome = coverage_engine::run(&config)?;
        eprint!("{}", outcome.diagnostics.render());
        info!(points = outcome.report.len(), "collected coverage");
        if outcome.severity() >= coverage_engine::Severity::Error {
            bail!("Coverage collection reported errors");
        }
    }

    println!("  Merged coverage saved to: {}", layout.total_dat().display());
    println!("  LCOV data saved to: {}", layout.total_info().display());
    Ok(())
}

fn generate_report(layout: &Layout, format: &str) -> Result<()> {
    println!("Generating {} coverage report...", format);

    let info = layout.total_info();
    if !info.exists() {
        println!("No LCOV data found at {}", info.display());
        println!("Run 'code_coverage collect' first to generate coverage data");
        return Ok(());
    }

    match format {
        "text" => {
            print!("{}", CoverageSummary::read(&info)?.render_text());
        }
        "json" => {
            let summary = CoverageSummary::read(&info)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        "html" => {
            let tool = toolchains::require_tool(toolchains::GENHTML, Some(layout.root.as_path()))?;
            let html_dir = layout.report_dir.join("html");
            toolchains::generate_html(&tool, &info, &html_dir)?;
            println!("HTML report saved to: {}/index.html", html_dir.display());
        }
        _ => {
            bail!("Unsupported format: {}", format);
        }
    }

    Ok(())
}
