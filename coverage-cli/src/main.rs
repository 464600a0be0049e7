//! verilator_coverage
//!
//! Merges coverage databases written by Verilator-built simulations and
//! turns them into annotated sources, lcov reports or a test ranking.

mod app;
mod launcher;

use std::env;
use std::ffi::OsString;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use coverage_engine::CoverageConfig;

fn exit(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX))
}

fn main() -> ExitCode {
    let raw: Vec<OsString> = env::args_os().skip(1).collect();

    if let Some(binary) = launcher::delegate_target() {
        app::init_tracing(None);
        return exit(launcher::run(&binary, &raw));
    }

    if raw.is_empty() {
        eprintln!("{}", app::Args::command().render_usage());
        eprintln!("%Error: no arguments given, try --help");
        return exit(app::USAGE_EXIT);
    }

    let args = app::Args::parse();
    app::init_tracing(args.log_level());

    match CoverageConfig::try_from(args) {
        Ok(config) => exit(app::execute(config)),
        Err(err) => {
            eprintln!("%Error: {err:#}");
            exit(app::USAGE_EXIT)
        }
    }
}
