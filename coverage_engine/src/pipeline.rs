//! One `verilator_coverage` run: read, merge, map, annotate/export, rank
//!
//! All switches arrive in a [`CoverageConfig`]; nothing here reads the
//! environment or the command line.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::annotate::{AnnotateOptions, AnnotateSummary, Annotator, DEFAULT_ANNOTATE_MIN};
use crate::database::CoverageDatabase;
use crate::error::{CoverageError, Diagnostics, Result, Severity};
use crate::exclude::ExclusionPolicy;
use crate::lcov::{LcovExporter, LcovOptions};
use crate::mapper::{MapperOptions, SourceMapper};
use crate::merge::{Aggregator, MergedReport};
use crate::rank::{rank, RankEntry};

pub const DEFAULT_INPUT: &str = "coverage.dat";

#[derive(Debug, Clone)]
pub struct CoverageConfig {
    pub inputs: Vec<PathBuf>,
    pub annotate_dir: Option<PathBuf>,
    pub annotate_all: bool,
    pub annotate_min: u64,
    pub annotate_points: bool,
    pub filter_type: Option<String>,
    pub rank: bool,
    pub unlink: bool,
    pub write_dat: Option<PathBuf>,
    pub write_info: Option<PathBuf>,
    pub root: Option<PathBuf>,
    pub search_paths: Vec<PathBuf>,
    pub libext: Vec<String>,
    pub defines: BTreeMap<String, String>,
    /// Extra exclusion regexps applied when annotating.
    pub exclude_line_regexps: Vec<String>,
    /// Glob patterns of files dropped from the `.info` output.
    pub info_remove: Vec<String>,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            annotate_dir: None,
            annotate_all: false,
            annotate_min: DEFAULT_ANNOTATE_MIN,
            annotate_points: false,
            filter_type: None,
            rank: false,
            unlink: false,
            write_dat: None,
            write_info: None,
            root: None,
            search_paths: Vec::new(),
            libext: Vec::new(),
            defines: BTreeMap::new(),
            exclude_line_regexps: Vec::new(),
            info_remove: Vec::new(),
        }
    }
}

impl CoverageConfig {
    pub fn input_paths(&self) -> Vec<PathBuf> {
        if self.inputs.is_empty() {
            vec![PathBuf::from(DEFAULT_INPUT)]
        } else {
            self.inputs.clone()
        }
    }

    fn annotate_options(&self) -> Result<AnnotateOptions> {
        let filter_type = self
            .filter_type
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| CoverageError::invalid_pattern(pattern, err))
            })
            .transpose()?;
        Ok(AnnotateOptions {
            min_count: self.annotate_min,
            all_files: self.annotate_all,
            show_points: self.annotate_points,
            filter_type,
            exclusions: ExclusionPolicy::lcov_markers()
                .with_line_regexps(&self.exclude_line_regexps)?,
        })
    }

    fn lcov_options(&self) -> Result<LcovOptions> {
        LcovOptions {
            root: self.root.clone(),
            ..LcovOptions::default()
        }
        .with_remove_patterns(&self.info_remove)
    }

    fn mapper_options(&self) -> MapperOptions {
        MapperOptions {
            root: self.root.clone(),
            search_paths: self.search_paths.clone(),
            libext: self.libext.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct RunOutcome {
    pub report: MergedReport,
    pub diagnostics: Diagnostics,
    pub ranking: Option<Vec<RankEntry>>,
    pub annotation: Option<AnnotateSummary>,
    pub unlinked: Vec<PathBuf>,
}

impl RunOutcome {
    pub fn severity(&self) -> Severity {
        self.diagnostics.severity()
    }
}

/// Run the pipeline. Bad records, unreadable inputs and missing sources
/// are collected in the outcome's diagnostics; an `Err` means the
/// configuration itself was unusable.
pub fn run(config: &CoverageConfig) -> Result<RunOutcome> {
    let annotate_options = config.annotate_options()?;
    let lcov_options = config.lcov_options()?;
    for (name, value) in &config.defines {
        debug!(define = %name, value = %value, "define ignored for coverage");
    }

    let mut outcome = RunOutcome::default();
    let inputs = config.input_paths();

    let mut aggregator = Aggregator::new();
    let mut read_ok = Vec::new();
    for path in &inputs {
        match CoverageDatabase::read(path) {
            Ok(parsed) => {
                outcome.diagnostics.extend(parsed.errors);
                aggregator.add(parsed.database);
                read_ok.push(path.clone());
            }
            Err(err) => outcome.diagnostics.push(err),
        }
    }
    outcome.report = aggregator.finish();
    info!(
        inputs = inputs.len(),
        points = outcome.report.len(),
        "coverage merged"
    );

    let mut outputs_ok = true;

    if let Some(path) = &config.write_dat {
        if let Err(err) = outcome.report.write_dat(path) {
            outputs_ok = false;
            outcome.diagnostics.push(err);
        }
    }

    if let Some(path) = &config.write_info {
        if let Err(err) = LcovExporter::new(lcov_options).write(&outcome.report, path) {
            outputs_ok = false;
            outcome.diagnostics.push(err);
        }
    }

    if let Some(dir) = &config.annotate_dir {
        let (map, unmapped) = SourceMapper::new(config.mapper_options()).map(&outcome.report);
        outcome.diagnostics.extend(unmapped);
        match Annotator::new(annotate_options).write_annotations(&outcome.report, &map, dir) {
            Ok((summary, errors)) => {
                outcome.diagnostics.extend(errors);
                outcome.annotation = Some(summary);
            }
            Err(err) => {
                outputs_ok = false;
                outcome.diagnostics.push(err);
            }
        }
    }

    if config.rank {
        match rank(&outcome.report) {
            Ok(entries) => outcome.ranking = Some(entries),
            Err(err) => outcome.diagnostics.push(err),
        }
    }

    if config.unlink {
        if config.write_dat.is_none() {
            warn!("--unlink needs --write; inputs kept");
        } else if !outputs_ok {
            warn!("outputs incomplete; inputs kept");
        } else {
            let outputs: Vec<PathBuf> = [&config.write_dat, &config.write_info]
                .into_iter()
                .flatten()
                .map(|path| canonical(path))
                .collect();
            for path in read_ok {
                if outputs.contains(&canonical(&path)) {
                    warn!(path = %path.display(), "input is also an output; not unlinked");
                    continue;
                }
                match fs::remove_file(&path) {
                    Ok(()) => outcome.unlinked.push(path),
                    Err(err) => outcome.diagnostics.push(CoverageError::io(&path, err)),
                }
            }
        }
    }

    Ok(outcome)
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
