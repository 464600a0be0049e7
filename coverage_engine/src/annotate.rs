//! Source annotation with per-line coverage counts
//!
//! Each source line gets an eight character prefix:
//!
//! ```text
//!         no coverage point on this line
//!  000042 every point reached the threshold
//! ~000042 some points on the line reached it, some did not
//! %000000 no point reached it
//! ```
//!
//! Lines holding several points are followed by one `+`/`-` entry per
//! point so each count is visible on its own.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{CoverageError, Result};
use crate::exclude::ExclusionPolicy;
use crate::mapper::SourceMap;
use crate::merge::MergedReport;
use crate::point::CoveragePoint;

pub const DEFAULT_ANNOTATE_MIN: u64 = 10;

#[derive(Debug, Clone)]
pub struct AnnotateOptions {
    /// Count a point needs to be considered covered, unless it has `thresh`.
    pub min_count: u64,
    /// Write every file, not just those with uncovered lines.
    pub all_files: bool,
    /// List points under single-point lines too.
    pub show_points: bool,
    /// Only points whose type matches take part.
    pub filter_type: Option<Regex>,
    pub exclusions: ExclusionPolicy,
}

impl Default for AnnotateOptions {
    fn default() -> Self {
        Self {
            min_count: DEFAULT_ANNOTATE_MIN,
            all_files: false,
            show_points: false,
            filter_type: None,
            exclusions: ExclusionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMarker {
    NoPoint,
    Covered,
    Partial,
    Uncovered,
    Excluded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinePoint {
    pub count: u64,
    pub ok: bool,
    pub point_type: String,
    pub comment: String,
    pub hier: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedSourceLine {
    pub lineno: u32,
    pub text: String,
    pub marker: LineMarker,
    pub points: Vec<LinePoint>,
}

impl AnnotatedSourceLine {
    pub fn max_count(&self) -> Option<u64> {
        self.points.iter().map(|p| p.count).max()
    }

    pub fn is_uncovered(&self) -> bool {
        matches!(self.marker, LineMarker::Uncovered | LineMarker::Partial)
    }

    pub fn prefix(&self) -> String {
        let flag = match self.marker {
            LineMarker::NoPoint => return " ".repeat(8),
            LineMarker::Covered | LineMarker::Excluded => ' ',
            LineMarker::Partial => '~',
            LineMarker::Uncovered => '%',
        };
        format!("{flag}{:06} ", self.max_count().unwrap_or(0))
    }
}

/// Points of one file, grouped by the lines they cover.
pub type LinePoints<'a> = BTreeMap<u32, Vec<&'a CoveragePoint>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotateSummary {
    pub points_total: usize,
    pub points_covered: usize,
    pub files_written: Vec<PathBuf>,
}

impl AnnotateSummary {
    pub fn percent(&self) -> f64 {
        if self.points_total == 0 {
            return 100.0;
        }
        self.points_covered as f64 * 100.0 / self.points_total as f64
    }

    pub fn render(&self, dir: &Path) -> String {
        format!(
            "Total coverage ({}/{}) {:.2}%\nSee lines with '%00' in {}\n",
            self.points_covered,
            self.points_total,
            self.percent(),
            dir.display()
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct Annotator {
    options: AnnotateOptions,
}

impl Annotator {
    pub fn new(options: AnnotateOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &AnnotateOptions {
        &self.options
    }

    pub fn accepts(&self, point: &CoveragePoint) -> bool {
        self.options
            .filter_type
            .as_ref()
            .map_or(true, |filter| filter.is_match(point.point_type()))
    }

    /// A zero count is never enough, whatever the threshold says.
    pub fn threshold(&self, point: &CoveragePoint) -> u64 {
        point.thresh().unwrap_or(self.options.min_count).max(1)
    }

    pub fn is_ok(&self, point: &CoveragePoint) -> bool {
        point.count() >= self.threshold(point)
    }

    /// Accepted points by recorded file name, attached to their own line
    /// and to every extra line they list.
    pub fn points_by_file<'a>(&self, report: &'a MergedReport) -> BTreeMap<&'a str, LinePoints<'a>> {
        let mut files: BTreeMap<&str, LinePoints> = BTreeMap::new();
        for point in report.points().filter(|p| self.accepts(p)) {
            let lineno = point.lineno();
            if point.filename().is_empty() || lineno == 0 {
                continue;
            }
            let lines = files.entry(point.filename()).or_default();
            let mut covered = vec![lineno];
            covered.extend(point.lines_covered());
            covered.sort_unstable();
            covered.dedup();
            for line in covered {
                lines.entry(line).or_default().push(point);
            }
        }
        for lines in files.values_mut() {
            for points in lines.values_mut() {
                points.sort_by(|a, b| {
                    (a.column(), a.comment(), a.hier()).cmp(&(b.column(), b.comment(), b.hier()))
                });
            }
        }
        files
    }

    pub fn annotate_source(&self, text: &str, points: &LinePoints) -> Vec<AnnotatedSourceLine> {
        let excluded = self.options.exclusions.excluded_lines(text);
        text.lines()
            .enumerate()
            .map(|(idx, line)| {
                let lineno = idx as u32 + 1;
                let line_points: Vec<LinePoint> = points
                    .get(&lineno)
                    .map(|found| {
                        found
                            .iter()
                            .map(|p| LinePoint {
                                count: p.count(),
                                ok: self.is_ok(p),
                                point_type: p.point_type().to_string(),
                                comment: p.comment().to_string(),
                                hier: p.hier().to_string(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                let ok = line_points.iter().filter(|p| p.ok).count();
                let marker = if line_points.is_empty() {
                    LineMarker::NoPoint
                } else if excluded.get(idx).copied().unwrap_or(false) {
                    LineMarker::Excluded
                } else if ok == line_points.len() {
                    LineMarker::Covered
                } else if ok > 0 {
                    LineMarker::Partial
                } else {
                    LineMarker::Uncovered
                };

                AnnotatedSourceLine {
                    lineno,
                    text: line.to_string(),
                    marker,
                    points: line_points,
                }
            })
            .collect()
    }

    pub fn render(&self, lines: &[AnnotatedSourceLine]) -> String {
        let mut out = String::new();
        for line in lines {
            out.push_str(&line.prefix());
            out.push_str(&line.text);
            out.push('\n');
            if line.points.len() > 1 || (self.options.show_points && !line.points.is_empty()) {
                for point in &line.points {
                    out.push_str(&format!(
                        "{}{:06}  point: type={} comment={} hier={}\n",
                        if point.ok { '+' } else { '-' },
                        point.count,
                        point.point_type,
                        point.comment,
                        point.hier
                    ));
                }
            }
        }
        out
    }

    /// Coverage totals over every accepted point in the report.
    pub fn summarize(&self, report: &MergedReport) -> AnnotateSummary {
        let mut summary = AnnotateSummary::default();
        for point in report.points().filter(|p| self.accepts(p)) {
            summary.points_total += 1;
            if self.is_ok(point) {
                summary.points_covered += 1;
            }
        }
        summary
    }

    /// Write annotated copies of the mapped sources into `dir`.
    ///
    /// Unreadable sources are reported and skipped. Unmapped sources were
    /// already reported by the mapper and are skipped silently.
    pub fn write_annotations(
        &self,
        report: &MergedReport,
        map: &SourceMap,
        dir: &Path,
    ) -> Result<(AnnotateSummary, Vec<CoverageError>)> {
        fs::create_dir_all(dir).map_err(|err| CoverageError::io(dir, err))?;

        let mut summary = self.summarize(report);
        let mut errors = Vec::new();
        let mut taken: HashSet<PathBuf> = HashSet::new();

        for (recorded, lines) in self.points_by_file(report) {
            let Some(source) = map.get(recorded) else {
                continue;
            };
            let Some(resolved) = source.resolved.as_ref() else {
                continue;
            };
            let text = match fs::read_to_string(resolved) {
                Ok(text) => text,
                Err(err) => {
                    errors.push(CoverageError::io(resolved, err));
                    continue;
                }
            };

            let annotated = self.annotate_source(&text, &lines);
            if !self.options.all_files && !annotated.iter().any(AnnotatedSourceLine::is_uncovered) {
                debug!(file = %source.display, "fully covered, not annotated");
                continue;
            }

            let out_path = dir.join(output_name(&source.display, &mut taken));
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent).map_err(|err| CoverageError::io(parent, err))?;
            }
            fs::write(&out_path, self.render(&annotated))
                .map_err(|err| CoverageError::io(&out_path, err))?;
            debug!(path = %out_path.display(), "wrote annotated source");
            summary.files_written.push(out_path);
        }

        info!(
            files = summary.files_written.len(),
            covered = summary.points_covered,
            total = summary.points_total,
            "annotation complete"
        );
        Ok((summary, errors))
    }
}

/// Name of an annotated copy inside the output directory: the basename,
/// or the cleaned relative path once that basename is already used.
fn output_name(display: &str, taken: &mut HashSet<PathBuf>) -> PathBuf {
    let display = Path::new(display);
    let base = display
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| display.to_path_buf());
    let name = if taken.contains(&base) {
        let relative: PathBuf = display
            .components()
            .filter(|part| matches!(part, Component::Normal(_)))
            .collect();
        let shown = display.display();
        if taken.contains(&relative) {
            warn!(file = %shown, "annotated copy overwrites an earlier one");
        } else {
            warn!(
                file = %shown,
                "annotated basename already used, keeping relative path"
            );
        }
        relative
    } else {
        base
    };
    taken.insert(name.clone());
    name
}
