//! lcov `.info` export
//!
//! One `SF:` record per source file, sorted by cleaned path:
//!
//! ```text
//! TN:verilator_coverage
//! SF:src/t.v
//! DA:10,8
//! end_of_record
//! ```
//!
//! Lines holding more than one point also get `BRDA:` entries and the
//! `BRF:`/`BRH:` totals.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use glob::Pattern;
use tracing::debug;

use crate::error::{CoverageError, Result};
use crate::mapper::clean_path;
use crate::merge::MergedReport;

pub const TEST_NAME: &str = "verilator_coverage";

#[derive(Debug, Clone)]
pub struct LcovOptions {
    /// Prefix stripped from every `SF:` path.
    pub root: Option<PathBuf>,
    /// Files matching any of these (before or after cleanup) are dropped.
    pub remove: Vec<Pattern>,
    /// Keep files under `/usr/`.
    pub keep_system: bool,
    pub test_name: String,
}

impl Default for LcovOptions {
    fn default() -> Self {
        Self {
            root: None,
            remove: Vec::new(),
            keep_system: true,
            test_name: TEST_NAME.to_string(),
        }
    }
}

impl LcovOptions {
    pub fn with_remove_patterns<S: AsRef<str>>(mut self, patterns: &[S]) -> Result<Self> {
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let compiled =
                Pattern::new(pattern).map_err(|err| CoverageError::invalid_pattern(pattern, err))?;
            self.remove.push(compiled);
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LcovExporter {
    options: LcovOptions,
}

impl LcovExporter {
    pub fn new(options: LcovOptions) -> Self {
        Self { options }
    }

    fn keeps(&self, recorded: &str, cleaned: &str) -> bool {
        if !self.options.keep_system && cleaned.starts_with("/usr/") {
            return false;
        }
        !self
            .options
            .remove
            .iter()
            .any(|pattern| pattern.matches(recorded) || pattern.matches(cleaned))
    }

    /// Cleaned path => line => counts of every point on that line.
    fn collect(&self, report: &MergedReport) -> BTreeMap<String, BTreeMap<u32, Vec<u64>>> {
        let root = self.options.root.as_deref();
        let mut files: BTreeMap<String, BTreeMap<u32, Vec<u64>>> = BTreeMap::new();
        for point in report.points() {
            let lineno = point.lineno();
            if point.filename().is_empty() || lineno == 0 {
                continue;
            }
            let cleaned = clean_path(point.filename(), root);
            if !self.keeps(point.filename(), &cleaned) {
                continue;
            }
            let lines = files.entry(cleaned).or_default();
            let mut covered = vec![lineno];
            covered.extend(point.lines_covered());
            covered.sort_unstable();
            covered.dedup();
            for line in covered {
                lines.entry(line).or_default().push(point.count());
            }
        }
        files
    }

    pub fn render(&self, report: &MergedReport) -> String {
        let mut out = String::new();
        out.push_str(&format!("TN:{}\n", self.options.test_name));

        for (path, lines) in self.collect(report) {
            out.push_str(&format!("SF:{path}\n"));
            let mut found = 0usize;
            let mut hit = 0usize;
            for (line, counts) in &lines {
                let max = counts.iter().copied().max().unwrap_or(0);
                out.push_str(&format!("DA:{line},{max}\n"));
                if counts.len() > 1 {
                    for (branch, count) in counts.iter().enumerate() {
                        out.push_str(&format!("BRDA:{line},0,{branch},{count}\n"));
                        found += 1;
                        if *count > 0 {
                            hit += 1;
                        }
                    }
                }
            }
            if found > 0 {
                out.push_str(&format!("BRF:{found}\nBRH:{hit}\n"));
            }
            out.push_str("end_of_record\n");
        }
        out
    }

    pub fn write(&self, report: &MergedReport, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| CoverageError::io(parent, err))?;
        }
        let text = self.render(report);
        fs::write(path, &text).map_err(|err| CoverageError::io(path, err))?;
        debug!(path = %path.display(), bytes = text.len(), "wrote lcov info");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use crate::database::CoverageDatabase;
    use crate::point::CoveragePoint;

    fn point(file: &str, line: u32, count: u64, comment: &str) -> CoveragePoint {
        CoveragePoint::new(
            [
                ("f", file.to_string()),
                ("l", line.to_string()),
                ("o", comment.to_string()),
            ],
            count,
        )
    }

    fn report(points: Vec<CoveragePoint>) -> MergedReport {
        MergedReport::from(points.into_iter().collect::<CoverageDatabase>())
    }

    #[test]
    fn render__single_point_file__then_minimal_record() {
        let text = LcovExporter::default().render(&report(vec![point("f.v", 10, 8, "")]));
        assert_eq!(text, "TN:verilator_coverage\nSF:f.v\nDA:10,8\nend_of_record\n");
    }

    #[test]
    fn render__files_and_lines__then_sorted() {
        let text = LcovExporter::default().render(&report(vec![
            point("z.v", 3, 1, ""),
            point("a.v", 9, 2, ""),
            point("a.v", 4, 0, ""),
        ]));
        let sf: Vec<&str> = text.lines().filter(|l| l.starts_with("SF:")).collect();
        assert_eq!(sf, vec!["SF:a.v", "SF:z.v"]);
        let da: Vec<&str> = text.lines().filter(|l| l.starts_with("DA:")).collect();
        assert_eq!(da, vec!["DA:4,0", "DA:9,2", "DA:3,1"]);
    }

    #[test]
    fn render__multi_point_line__then_branches_emitted() {
        let text = LcovExporter::default().render(&report(vec![
            point("f.v", 5, 3, "if"),
            point("f.v", 5, 0, "else"),
        ]));
        assert!(text.contains("DA:5,3\n"));
        assert!(text.contains("BRDA:5,0,0,3\n"));
        assert!(text.contains("BRDA:5,0,1,0\n"));
        assert!(text.contains("BRF:2\nBRH:1\n"));
    }

    #[test]
    fn render__root_prefixed_paths__then_root_stripped() {
        let exporter = LcovExporter::new(LcovOptions {
            root: Some(PathBuf::from("/work/verilator")),
            ..LcovOptions::default()
        });
        let text = exporter.render(&report(vec![
            point("/work/verilator/src/V3Ast.cpp", 1, 1, ""),
            point("/work/verilator/include/verilated.h", 2, 1, ""),
        ]));
        for line in text.lines().filter(|l| l.starts_with("SF:")) {
            assert!(!line.contains("/work/verilator"), "{line}");
        }
        assert!(text.contains("SF:src/V3Ast.cpp\n"));
    }

    #[test]
    fn render__remove_patterns_and_system__then_dropped() {
        let exporter = LcovExporter::new(
            LcovOptions {
                keep_system: false,
                ..LcovOptions::default()
            }
            .with_remove_patterns(&["*/test_regress/*"])
            .unwrap(),
        );
        let text = exporter.render(&report(vec![
            point("/usr/include/c++/vector", 1, 1, ""),
            point("/ci/test_regress/t/t_a.v", 1, 1, ""),
            point("src/keep.cpp", 1, 1, ""),
        ]));
        let sf: Vec<&str> = text.lines().filter(|l| l.starts_with("SF:")).collect();
        assert_eq!(sf, vec!["SF:src/keep.cpp"]);
    }

    #[test]
    fn with_remove_patterns__bad_glob__then_invalid_pattern() {
        let err = LcovOptions::default()
            .with_remove_patterns(&["[unclosed"])
            .unwrap_err();
        assert!(matches!(err, CoverageError::InvalidPattern { .. }));
    }

    #[test]
    fn write__then_file_contains_render() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/app.info");
        let report = report(vec![point("f.v", 1, 1, "")]);
        let exporter = LcovExporter::default();
        exporter.write(&report, &path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), exporter.render(&report));
    }
}
