//! Line exclusion policy
//!
//! An ordered list of matchers; the first one that matches a line decides
//! what happens to it. The built-in lcov markers always come first, user
//! regexps after them.

use regex::Regex;

use crate::error::{CoverageError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionKind {
    Line,
    Branch,
    RegionStart,
    RegionStop,
    BranchRegionStart,
    BranchRegionStop,
}

/// Who put the matcher on the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherOrigin {
    Marker,
    LineRegexp,
    BranchRegexp,
}

#[derive(Debug, Clone)]
enum Rule {
    Literal(&'static str),
    Pattern(Regex),
}

#[derive(Debug, Clone)]
pub struct Matcher {
    rule: Rule,
    kind: ExclusionKind,
    origin: MatcherOrigin,
}

impl Matcher {
    pub fn kind(&self) -> ExclusionKind {
        self.kind
    }

    pub fn origin(&self) -> MatcherOrigin {
        self.origin
    }

    pub fn is_match(&self, line: &str) -> bool {
        match &self.rule {
            Rule::Literal(marker) => line.contains(marker),
            Rule::Pattern(regex) => regex.is_match(line),
        }
    }
}

/// Lines auto-excluded while cloning sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloneStats {
    pub excluded_lines: usize,
    pub excluded_branch_lines: usize,
}

#[derive(Debug, Clone)]
pub struct ExclusionPolicy {
    matchers: Vec<Matcher>,
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self::lcov_markers()
    }
}

impl ExclusionPolicy {
    /// Only the markers lcov itself understands.
    pub fn lcov_markers() -> Self {
        let markers = [
            ("LCOV_EXCL_LINE", ExclusionKind::Line),
            ("LCOV_EXCL_START", ExclusionKind::RegionStart),
            ("LCOV_EXCL_STOP", ExclusionKind::RegionStop),
            ("LCOV_EXCL_BR_LINE", ExclusionKind::Branch),
            ("LCOV_EXCL_BR_START", ExclusionKind::BranchRegionStart),
            ("LCOV_EXCL_BR_STOP", ExclusionKind::BranchRegionStop),
        ];
        let matchers = markers
            .into_iter()
            .map(|(marker, kind)| Matcher {
                rule: Rule::Literal(marker),
                kind,
                origin: MatcherOrigin::Marker,
            })
            .collect();
        Self { matchers }
    }

    pub fn with_line_regexps<S: AsRef<str>>(self, patterns: &[S]) -> Result<Self> {
        self.with_regexps(patterns, ExclusionKind::Line, MatcherOrigin::LineRegexp)
    }

    pub fn with_branch_regexps<S: AsRef<str>>(self, patterns: &[S]) -> Result<Self> {
        self.with_regexps(patterns, ExclusionKind::Branch, MatcherOrigin::BranchRegexp)
    }

    fn with_regexps<S: AsRef<str>>(
        mut self,
        patterns: &[S],
        kind: ExclusionKind,
        origin: MatcherOrigin,
    ) -> Result<Self> {
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let regex =
                Regex::new(pattern).map_err(|err| CoverageError::invalid_pattern(pattern, err))?;
            self.matchers.push(Matcher {
                rule: Rule::Pattern(regex),
                kind,
                origin,
            });
        }
        Ok(self)
    }

    /// First matcher that fires on `line`.
    pub fn classify(&self, line: &str) -> Option<&Matcher> {
        self.matchers.iter().find(|matcher| matcher.is_match(line))
    }

    /// Per line of `text`: whether it is excluded, either directly or by
    /// lying inside a `START`/`STOP` region. Branch markers only drop
    /// branch data and leave the line itself counted.
    pub fn excluded_lines(&self, text: &str) -> Vec<bool> {
        let mut in_region = false;
        text.lines()
            .map(|line| match self.classify(line).map(Matcher::kind) {
                Some(ExclusionKind::RegionStart) => {
                    in_region = true;
                    true
                }
                Some(ExclusionKind::RegionStop) => {
                    in_region = false;
                    true
                }
                Some(ExclusionKind::Line) => true,
                Some(
                    ExclusionKind::Branch
                    | ExclusionKind::BranchRegionStart
                    | ExclusionKind::BranchRegionStop,
                )
                | None => in_region,
            })
            .collect()
    }

    /// Rewrite one source line for a coverage clone, appending the marker
    /// lcov needs so branch data follows line exclusions.
    pub fn clone_line(&self, line: &str, stats: &mut CloneStats) -> String {
        let Some(matcher) = self.classify(line) else {
            return line.to_string();
        };
        let suffix = match (matcher.origin, matcher.kind) {
            (MatcherOrigin::Marker, ExclusionKind::Line) => "  LCOV_EXCL_BR_LINE",
            (MatcherOrigin::Marker, ExclusionKind::RegionStart) => "  LCOV_EXCL_BR_START",
            (MatcherOrigin::Marker, ExclusionKind::RegionStop) => "  LCOV_EXCL_BR_STOP",
            (MatcherOrigin::Marker, _) => "",
            (MatcherOrigin::LineRegexp, _) => {
                stats.excluded_lines += 1;
                "  //code_coverage: // LCOV_EXCL_LINE"
            }
            (MatcherOrigin::BranchRegexp, _) => {
                stats.excluded_branch_lines += 1;
                "  LCOV_EXCL_BR_LINE"
            }
        };
        format!("{line}{suffix}")
    }
}
