//! Source clones with lcov exclusion markers added
//!
//! lcov only honours markers it can see in the source, so sources are
//! copied and lines matching the exclusion regexps get a marker appended.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use coverage_engine::exclude::{CloneStats, ExclusionPolicy};
use tracing::debug;

pub const DEFAULT_EXCLUDE_LINES: &[&str] = &[
    r"\bv3fatalSrc\b",
    r"\bfatalSrc\b",
    r"\bVL_UNCOVERABLE\b",
    r"\bVL_UNREACHABLE\b",
    r"\bVL_FATAL",
    r"\bUASSERT",
    r"\bNUM_ASSERT",
    r"\bERROR_RSVD_WORD",
    r"\bV3ERROR_NA",
    r"\bUINFO\b",
    r"\bVL_DEFINE_DEBUG_FUNCTIONS\b",
];

pub const DEFAULT_EXCLUDE_BRANCHES: &[&str] = &[
    r"\bdebug\(\)",
    r"\bassert\(",
    r"\bBROKEN_RTK\(",
    r"\bSELF_CHECK",
];

pub fn default_policy() -> Result<ExclusionPolicy> {
    Ok(ExclusionPolicy::lcov_markers()
        .with_line_regexps(DEFAULT_EXCLUDE_LINES)?
        .with_branch_regexps(DEFAULT_EXCLUDE_BRANCHES)?)
}

#[derive(Debug, Default)]
pub struct CloneReport {
    pub files: Vec<PathBuf>,
    pub stats: CloneStats,
}

/// Clone one file, returning where it was written.
pub fn clone_file(
    policy: &ExclusionPolicy,
    source: &Path,
    root: &Path,
    dest_dir: &Path,
    stats: &mut CloneStats,
) -> Result<PathBuf> {
    let relative = source
        .strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| source.file_name().map(PathBuf::from).unwrap_or_default());
    let dest = dest_dir.join(relative);

    let text = fs::read_to_string(source)
        .with_context(|| format!("Failed to read {}", source.display()))?;
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        out.push_str(&policy.clone_line(line, stats));
        out.push('\n');
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(&dest, out).with_context(|| format!("Failed to write {}", dest.display()))?;
    debug!(source = %source.display(), dest = %dest.display(), "cloned source");
    Ok(dest)
}

/// Clone every file matching `patterns` (globs relative to `root`).
pub fn clone_sources(
    policy: &ExclusionPolicy,
    patterns: &[String],
    root: &Path,
    dest_dir: &Path,
) -> Result<CloneReport> {
    let mut report = CloneReport::default();
    for pattern in patterns {
        let full = root.join(pattern);
        let full = full.to_string_lossy();
        let entries =
            glob::glob(&full).with_context(|| format!("Invalid source pattern {pattern}"))?;
        for entry in entries.flatten().filter(|path| path.is_file()) {
            let dest = clone_file(policy, &entry, root, dest_dir, &mut report.stats)?;
            report.files.push(dest);
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    #[test]
    fn default_policy__then_all_regexps_compile() {
        assert!(default_policy().is_ok());
    }

    #[test]
    fn clone_sources__nested_files__then_markers_appended_and_counted() {
        let root = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("src")).unwrap();
        fs::write(
            root.path().join("src/V3Foo.cpp"),
            "int x = 1;\nUASSERT(x, \"bad\");\nif (debug()) dump();\nfoo(); // LCOV_EXCL_LINE\n",
        )
        .unwrap();
        fs::write(root.path().join("src/notes.txt"), "UASSERT\n").unwrap();

        let policy = default_policy().unwrap();
        let report =
            clone_sources(&policy, &["src/*.cpp".to_string()], root.path(), dest.path()).unwrap();

        assert_eq!(report.files, vec![dest.path().join("src/V3Foo.cpp")]);
        assert_eq!(report.stats.excluded_lines, 1);
        assert_eq!(report.stats.excluded_branch_lines, 1);
        let cloned = fs::read_to_string(dest.path().join("src/V3Foo.cpp")).unwrap();
        let lines: Vec<&str> = cloned.lines().collect();
        assert_eq!(lines[0], "int x = 1;");
        assert_eq!(lines[1], "UASSERT(x, \"bad\");  //code_coverage: // LCOV_EXCL_LINE");
        assert_eq!(lines[2], "if (debug()) dump();  LCOV_EXCL_BR_LINE");
        assert_eq!(lines[3], "foo(); // LCOV_EXCL_LINE  LCOV_EXCL_BR_LINE");
    }
}
