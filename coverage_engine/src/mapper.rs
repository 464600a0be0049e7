//! Resolve the file names recorded in coverage points to real sources

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::CoverageError;
use crate::merge::MergedReport;

static KNOWN_TREE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/.*?/(include|src|test_regress)/").expect("static regex is valid")
});

/// Make a recorded path relative to `root`, or to a recognised source tree.
///
/// `<root>/src/V3Ast.cpp` => `src/V3Ast.cpp`, `/build/x/include/v.h` =>
/// `include/v.h`. Other absolute paths, and everything under `/usr/`,
/// come back unchanged.
pub fn clean_path(path: &str, root: Option<&Path>) -> String {
    if let Some(root) = root {
        let root = root.to_string_lossy();
        let root = root.trim_end_matches('/');
        if !root.is_empty() {
            if let Some(rest) = path.strip_prefix(root).and_then(|r| r.strip_prefix('/')) {
                return rest.to_string();
            }
        }
    }
    if path.starts_with("/usr/") {
        return path.to_string();
    }
    if let Some(caps) = KNOWN_TREE.captures(path) {
        let whole = caps.get(0).map_or(0, |m| m.end());
        let tree = &caps[1];
        return format!("{tree}/{}", &path[whole..]);
    }
    path.to_string()
}

#[derive(Debug, Clone, Default)]
pub struct MapperOptions {
    /// Directory paths are cleaned against and relative names resolved in.
    pub root: Option<PathBuf>,
    /// `-y`, `+incdir+` and `-I` directories, searched in order.
    pub search_paths: Vec<PathBuf>,
    /// Extensions from `+libext+`, tried when the plain name is missing.
    pub libext: Vec<String>,
}

/// Where one recorded file name ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedSource {
    /// Cleaned, root-relative name used in reports.
    pub display: String,
    /// Location on disk, `None` when it could not be found.
    pub resolved: Option<PathBuf>,
}

impl MappedSource {
    pub fn is_mapped(&self) -> bool {
        self.resolved.is_some()
    }
}

/// Recorded file name => mapping, for every file a report mentions.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    files: BTreeMap<String, MappedSource>,
}

impl SourceMap {
    pub fn get(&self, recorded: &str) -> Option<&MappedSource> {
        self.files.get(recorded)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MappedSource)> {
        self.files.iter().map(|(name, source)| (name.as_str(), source))
    }

    pub fn unmapped(&self) -> impl Iterator<Item = &str> {
        self.files
            .iter()
            .filter(|(_, source)| !source.is_mapped())
            .map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceMapper {
    options: MapperOptions,
}

impl SourceMapper {
    pub fn new(options: MapperOptions) -> Self {
        Self { options }
    }

    pub fn root(&self) -> Option<&Path> {
        self.options.root.as_deref()
    }

    /// Map every file the report mentions. Missing files stay in the map
    /// flagged unmapped, each with a `PathResolution` diagnostic.
    pub fn map(&self, report: &MergedReport) -> (SourceMap, Vec<CoverageError>) {
        let mut map = SourceMap::default();
        let mut errors = Vec::new();

        for point in report.points() {
            let recorded = point.filename();
            if recorded.is_empty() || map.files.contains_key(recorded) {
                continue;
            }
            let mapped = self.map_file(recorded);
            if !mapped.is_mapped() {
                warn!(file = recorded, "coverage source file not found");
                errors.push(CoverageError::PathResolution {
                    path: PathBuf::from(recorded),
                });
            }
            map.files.insert(recorded.to_string(), mapped);
        }

        debug!(
            files = map.len(),
            unmapped = errors.len(),
            "mapped coverage sources"
        );
        (map, errors)
    }

    pub fn map_file(&self, recorded: &str) -> MappedSource {
        let display = clean_path(recorded, self.root());
        let resolved = self
            .candidates(recorded, &display)
            .into_iter()
            .find(|candidate| candidate.is_file())
            .map(|found| found.canonicalize().unwrap_or(found));
        MappedSource { display, resolved }
    }

    fn candidates(&self, recorded: &str, display: &str) -> Vec<PathBuf> {
        let mut bases: Vec<PathBuf> = vec![PathBuf::from(recorded)];
        let relative = Path::new(display);
        if relative.is_relative() {
            if let Some(root) = self.root() {
                bases.push(root.join(relative));
            }
            for dir in &self.options.search_paths {
                bases.push(dir.join(relative));
            }
        }

        let mut all = Vec::with_capacity(bases.len() * (1 + self.options.libext.len()));
        for base in bases {
            let stem = base.clone().into_os_string();
            all.push(base);
            for ext in &self.options.libext {
                let mut with_ext = stem.clone();
                with_ext.push(".");
                with_ext.push(ext.trim_start_matches('.'));
                all.push(PathBuf::from(with_ext));
            }
        }
        all
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use std::fs;

    use super::*;
    use crate::database::CoverageDatabase;
    use crate::point::CoveragePoint;

    fn report_for(files: &[&str]) -> MergedReport {
        let db: CoverageDatabase = files
            .iter()
            .map(|f| CoveragePoint::new([("f", *f), ("l", "1")], 1))
            .collect();
        MergedReport::from(db)
    }

    #[test]
    fn clean_path__under_root__then_root_relative() {
        let root = Path::new("/home/ci/verilator");
        assert_eq!(
            clean_path("/home/ci/verilator/src/V3Ast.cpp", Some(root)),
            "src/V3Ast.cpp"
        );
    }

    #[test]
    fn clean_path__root_with_trailing_slash__then_stripped() {
        assert_eq!(clean_path("/r/t.v", Some(Path::new("/r/"))), "t.v");
    }

    #[test]
    fn clean_path__foreign_checkout_known_tree__then_rewritten() {
        assert_eq!(
            clean_path("/other/build/include/verilated.cpp", None),
            "include/verilated.cpp"
        );
        assert_eq!(
            clean_path("/x/test_regress/t/t_a.v", None),
            "test_regress/t/t_a.v"
        );
    }

    #[test]
    fn clean_path__system_or_unknown_absolute__then_unchanged() {
        assert_eq!(clean_path("/usr/include/stdio.h", None), "/usr/include/stdio.h");
        assert_eq!(clean_path("/opt/ip/core.v", None), "/opt/ip/core.v");
        assert_eq!(clean_path("rtl/core.v", None), "rtl/core.v");
    }

    #[test]
    fn source_mapper__file_in_search_path__then_mapped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("t.v"), "module t;\nendmodule\n").unwrap();
        let mapper = SourceMapper::new(MapperOptions {
            search_paths: vec![dir.path().to_path_buf()],
            ..MapperOptions::default()
        });

        let (map, errors) = mapper.map(&report_for(&["t.v"]));
        assert!(errors.is_empty());
        let source = map.get("t.v").unwrap();
        assert!(source.is_mapped());
        assert!(source.resolved.as_ref().unwrap().is_absolute());
    }

    #[test]
    fn source_mapper__libext__then_extension_tried() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sub.sv"), "").unwrap();
        let mapper = SourceMapper::new(MapperOptions {
            root: Some(dir.path().to_path_buf()),
            libext: vec![".v".to_string(), ".sv".to_string()],
            ..MapperOptions::default()
        });
        assert!(mapper.map_file("sub").is_mapped());
    }

    #[test]
    fn source_mapper__missing_file__then_flagged_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.v"), "").unwrap();
        let mapper = SourceMapper::new(MapperOptions {
            root: Some(dir.path().to_path_buf()),
            ..MapperOptions::default()
        });

        let (map, errors) = mapper.map(&report_for(&["a.v", "gone.v"]));
        assert_eq!(map.len(), 2);
        assert_eq!(map.unmapped().collect::<Vec<_>>(), vec!["gone.v"]);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], CoverageError::PathResolution { .. }));
    }
}
