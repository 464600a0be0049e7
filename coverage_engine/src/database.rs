//! Coverage database reader and writer
//!
//! File grammar (SystemC coverage, version 3):
//!
//! ```text
//! # SystemC::Coverage-3
//! C '\x01f\x02t.v\x01l\x0210\x01h\x02top.t' 42
//! ```
//!
//! Every record ends with a newline. A record that does not parse is
//! reported and skipped; the rest of the file is still loaded.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{CoverageError, Result};
use crate::point::{CoveragePoint, PointKey, FIELD_START, VALUE_START};

pub const DAT_HEADER: &str = "# SystemC::Coverage-3";

/// Points read from one coverage file (or built in memory).
#[derive(Debug, Clone, Default)]
pub struct CoverageDatabase {
    test_name: Option<String>,
    points: Vec<CoveragePoint>,
    index: HashMap<PointKey, usize>,
}

/// A parsed database plus the records that had to be skipped.
#[derive(Debug)]
pub struct ParseOutcome {
    pub database: CoverageDatabase,
    pub errors: Vec<CoverageError>,
}

impl CoverageDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Database attributed to a named test, used for ranking.
    pub fn for_test(name: impl Into<String>) -> Self {
        Self {
            test_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn test_name(&self) -> Option<&str> {
        self.test_name.as_deref()
    }

    pub fn set_test_name(&mut self, name: Option<String>) {
        self.test_name = name;
    }

    /// Read a coverage file. The test name is the file path.
    pub fn read(path: &Path) -> Result<ParseOutcome> {
        let bytes = fs::read(path).map_err(|err| CoverageError::io(path, err))?;
        let mut outcome = Self::parse_bytes(&bytes, path);
        outcome
            .database
            .set_test_name(Some(path.display().to_string()));
        debug!(
            path = %path.display(),
            points = outcome.database.len(),
            skipped = outcome.errors.len(),
            "read coverage file"
        );
        Ok(outcome)
    }

    /// Parse coverage text. `origin` only labels errors; no test name is set.
    pub fn parse_str(text: &str, origin: &Path) -> ParseOutcome {
        Self::parse_bytes(text.as_bytes(), origin)
    }

    /// Parse raw file contents. Each line is decoded on its own, so bytes
    /// cut mid-character only cost the record they belong to.
    pub fn parse_bytes(bytes: &[u8], origin: &Path) -> ParseOutcome {
        let mut database = Self::new();
        let mut errors = Vec::new();

        for (idx, raw) in bytes.split_inclusive(|&byte| byte == b'\n').enumerate() {
            let lineno = idx + 1;
            let Ok(raw) = std::str::from_utf8(raw) else {
                errors.push(CoverageError::format(
                    origin,
                    lineno,
                    "record is not valid UTF-8 (truncated file?)",
                ));
                continue;
            };
            let terminated = raw.ends_with('\n');
            let line = raw.trim_end_matches('\n').trim_end_matches('\r');

            if line.trim().is_empty() {
                continue;
            }
            if line.starts_with('#') {
                if !terminated {
                    errors.push(CoverageError::format(origin, lineno, "truncated header line"));
                }
                continue;
            }
            if !terminated {
                errors.push(CoverageError::format(
                    origin,
                    lineno,
                    "record not terminated by newline (truncated file?)",
                ));
                continue;
            }

            match parse_record(line) {
                Ok(point) => database.insert(point),
                Err(message) => errors.push(CoverageError::format(origin, lineno, message)),
            }
        }

        ParseOutcome { database, errors }
    }

    /// Add a point, folding it into an existing point with the same key.
    pub fn insert(&mut self, point: CoveragePoint) {
        match self.index.get(point.key()) {
            Some(&slot) => self.points[slot].absorb(&point),
            None => {
                self.index.insert(point.key().clone(), self.points.len());
                self.points.push(point);
            }
        }
    }

    pub fn get(&self, key: &PointKey) -> Option<&CoveragePoint> {
        self.index.get(key).map(|&slot| &self.points[slot])
    }

    /// Points in first-seen order.
    pub fn points(&self) -> impl Iterator<Item = &CoveragePoint> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn to_dat_string(&self) -> String {
        let mut out = String::with_capacity(self.points.len() * 64);
        out.push_str(DAT_HEADER);
        out.push('\n');
        for point in &self.points {
            out.push_str(&point.to_record());
            out.push('\n');
        }
        out
    }

    pub fn write_dat(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| CoverageError::io(parent, err))?;
        }
        fs::write(path, self.to_dat_string()).map_err(|err| CoverageError::io(path, err))
    }
}

/// Two databases are equal when they hold the same points with the same
/// counts and hierarchies; order and test name do not matter.
impl PartialEq for CoverageDatabase {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .points
                .iter()
                .all(|point| other.get(point.key()) == Some(point))
    }
}

impl Eq for CoverageDatabase {}

impl FromIterator<CoveragePoint> for CoverageDatabase {
    fn from_iter<I: IntoIterator<Item = CoveragePoint>>(iter: I) -> Self {
        let mut database = Self::new();
        for point in iter {
            database.insert(point);
        }
        database
    }
}

fn parse_record(line: &str) -> std::result::Result<CoveragePoint, String> {
    let body = line
        .strip_prefix("C '")
        .ok_or_else(|| format!("expected \"C '...' <count>\" record, got: {}", preview(line)))?;
    let close = body
        .rfind('\'')
        .ok_or_else(|| "unterminated quote in record".to_string())?;
    let (fields, rest) = (&body[..close], body[close + 1..].trim());

    let count = if rest.is_empty() {
        0
    } else {
        rest.parse::<u64>()
            .map_err(|_| format!("invalid count '{}'", preview(rest)))?
    };

    let Some(fields) = fields.strip_prefix(FIELD_START) else {
        return Err("record has no key/value fields".to_string());
    };

    let mut pairs = Vec::new();
    for field in fields.split(FIELD_START) {
        let (name, value) = field
            .split_once(VALUE_START)
            .ok_or_else(|| format!("field '{}' has no value separator", preview(field)))?;
        if name.is_empty() {
            return Err("field with empty key".to_string());
        }
        pairs.push((name.to_string(), value.to_string()));
    }

    Ok(CoveragePoint::new(pairs, count))
}

fn preview(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| if c.is_control() { '^' } else { c })
        .take(40)
        .collect();
    cleaned
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    fn rec(fields: &[(&str, &str)], count: &str) -> String {
        let mut body = String::new();
        for (k, v) in fields {
            body.push('\x01');
            body.push_str(k);
            body.push('\x02');
            body.push_str(v);
        }
        format!("C '{body}' {count}\n")
    }

    #[test]
    fn parse_str__header_and_records__then_points_loaded() {
        let text = format!(
            "{DAT_HEADER}\n{}{}",
            rec(&[("f", "t.v"), ("l", "10"), ("h", "top.t")], "3"),
            rec(&[("f", "t.v"), ("l", "11"), ("h", "top.t")], "0"),
        );
        let outcome = CoverageDatabase::parse_str(&text, Path::new("a.dat"));
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.database.len(), 2);
        let counts: Vec<u64> = outcome.database.points().map(|p| p.count()).collect();
        assert_eq!(counts, vec![3, 0]);
        assert_eq!(outcome.database.test_name(), None);
    }

    #[test]
    fn parse_str__missing_count__then_defaults_to_zero() {
        let text = "C '\x01f\x02t.v\x01l\x025'\n";
        let outcome = CoverageDatabase::parse_str(text, Path::new("a.dat"));
        assert!(outcome.errors.is_empty());
        let point = outcome.database.points().next().unwrap();
        assert_eq!(point.count(), 0);
        assert_eq!(point.comment(), "");
    }

    #[test]
    fn parse_str__bad_record__then_skipped_and_reported() {
        let text = format!(
            "{}garbage line\n{}",
            rec(&[("f", "t.v"), ("l", "1")], "1"),
            rec(&[("f", "t.v"), ("l", "2")], "2"),
        );
        let outcome = CoverageDatabase::parse_str(&text, Path::new("bad.dat"));
        assert_eq!(outcome.database.len(), 2);
        assert_eq!(outcome.errors.len(), 1);
        match &outcome.errors[0] {
            CoverageError::Format { line, .. } => assert_eq!(*line, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parse_str__non_numeric_count__then_format_error() {
        let text = "C '\x01f\x02t.v' lots\n";
        let outcome = CoverageDatabase::parse_str(text, Path::new("a.dat"));
        assert!(outcome.database.is_empty());
        assert!(outcome.errors[0].to_string().contains("invalid count"));
    }

    #[test]
    fn parse_str__truncated_final_record__then_format_error() {
        let mut text = rec(&[("f", "t.v"), ("l", "1")], "1");
        text.push_str("C '\x01f\x02t.v\x01l\x022' 4");
        let outcome = CoverageDatabase::parse_str(&text, Path::new("crash.dat"));
        assert_eq!(outcome.database.len(), 1);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].to_string().contains("truncated"));
    }

    #[test]
    fn read__final_record_cut_mid_character__then_earlier_records_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crash.dat");
        let mut bytes = format!("{DAT_HEADER}\n").into_bytes();
        bytes.extend(rec(&[("f", "t.v"), ("l", "1")], "3").into_bytes());
        bytes.extend(b"C '\x01f\x02caf\xC3");
        fs::write(&path, bytes).unwrap();

        let outcome = CoverageDatabase::read(&path).unwrap();
        assert_eq!(outcome.database.len(), 1);
        assert_eq!(outcome.database.points().next().unwrap().count(), 3);
        assert_eq!(outcome.errors.len(), 1);
        match &outcome.errors[0] {
            CoverageError::Format { line, .. } => assert_eq!(*line, 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parse_bytes__invalid_utf8_mid_file__then_only_that_record_skipped() {
        let mut bytes = b"C '\x01f\x02\xFF' 1\n".to_vec();
        bytes.extend(rec(&[("f", "t.v"), ("l", "2")], "2").into_bytes());
        let outcome = CoverageDatabase::parse_bytes(&bytes, Path::new("a.dat"));
        assert_eq!(outcome.database.len(), 1);
        assert!(outcome.errors[0].to_string().contains("UTF-8"));
    }

    #[test]
    fn parse_str__unterminated_quote__then_format_error() {
        let outcome = CoverageDatabase::parse_str("C '\x01f\x02t.v\n", Path::new("a.dat"));
        assert!(outcome.database.is_empty());
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn parse_str__field_without_separator__then_format_error() {
        let outcome = CoverageDatabase::parse_str("C '\x01fname' 1\n", Path::new("a.dat"));
        assert!(outcome.errors[0].to_string().contains("no value separator"));
    }

    #[test]
    fn parse_str__instances_of_same_point__then_collapsed() {
        let text = format!(
            "{}{}",
            rec(&[("f", "t.v"), ("l", "4"), ("h", "top.t.a1")], "2"),
            rec(&[("f", "t.v"), ("l", "4"), ("h", "top.t.a2")], "5"),
        );
        let outcome = CoverageDatabase::parse_str(&text, Path::new("a.dat"));
        assert_eq!(outcome.database.len(), 1);
        let point = outcome.database.points().next().unwrap();
        assert_eq!(point.count(), 7);
        assert_eq!(point.hier(), "top.t.a*");
    }

    #[test]
    fn read__file_on_disk__then_test_name_is_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t1.dat");
        fs::write(&path, rec(&[("f", "t.v"), ("l", "1")], "1")).unwrap();

        let outcome = CoverageDatabase::read(&path).unwrap();
        assert_eq!(outcome.database.test_name(), Some(path.display().to_string().as_str()));
    }

    #[test]
    fn read__missing_file__then_io_error() {
        let err = CoverageDatabase::read(Path::new("/nonexistent/cov.dat")).unwrap_err();
        assert!(matches!(err, CoverageError::Io { .. }));
    }

    #[test]
    fn write_dat__then_reparse_equal() {
        let dir = tempfile::tempdir().unwrap();
        let original: CoverageDatabase = [
            CoveragePoint::new([("f", "t.v"), ("l", "1"), ("h", "top.t.a*")], 4),
            CoveragePoint::new([("f", "t.v"), ("l", "2"), ("o", "if")], 0),
        ]
        .into_iter()
        .collect();
        let path = dir.path().join("out/merged.dat");
        original.write_dat(&path).unwrap();

        let reread = CoverageDatabase::read(&path).unwrap();
        assert!(reread.errors.is_empty());
        assert_eq!(reread.database, original);
    }
}
