//! Coverage points and their normalized keys
//!
//! A point is a bag of `key/value` fields plus a hit count. On disk the
//! fields are written as `\x01<key>\x02<value>` runs. Points whose fields
//! differ only by hierarchy are the same point seen from different
//! instances; they share a [`PointKey`] and their hierarchies collapse
//! into a wildcard (`top.t.a1` + `top.t.a2` => `top.t.a*`).

use std::collections::BTreeSet;
use std::fmt;

pub const KEY_FILENAME: &str = "f";
pub const KEY_LINENO: &str = "l";
pub const KEY_COLUMN: &str = "n";
pub const KEY_TYPE: &str = "t";
pub const KEY_COMMENT: &str = "o";
pub const KEY_HIER: &str = "h";
pub const KEY_PAGE: &str = "page";
pub const KEY_LINESCOV: &str = "S";
pub const KEY_THRESH: &str = "thresh";

pub(crate) const FIELD_START: char = '\x01';
pub(crate) const VALUE_START: char = '\x02';

/// Map long field names onto the short names used in coverage files.
pub fn canonical_key(name: &str) -> &str {
    match name {
        "filename" => KEY_FILENAME,
        "lineno" => KEY_LINENO,
        "column" => KEY_COLUMN,
        "type" => KEY_TYPE,
        "comment" => KEY_COMMENT,
        "hier" => KEY_HIER,
        "linescov" => KEY_LINESCOV,
        other => other,
    }
}

/// Identity of a point: every field except the hierarchy, in sorted order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointKey(String);

impl PointKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let readable = self
            .0
            .trim_start_matches(FIELD_START)
            .replace(FIELD_START, " ")
            .replace(VALUE_START, "=");
        f.write_str(&readable)
    }
}

#[derive(Debug, Clone)]
pub struct CoveragePoint {
    /// Non-hierarchy fields in the order they were read.
    fields: Vec<(String, String)>,
    /// Every distinct instance path folded into this point.
    hiers: BTreeSet<String>,
    /// Wildcard over `hiers`, rebuilt whenever the set grows.
    hier: String,
    count: u64,
    key: PointKey,
}

impl CoveragePoint {
    pub fn new<K, V>(fields: impl IntoIterator<Item = (K, V)>, count: u64) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut hier = String::new();
        let mut kept: Vec<(String, String)> = Vec::new();
        for (name, value) in fields {
            let name = canonical_key(name.as_ref()).to_string();
            let value = value.into();
            if name == KEY_HIER {
                hier = value;
                continue;
            }
            match kept.iter_mut().find(|(existing, _)| *existing == name) {
                Some(slot) => slot.1 = value,
                None => kept.push((name, value)),
            }
        }

        let mut sorted: Vec<&(String, String)> = kept.iter().collect();
        sorted.sort();
        let mut key = String::new();
        for (name, value) in sorted {
            key.push(FIELD_START);
            key.push_str(name);
            key.push(VALUE_START);
            key.push_str(value);
        }

        let hiers: BTreeSet<String> = if hier.is_empty() {
            BTreeSet::new()
        } else {
            BTreeSet::from([hier.clone()])
        };

        Self {
            fields: kept,
            hiers,
            hier,
            count,
            key: PointKey(key),
        }
    }

    pub fn key(&self) -> &PointKey {
        &self.key
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        let name = canonical_key(name);
        if name == KEY_HIER {
            return Some(&self.hier);
        }
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn filename(&self) -> &str {
        self.field(KEY_FILENAME).unwrap_or("")
    }

    /// Source line, 0 when absent or not a number.
    pub fn lineno(&self) -> u32 {
        self.field(KEY_LINENO)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn column(&self) -> u32 {
        self.field(KEY_COLUMN)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn comment(&self) -> &str {
        self.field(KEY_COMMENT).unwrap_or("")
    }

    pub fn hier(&self) -> &str {
        &self.hier
    }

    /// Explicit `t` field, else the `page` prefix (`v_line/top` => `line`).
    pub fn point_type(&self) -> &str {
        if let Some(kind) = self.field(KEY_TYPE).filter(|kind| !kind.is_empty()) {
            return kind;
        }
        self.field(KEY_PAGE)
            .map(|page| {
                let page = page.strip_prefix("v_").unwrap_or(page);
                page.split('/').next().unwrap_or(page)
            })
            .unwrap_or("")
    }

    /// Per-point override of the annotation threshold.
    pub fn thresh(&self) -> Option<u64> {
        self.field(KEY_THRESH)
            .and_then(|value| value.trim().parse().ok())
    }

    /// Extra lines listed in `S`, e.g. `"10-12,15"` => `[10, 11, 12, 15]`.
    pub fn lines_covered(&self) -> Vec<u32> {
        let Some(spec) = self.field(KEY_LINESCOV) else {
            return Vec::new();
        };
        let mut lines = Vec::new();
        for part in spec.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (start, end) = match part.split_once('-') {
                Some((start, end)) => (start.trim().parse::<u32>(), end.trim().parse::<u32>()),
                None => (part.parse::<u32>(), part.parse::<u32>()),
            };
            if let (Ok(start), Ok(end)) = (start, end) {
                if start > 0 {
                    lines.extend(start..=end);
                }
            }
        }
        lines
    }

    /// Fold another sighting of the same point into this one.
    pub fn absorb(&mut self, other: &CoveragePoint) {
        debug_assert_eq!(self.key, other.key);
        self.count = self.count.saturating_add(other.count);
        let before = self.hiers.len();
        self.hiers.extend(other.hiers.iter().cloned());
        if self.hiers.len() != before {
            self.hier = wildcard_hier(self.hiers.iter().map(String::as_str));
        }
    }

    /// Encode as the quoted body of a `C` record.
    pub fn encode_fields(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.fields {
            out.push(FIELD_START);
            out.push_str(name);
            out.push(VALUE_START);
            out.push_str(value);
        }
        if !self.hier.is_empty() {
            out.push(FIELD_START);
            out.push_str(KEY_HIER);
            out.push(VALUE_START);
            out.push_str(&self.hier);
        }
        out
    }

    pub fn to_record(&self) -> String {
        format!("C '{}' {}", self.encode_fields(), self.count)
    }
}

/// Equal key, hierarchy and count; field order is not significant.
impl PartialEq for CoveragePoint {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.hier == other.hier && self.count == other.count
    }
}

impl Eq for CoveragePoint {}

/// Collapse instance paths into one, wildcarding where they differ.
///
/// `(foo.a.x, foo.b.x)` => `foo.*.x`, `(top.t.a1, top.t.a2)` => `top.t.a*`.
/// The prefix and suffix are common to the whole set, so the result does
/// not depend on iteration order. An existing `*` never takes part in
/// either.
pub fn wildcard_hier<'a>(hiers: impl IntoIterator<Item = &'a str>) -> String {
    let mut paths: Vec<Vec<char>> = hiers
        .into_iter()
        .filter(|hier| !hier.is_empty())
        .map(|hier| hier.chars().collect())
        .collect();
    paths.sort();
    paths.dedup();
    let Some(first) = paths.first() else {
        return String::new();
    };
    if paths.len() == 1 {
        return first.iter().collect();
    }

    let shortest = paths.iter().map(Vec::len).min().unwrap_or(0);
    let mut prefix = 0;
    while prefix < shortest
        && first[prefix] != '*'
        && paths.iter().all(|path| path[prefix] == first[prefix])
    {
        prefix += 1;
    }

    let mut suffix = 0;
    while suffix < shortest - prefix {
        let ch = first[first.len() - 1 - suffix];
        if ch == '*' || paths.iter().any(|path| path[path.len() - 1 - suffix] != ch) {
            break;
        }
        suffix += 1;
    }

    let head: String = first[..prefix].iter().collect();
    let tail: String = first[first.len() - suffix..].iter().collect();
    format!("{head}*{tail}")
}
