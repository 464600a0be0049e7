//! Folding coverage databases into one merged report
//!
//! Merging is a per-key sum, so the result does not depend on the order
//! the inputs arrive in. Databases that carry a test name also record
//! which points that test hit, for ranking.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::database::CoverageDatabase;
use crate::error::Result;
use crate::point::{CoveragePoint, PointKey};

/// Per-test point counts, keyed by test name.
pub type Provenance = BTreeMap<String, BTreeMap<PointKey, u64>>;

#[derive(Debug, Clone, Default)]
pub struct MergedReport {
    merged: CoverageDatabase,
    provenance: Provenance,
}

impl MergedReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_databases(databases: impl IntoIterator<Item = CoverageDatabase>) -> Self {
        let mut aggregator = Aggregator::new();
        for database in databases {
            aggregator.add(database);
        }
        aggregator.finish()
    }

    /// Add one database. Keys it lacks keep their current count.
    pub fn add_database(&mut self, database: CoverageDatabase) {
        if let Some(test) = database.test_name() {
            let hits = self.provenance.entry(test.to_string()).or_default();
            for point in database.points() {
                let slot = hits.entry(point.key().clone()).or_insert(0);
                *slot = slot.saturating_add(point.count());
            }
        }
        for point in database.points() {
            self.merged.insert(point.clone());
        }
    }

    /// Sum another report into this one. Merging a report with a copy of
    /// itself doubles every count.
    pub fn merge(&mut self, other: MergedReport) {
        for point in other.merged.points() {
            self.merged.insert(point.clone());
        }
        for (test, hits) in other.provenance {
            let mine = self.provenance.entry(test).or_default();
            for (key, count) in hits {
                let slot = mine.entry(key).or_insert(0);
                *slot = slot.saturating_add(count);
            }
        }
    }

    pub fn points(&self) -> impl Iterator<Item = &CoveragePoint> {
        self.merged.points()
    }

    pub fn get(&self, key: &PointKey) -> Option<&CoveragePoint> {
        self.merged.get(key)
    }

    pub fn len(&self) -> usize {
        self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }

    pub fn database(&self) -> &CoverageDatabase {
        &self.merged
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn has_provenance(&self) -> bool {
        !self.provenance.is_empty()
    }

    pub fn to_dat_string(&self) -> String {
        self.merged.to_dat_string()
    }

    pub fn write_dat(&self, path: &Path) -> Result<()> {
        self.merged.write_dat(path)
    }
}

/// Reports compare by their points; provenance is bookkeeping only.
impl PartialEq for MergedReport {
    fn eq(&self, other: &Self) -> bool {
        self.merged == other.merged
    }
}

impl Eq for MergedReport {}

impl From<CoverageDatabase> for MergedReport {
    fn from(database: CoverageDatabase) -> Self {
        Self::from_databases([database])
    }
}

/// Sequential fold of databases into a [`MergedReport`].
#[derive(Debug, Default)]
pub struct Aggregator {
    report: MergedReport,
    inputs: usize,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, database: CoverageDatabase) {
        self.inputs += 1;
        debug!(
            input = self.inputs,
            test = database.test_name().unwrap_or("-"),
            points = database.len(),
            "merging coverage database"
        );
        self.report.add_database(database);
    }

    pub fn inputs(&self) -> usize {
        self.inputs
    }

    pub fn finish(self) -> MergedReport {
        debug!(
            inputs = self.inputs,
            points = self.report.len(),
            "merge complete"
        );
        self.report
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    fn point(file: &str, line: u32, count: u64) -> CoveragePoint {
        CoveragePoint::new([("f", file.to_string()), ("l", line.to_string())], count)
    }

    fn database(test: Option<&str>, points: &[(&str, u32, u64)]) -> CoverageDatabase {
        let mut db = match test {
            Some(name) => CoverageDatabase::for_test(name),
            None => CoverageDatabase::new(),
        };
        for (file, line, count) in points {
            db.insert(point(file, *line, *count));
        }
        db
    }

    #[test]
    fn merged_report__same_key__then_counts_summed() {
        let report = MergedReport::from_databases([
            database(None, &[("f.v", 10, 3)]),
            database(None, &[("f.v", 10, 5)]),
        ]);
        assert_eq!(report.len(), 1);
        assert_eq!(report.points().next().unwrap().count(), 8);
    }

    #[test]
    fn merged_report__key_missing_in_one_input__then_treated_as_zero() {
        let report = MergedReport::from_databases([
            database(None, &[("f.v", 1, 2), ("f.v", 2, 1)]),
            database(None, &[("f.v", 1, 4)]),
        ]);
        let key = point("f.v", 2, 0).key().clone();
        assert_eq!(report.get(&key).unwrap().count(), 1);
    }

    #[test]
    fn merged_report__merge_with_itself__then_counts_double() {
        let mut report = MergedReport::from(database(None, &[("f.v", 1, 3), ("f.v", 2, 0)]));
        report.merge(report.clone());
        let counts: Vec<u64> = report.points().map(|p| p.count()).collect();
        assert_eq!(counts, vec![6, 0]);
    }

    #[test]
    fn merged_report__order_of_inputs__then_equal() {
        let a = database(Some("a"), &[("f.v", 1, 1), ("g.v", 2, 7)]);
        let b = database(Some("b"), &[("g.v", 2, 1), ("f.v", 3, 2)]);
        let ab = MergedReport::from_databases([a.clone(), b.clone()]);
        let ba = MergedReport::from_databases([b, a]);
        assert_eq!(ab, ba);
        assert_eq!(ab.provenance(), ba.provenance());
    }

    #[test]
    fn merged_report__named_inputs__then_provenance_recorded() {
        let report = MergedReport::from_databases([
            database(Some("t1.dat"), &[("f.v", 1, 1)]),
            database(Some("t2.dat"), &[("f.v", 1, 0), ("f.v", 2, 4)]),
            database(None, &[("f.v", 3, 9)]),
        ]);
        assert!(report.has_provenance());
        assert_eq!(report.provenance().len(), 2);
        assert_eq!(report.provenance()["t2.dat"].len(), 2);
    }

    #[test]
    fn merged_report__anonymous_inputs__then_no_provenance() {
        let report = MergedReport::from(database(None, &[("f.v", 1, 1)]));
        assert!(!report.has_provenance());
    }

    #[test]
    fn aggregator__counts_inputs() {
        let mut aggregator = Aggregator::new();
        aggregator.add(database(None, &[("f.v", 1, 1)]));
        aggregator.add(database(None, &[]));
        assert_eq!(aggregator.inputs(), 2);
        assert_eq!(aggregator.finish().len(), 1);
    }
}
