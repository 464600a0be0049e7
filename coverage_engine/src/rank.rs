//! Test ranking for suite minimisation
//!
//! Greedy set cover: repeatedly pick the test that covers the most points
//! not yet covered by an earlier pick. Ties go to the lexically smallest
//! test name. Ranking needs a per-test breakdown: a report built from a
//! single database (typically an earlier merge) cannot be ranked.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::error::{CoverageError, Result};
use crate::merge::MergedReport;
use crate::point::PointKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankEntry {
    pub test: String,
    /// 1-based pick order; `None` when the test adds nothing new.
    pub rank: Option<usize>,
    /// Points this test covered that no earlier pick did.
    pub marginal_points: usize,
    /// Points this test covered at all.
    pub covered_points: usize,
}

pub fn rank(report: &MergedReport) -> Result<Vec<RankEntry>> {
    if report.provenance().len() < 2 {
        return Err(CoverageError::RankUnavailable);
    }

    // BTreeMap order gives the name tie-break for free.
    let covered: BTreeMap<&str, HashSet<&PointKey>> = report
        .provenance()
        .iter()
        .map(|(test, hits)| {
            let keys = hits
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(key, _)| key)
                .collect();
            (test.as_str(), keys)
        })
        .collect();

    let mut remaining: HashSet<&PointKey> = covered.values().flatten().copied().collect();
    let mut picked: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    let mut order: Vec<&str> = Vec::new();

    loop {
        let mut best: Option<(&str, usize)> = None;
        for (test, keys) in &covered {
            if picked.contains_key(test) {
                continue;
            }
            let gain = keys.iter().filter(|key| remaining.contains(*key)).count();
            if gain > best.map_or(0, |(_, best_gain)| best_gain) {
                best = Some((*test, gain));
            }
        }
        let Some((test, gain)) = best else {
            break;
        };
        for key in &covered[test] {
            remaining.remove(key);
        }
        order.push(test);
        picked.insert(test, (order.len(), gain));
        debug!(test, rank = order.len(), gain, "ranked test");
    }

    let mut entries: Vec<RankEntry> = order
        .iter()
        .map(|test| {
            let (rank, gain) = picked[test];
            RankEntry {
                test: test.to_string(),
                rank: Some(rank),
                marginal_points: gain,
                covered_points: covered[test].len(),
            }
        })
        .collect();
    entries.extend(
        covered
            .iter()
            .filter(|(test, _)| !picked.contains_key(*test))
            .map(|(test, keys)| RankEntry {
                test: test.to_string(),
                rank: None,
                marginal_points: 0,
                covered_points: keys.len(),
            }),
    );
    Ok(entries)
}

pub fn format_rank_table(entries: &[RankEntry]) -> String {
    let mut out = String::from("Testrank,  Points,  Testname\n");
    for entry in entries {
        let rank = entry
            .rank
            .map_or_else(|| "-".to_string(), |rank| rank.to_string());
        out.push_str(&format!(
            "{:>8}, {:>7},  {}\n",
            rank, entry.marginal_points, entry.test
        ));
    }
    out
}
