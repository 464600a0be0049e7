//! Line and branch totals read back from an lcov `.info` file

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub hit: u64,
    pub total: u64,
}

impl Totals {
    pub fn percent(&self) -> Option<f64> {
        (self.total > 0).then(|| self.hit as f64 * 100.0 / self.total as f64)
    }

    fn add(&mut self, other: Totals) {
        self.hit += other.hit;
        self.total += other.total;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoverageSummary {
    pub files: usize,
    pub lines: Totals,
    pub branches: Totals,
}

impl CoverageSummary {
    pub fn parse(info: &str) -> Self {
        let mut summary = Self::default();
        let mut lines = Totals::default();
        let mut branches = Totals::default();
        // LF/LH/BRF/BRH override the counts seen so far in the record.
        let mut lines_summary: Option<Totals> = None;
        let mut branches_summary: Option<Totals> = None;

        for line in info.lines() {
            if line.starts_with("SF:") {
                lines = Totals::default();
                branches = Totals::default();
                lines_summary = None;
                branches_summary = None;
            } else if let Some(data) = line.strip_prefix("DA:") {
                let mut parts = data.split(',');
                if let (Some(_), Some(count)) = (parts.next(), parts.next()) {
                    lines.total += 1;
                    if count.trim().parse::<u64>().map_or(false, |c| c > 0) {
                        lines.hit += 1;
                    }
                }
            } else if let Some(data) = line.strip_prefix("BRDA:") {
                let parts: Vec<&str> = data.split(',').collect();
                if parts.len() >= 4 {
                    branches.total += 1;
                    if parts[3] != "-" && parts[3].parse::<u64>().map_or(false, |c| c > 0) {
                        branches.hit += 1;
                    }
                }
            } else if let Some(value) = line.strip_prefix("LF:") {
                lines_summary.get_or_insert_with(Totals::default).total =
                    value.parse().unwrap_or(0);
            } else if let Some(value) = line.strip_prefix("LH:") {
                lines_summary.get_or_insert_with(Totals::default).hit = value.parse().unwrap_or(0);
            } else if let Some(value) = line.strip_prefix("BRF:") {
                branches_summary.get_or_insert_with(Totals::default).total =
                    value.parse().unwrap_or(0);
            } else if let Some(value) = line.strip_prefix("BRH:") {
                branches_summary.get_or_insert_with(Totals::default).hit =
                    value.parse().unwrap_or(0);
            } else if line == "end_of_record" {
                summary.files += 1;
                summary.lines.add(lines_summary.unwrap_or(lines));
                summary.branches.add(branches_summary.unwrap_or(branches));
            }
        }
        summary
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub fn render_text(&self) -> String {
        let row = |label: &str, totals: &Totals, unit: &str| match totals.percent() {
            Some(percent) => format!(
                "  {label:<10}{percent:.2}% ({}/{} {unit})\n",
                totals.hit, totals.total
            ),
            None => format!("  {label:<10}No {unit} coverage data\n"),
        };
        let mut out = String::from("\nCoverage Summary:\n");
        out.push_str("═══════════════════════════════════════════════════\n");
        out.push_str(&format!("  {:<10}{}\n", "Files:", self.files));
        out.push_str(&row("Lines:", &self.lines, "lines"));
        out.push_str(&row("Branches:", &self.branches, "branches"));
        out
    }
}
