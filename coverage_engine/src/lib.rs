//! Coverage database engine behind `verilator_coverage`
//!
//! Reads SystemC::Coverage-3 `.dat` files, merges them into one report,
//! and turns the report into annotated sources, lcov `.info` files or a
//! test ranking.

pub mod annotate;
pub mod database;
pub mod error;
pub mod exclude;
pub mod lcov;
pub mod mapper;
pub mod merge;
pub mod pipeline;
pub mod point;
pub mod rank;

pub use database::{CoverageDatabase, ParseOutcome, DAT_HEADER};
pub use error::{CoverageError, Diagnostics, Result, Severity};
pub use merge::{Aggregator, MergedReport};
pub use pipeline::{run, CoverageConfig, RunOutcome};
pub use point::{CoveragePoint, PointKey};
