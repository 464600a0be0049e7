use std::{fmt, io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("{}:{line}: malformed coverage record: {message}", path.display())]
    Format {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("coverage source file not found: {}", path.display())]
    PathResolution { path: PathBuf },
    #[error("cannot run {binary}: misinstalled, or VERILATOR_ROOT might need to be in environment ({hint})")]
    Misinstall { binary: String, hint: String },
    #[error("no per-test provenance recorded; ranking needs one coverage file per test")]
    RankUnavailable,
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CoverageError>;

impl CoverageError {
    pub fn format(path: impl Into<PathBuf>, line: usize, message: impl fmt::Display) -> Self {
        Self::Format {
            path: path.into(),
            line,
            message: message.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_pattern(pattern: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            message: message.to_string(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::PathResolution { .. } | Self::RankUnavailable => Severity::Warning,
            Self::Format { .. } | Self::InvalidPattern { .. } | Self::Io { .. } => Severity::Error,
            Self::Misinstall { .. } => Severity::Fatal,
        }
    }
}

/// Outcome ordering used to pick the exit code of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Severity {
    #[default]
    Clean,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    pub fn exit_code(self) -> i32 {
        match self {
            Severity::Clean | Severity::Warning => 0,
            Severity::Error => 1,
            Severity::Fatal => 255,
        }
    }
}

/// Non-fatal problems collected over a whole run and reported at the end.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<CoverageError>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: CoverageError) {
        tracing::debug!(error = %err, "recorded diagnostic");
        self.entries.push(err);
    }

    pub fn extend(&mut self, errs: impl IntoIterator<Item = CoverageError>) {
        for err in errs {
            self.push(err);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CoverageError> {
        self.entries.iter()
    }

    pub fn severity(&self) -> Severity {
        self.entries
            .iter()
            .map(CoverageError::severity)
            .max()
            .unwrap_or_default()
    }

    /// Render every entry as `%Error: ...` / `%Warning: ...` lines.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for err in &self.entries {
            let prefix = match err.severity() {
                Severity::Warning => "%Warning",
                _ => "%Error",
            };
            out.push_str(&format!("{prefix}: {err}\n"));
        }
        out
    }
}
