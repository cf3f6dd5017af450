//! End-of-run reporting.

use serde::Serialize;

/// Outcome of one file, as shown in the end-of-run table.
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    /// Source basename.
    pub source: String,

    /// Confirmed destination basename (without `.flac`), when one was
    /// committed.
    pub final_name: Option<String>,

    pub ok: bool,

    /// Stage where the first error was recorded.
    pub failed_stage: Option<&'static str>,

    /// First error kind, from the report vocabulary.
    pub error_kind: Option<&'static str>,

    pub error: Option<String>,
}

/// What the run did, file by file.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcomes: Vec<FileOutcome>,
    pub aborted: bool,

    /// Whether the top-level progress directory was removed; it survives
    /// whenever anything failed, so a re-run can resume.
    pub progress_removed: bool,
}

impl RunReport {
    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.ok).count()
    }

    pub fn all_ok(&self) -> bool {
        !self.aborted && self.failed_count() == 0
    }
}
