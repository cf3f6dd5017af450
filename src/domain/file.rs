//! Per-file descriptors and their stage-owned mutable state.

use std::path::PathBuf;
use std::time::SystemTime;

use chrono::NaiveDateTime;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::progress::FileProgress;

use super::StageError;

/// Pipeline stages that process individual files, in graph order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Listen,
    Prompt,
    Encode,
    ParGen,
    Xdelta,
    Cleanup,
    Finish,
}

/// Number of per-file stages tracked in [`FileState`].
pub const STAGE_COUNT: usize = 7;

impl Stage {
    pub const ALL: [Stage; STAGE_COUNT] = [
        Stage::Listen,
        Stage::Prompt,
        Stage::Encode,
        Stage::ParGen,
        Stage::Xdelta,
        Stage::Cleanup,
        Stage::Finish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Listen => "listen",
            Stage::Prompt => "prompt",
            Stage::Encode => "flacenc",
            Stage::ParGen => "pargen",
            Stage::Xdelta => "xdelta",
            Stage::Cleanup => "cleanup",
            Stage::Finish => "finish",
        }
    }

    fn index(self) -> usize {
        match self {
            Stage::Listen => 0,
            Stage::Prompt => 1,
            Stage::Encode => 2,
            Stage::ParGen => 3,
            Stage::Xdelta => 4,
            Stage::Cleanup => 5,
            Stage::Finish => 6,
        }
    }
}

/// Where a stage stands for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Complete,
    Failed,
}

/// A wall-clock time recovered from speech, with its confidence marker.
///
/// Confidence drops when the spoken weekday is missing or disagrees with the
/// weekday computed from the spoken date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpokenStamp {
    pub when: NaiveDateTime,
    pub confident: bool,
}

/// Mutable per-file fields, written only by the stage holding the index.
#[derive(Debug, Default)]
pub struct FileState {
    /// Timestamp recovered from the recording's opening speech.
    pub guessed_timestamp: Option<SpokenStamp>,

    /// Filename constructed from the guessed timestamp (no `.flac` suffix).
    pub guessed_filename: Option<String>,

    /// Operator-confirmed final basename (no `.flac` suffix).
    pub provided_filename: Option<String>,

    /// Recording length in seconds, from the wav header.
    pub duration_secs: Option<f64>,

    /// Leftover speech words kept as operator-visible notes.
    pub notes: Vec<String>,

    statuses: [StageStatus; STAGE_COUNT],

    /// First error recorded against this file, with the stage that hit it.
    pub error: Option<(Stage, StageError)>,
}

impl FileState {
    pub fn status(&self, stage: Stage) -> StageStatus {
        self.statuses[stage.index()]
    }

    pub fn set_status(&mut self, stage: Stage, status: StageStatus) {
        self.statuses[stage.index()] = status;
    }

    /// Record a failure; the first error per file wins.
    pub fn record_error(&mut self, stage: Stage, error: StageError) {
        self.set_status(stage, StageStatus::Failed);
        if self.error.is_none() {
            self.error = Some((stage, error));
        }
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// One source `.wav`, identity fixed at setup.
///
/// The immutable fields may be read from any stage; everything else lives
/// behind the state mutex and follows queue-mediated ownership.
#[derive(Debug)]
pub struct FileInfo {
    pub index: usize,

    /// Absolute path of the source waveform on the source medium.
    pub source_path: PathBuf,

    /// Basename of the source waveform, e.g. `audio001.wav`.
    pub source_name: String,

    /// Size captured at setup; zero when resuming after the source was
    /// already deleted.
    pub source_size: u64,

    /// Modification time captured at setup, when the source still exists.
    pub source_mtime: Option<SystemTime>,

    /// This file's crash-safe scratch directory.
    pub progress: FileProgress,

    state: Mutex<FileState>,
}

impl FileInfo {
    pub fn new(
        index: usize,
        source_path: PathBuf,
        source_name: String,
        source_size: u64,
        source_mtime: Option<SystemTime>,
        progress: FileProgress,
        state: FileState,
    ) -> Self {
        Self {
            index,
            source_path,
            source_name,
            source_size,
            source_mtime,
            progress,
            state: Mutex::new(state),
        }
    }

    pub async fn state(&self) -> MutexGuard<'_, FileState> {
        self.state.lock().await
    }

    /// The source basename without its extension, e.g. `audio001`.
    pub fn stem(&self) -> &str {
        self.source_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.source_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_info(state: FileState) -> FileInfo {
        FileInfo::new(
            0,
            PathBuf::from("/src/audio001.wav"),
            "audio001.wav".to_string(),
            41_300_000,
            None,
            FileProgress::new(PathBuf::from("/src/.taketake.x/audio001.wav")),
            state,
        )
    }

    #[test]
    fn stem_strips_extension() {
        let info = test_info(FileState::default());
        assert_eq!(info.stem(), "audio001");
    }

    #[tokio::test]
    async fn first_error_wins() {
        let info = test_info(FileState::default());
        let mut st = info.state().await;
        st.record_error(Stage::Encode, StageError::Encode("boom".into()));
        st.record_error(Stage::ParGen, StageError::Par2Verify("later".into()));

        let (stage, err) = st.error.clone().expect("error recorded");
        assert_eq!(stage, Stage::Encode);
        assert_eq!(err.kind(), "EncodeFail");
        assert_eq!(st.status(Stage::Encode), StageStatus::Failed);
        assert_eq!(st.status(Stage::ParGen), StageStatus::Failed);
    }

    #[test]
    fn statuses_default_pending() {
        let st = FileState::default();
        for stage in Stage::ALL {
            assert_eq!(st.status(stage), StageStatus::Pending);
        }
    }
}
