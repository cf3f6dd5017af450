//! Per-file error kinds surfaced by the engine.

use thiserror::Error;

/// An error recorded against a single file by the stage that hit it.
///
/// A stage failure never unwinds across a queue boundary: the stage records
/// the error in the file's state and forwards the index downstream as a
/// failed token. Only setup errors and queue/runtime breakage halt the run.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    #[error("setup failed: {0}")]
    Setup(String),

    #[error("speech recognition failed: {0}")]
    SpeechRecog(String),

    #[error("no timestamp in recognized speech: {0}")]
    TimestampParse(String),

    #[error("provided filename rejected: {0}")]
    PromptValidation(String),

    #[error("flac encode failed: {0}")]
    Encode(String),

    #[error("par2 create failed: {0}")]
    Par2Create(String),

    #[error("par2 verify failed: {0}")]
    Par2Verify(String),

    #[error("page cache eviction failed: {0}")]
    Evict(String),

    #[error("decoded flac does not match source wav: {0}")]
    XdeltaMismatch(String),

    #[error("copy-back verify failed: {0}")]
    CopybackVerify(String),

    #[error("progress marker write failed: {0}")]
    ProgressWrite(String),

    #[error("aborted by operator")]
    Aborted,
}

impl StageError {
    /// Short kind name used in the end-of-run report.
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::Setup(_) => "SetupFail",
            StageError::SpeechRecog(_) => "SpeechRecogFail",
            StageError::TimestampParse(_) => "TimestampParse",
            StageError::PromptValidation(_) => "PromptValidation",
            StageError::Encode(_) => "EncodeFail",
            StageError::Par2Create(_) => "Par2CreateFail",
            StageError::Par2Verify(_) => "Par2VerifyFail",
            StageError::Evict(_) => "EvictFail",
            StageError::XdeltaMismatch(_) => "XdeltaMismatch",
            StageError::CopybackVerify(_) => "CopybackVerifyFail",
            StageError::ProgressWrite(_) => "ProgressWrite",
            StageError::Aborted => "Aborted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_report_vocabulary() {
        assert_eq!(StageError::Encode("x".into()).kind(), "EncodeFail");
        assert_eq!(StageError::XdeltaMismatch("x".into()).kind(), "XdeltaMismatch");
        assert_eq!(StageError::Aborted.kind(), "Aborted");
    }

    #[test]
    fn display_includes_detail() {
        let err = StageError::Par2Verify("bad block".into());
        assert!(err.to_string().contains("bad block"));
    }
}
