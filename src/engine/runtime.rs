//! Stage plumbing: tokens, queues, and shared run state.
//!
//! Stages are cooperative tasks linked by bounded single-producer
//! single-consumer queues of file indices. Closing a queue is the
//! end-of-stream sentinel. A failed file keeps flowing as a *failed token*
//! so that ordering and fan-in pairing stay intact while downstream stages
//! skip all real work for it.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::config::Config;
use crate::domain::{FileInfo, Stage, StageError, StageStatus};
use crate::tools::Tools;
use crate::ui::FilenamePrompter;

/// Depth of every inter-stage queue.
pub(crate) const QUEUE_DEPTH: usize = 16;

/// A unit of work: an index into the shared file vector.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Token {
    pub index: usize,
    pub failed: bool,
}

impl Token {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            failed: false,
        }
    }
}

pub(crate) type TokenSender = mpsc::Sender<Token>;
pub(crate) type TokenReceiver = mpsc::Receiver<Token>;

pub(crate) fn queue() -> (TokenSender, TokenReceiver) {
    mpsc::channel(QUEUE_DEPTH)
}

/// State shared by every stage of one run.
pub(crate) struct Shared {
    pub cfg: Config,
    pub tools: Tools,
    pub prompter: Arc<dyn FilenamePrompter>,
    pub cancel: CancellationToken,
    pub files: Vec<FileInfo>,
}

impl Shared {
    pub fn file(&self, index: usize) -> &FileInfo {
        &self.files[index]
    }

    /// True when a previous run already moved this file's artifacts to the
    /// destination: the name is committed, the encoded flac is gone from
    /// the progress dir, and the destination flac exists. A crash between
    /// that move and the progress-dir removal leaves exactly this state,
    /// and the artifact-producing stages must skip rather than fail.
    pub async fn already_retired(&self, index: usize) -> bool {
        let file = self.file(index);
        let Some(provided) = file.state().await.provided_filename.clone() else {
            return false;
        };
        if tokio::fs::try_exists(file.progress.encoded_flac())
            .await
            .unwrap_or(false)
        {
            return false;
        }
        tokio::fs::try_exists(self.cfg.dest.join(format!("{provided}.flac")))
            .await
            .unwrap_or(false)
    }

    /// Run one stage's work for one token, updating the file's stage
    /// status and converting an error into a failed token.
    ///
    /// Failed tokens and cancelled runs skip the work entirely; a
    /// cancelled run records `Aborted` so the file is reported and the
    /// progress directory survives for resumption.
    pub async fn process<F>(&self, token: &mut Token, stage: Stage, work: F)
    where
        F: Future<Output = Result<(), StageError>>,
    {
        if token.failed {
            return;
        }
        if self.cancel.is_cancelled() {
            self.file(token.index)
                .state()
                .await
                .record_error(stage, StageError::Aborted);
            token.failed = true;
            return;
        }

        let file = self.file(token.index);
        file.state().await.set_status(stage, StageStatus::Running);

        match work.await {
            Ok(()) => {
                file.state().await.set_status(stage, StageStatus::Complete);
            }
            Err(err) => {
                error!(
                    file = %file.source_name,
                    stage = stage.as_str(),
                    error = %err,
                    "stage failed"
                );
                file.state().await.record_error(stage, err);
                token.failed = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FileState;
    use crate::progress::FileProgress;
    use crate::ui::ScriptedPrompter;
    use std::path::PathBuf;

    fn shared_with_one_file() -> Shared {
        let cfg = Config::new(PathBuf::from("/src"), PathBuf::from("/dest"));
        Shared {
            tools: Tools::from_config(&cfg),
            cfg,
            prompter: Arc::new(ScriptedPrompter::accept_defaults()),
            cancel: CancellationToken::new(),
            files: vec![FileInfo::new(
                0,
                PathBuf::from("/src/a.wav"),
                "a.wav".to_string(),
                10,
                None,
                FileProgress::new(PathBuf::from("/tmp/p/a.wav")),
                FileState::default(),
            )],
        }
    }

    #[tokio::test]
    async fn process_marks_complete_on_success() {
        let sh = shared_with_one_file();
        let mut tok = Token::new(0);
        sh.process(&mut tok, Stage::Listen, async { Ok(()) }).await;
        assert!(!tok.failed);
        assert_eq!(
            sh.file(0).state().await.status(Stage::Listen),
            StageStatus::Complete
        );
    }

    #[tokio::test]
    async fn process_records_failure_and_fails_token() {
        let sh = shared_with_one_file();
        let mut tok = Token::new(0);
        sh.process(&mut tok, Stage::Encode, async {
            Err(StageError::Encode("boom".into()))
        })
        .await;
        assert!(tok.failed);
        let st = sh.file(0).state().await;
        assert_eq!(st.status(Stage::Encode), StageStatus::Failed);
        assert_eq!(st.error.as_ref().unwrap().1.kind(), "EncodeFail");
    }

    #[tokio::test]
    async fn failed_tokens_short_circuit() {
        let sh = shared_with_one_file();
        let mut tok = Token::new(0);
        tok.failed = true;
        sh.process(&mut tok, Stage::Prompt, async {
            panic!("work must not run for a failed token")
        })
        .await;
        assert_eq!(
            sh.file(0).state().await.status(Stage::Prompt),
            StageStatus::Pending
        );
    }

    #[tokio::test]
    async fn cancellation_records_aborted() {
        let sh = shared_with_one_file();
        sh.cancel.cancel();
        let mut tok = Token::new(0);
        sh.process(&mut tok, Stage::Listen, async { Ok(()) }).await;
        assert!(tok.failed);
        let st = sh.file(0).state().await;
        assert_eq!(st.error.as_ref().unwrap().1.kind(), "Aborted");
    }
}
