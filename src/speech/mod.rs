//! Speech-to-text over a waveform prefix.
//!
//! The recognizer is an external command that consumes raw waveform bytes
//! on stdin and emits its recognized timestamp tokens on stdout. We feed it
//! only the opening seconds of each recording so the operator can be
//! prompted long before the full file has been read off the medium.

pub mod talkytime;

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

pub use talkytime::{ParsedTimestamp, TalkyTimeError};

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("failed to spawn {cmd}: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{cmd} timed out after {seconds}s")]
    Timeout { cmd: String, seconds: u64 },

    #[error("{cmd} exited with code {code}: {stderr}")]
    Failed {
        cmd: String,
        code: i32,
        stderr: String,
    },

    #[error("{cmd} emitted non-UTF-8 output")]
    BadOutput { cmd: String },
}

/// The external speech-to-text command, with its per-file deadline.
#[derive(Debug, Clone)]
pub struct SpeechTool {
    cmd: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    retries: u32,
}

impl SpeechTool {
    pub fn new(cmd: PathBuf, args: Vec<String>, timeout: Duration, retries: u32) -> Self {
        Self {
            cmd,
            args,
            timeout,
            retries,
        }
    }

    /// Run the recognizer over a waveform prefix and return its token
    /// stream. A timed-out or failed attempt is retried up to the
    /// configured count.
    pub async fn transcribe(&self, prefix: &[u8]) -> Result<String, SpeechError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transcribe_once(prefix).await {
                Ok(text) => return Ok(text),
                Err(err) if attempt <= self.retries => {
                    warn!(attempt, error = %err, "speech recognition failed, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn transcribe_once(&self, prefix: &[u8]) -> Result<String, SpeechError> {
        let cmd_name = self.cmd.display().to_string();

        let mut child = Command::new(&self.cmd)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SpeechError::Spawn {
                cmd: cmd_name.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // The recognizer may stop reading once it has enough audio;
            // a broken pipe here is not an error.
            if let Err(err) = stdin.write_all(prefix).await {
                debug!(error = %err, "recognizer closed stdin early");
            }
        }

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| SpeechError::Timeout {
                cmd: cmd_name.clone(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|source| SpeechError::Spawn {
                cmd: cmd_name.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SpeechError::Failed {
                cmd: cmd_name,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8(output.stdout)
            .map_err(|_| SpeechError::BadOutput { cmd: cmd_name })?;
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn script_tool(dir: &std::path::Path, body: &str, secs: u64) -> SpeechTool {
        let path = dir.join("stt");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh\n{body}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        SpeechTool::new(path, vec![], Duration::from_secs(secs), 1)
    }

    #[tokio::test]
    async fn transcribe_returns_trimmed_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script_tool(dir.path(), "cat >/dev/null\necho ' ten forty four '", 10);
        let text = tool.transcribe(b"RIFFfake").await.unwrap();
        assert_eq!(text, "ten forty four");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_with_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script_tool(dir.path(), "cat >/dev/null\necho 'no model' >&2\nexit 3", 10);
        let err = tool.transcribe(b"RIFFfake").await.unwrap_err();
        match err {
            SpeechError::Failed { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert!(stderr.contains("no model"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let tool = SpeechTool::new(
            PathBuf::from("/nonexistent/taketake-stt"),
            vec![],
            Duration::from_secs(1),
            0,
        );
        assert!(matches!(
            tool.transcribe(b"x").await,
            Err(SpeechError::Spawn { .. })
        ));
    }
}
