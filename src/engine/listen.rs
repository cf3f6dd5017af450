//! The `listen` stage: speech recognition and filename guessing.

use std::path::Path;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tracing::info;

use crate::domain::{SpokenStamp, Stage, StageError};
use crate::name;
use crate::progress::FILENAME_GUESS;
use crate::speech::talkytime;
use crate::audio;

use super::runtime::{Shared, TokenReceiver, TokenSender};

pub(crate) async fn run(
    sh: Arc<Shared>,
    mut rx: TokenReceiver,
    tx: TokenSender,
) -> anyhow::Result<()> {
    while let Some(mut token) = rx.recv().await {
        let work = listen_one(&sh, token.index);
        sh.process(&mut token, Stage::Listen, work).await;
        if tx.send(token).await.is_err() {
            break;
        }
    }
    Ok(())
}

async fn listen_one(sh: &Shared, index: usize) -> Result<(), StageError> {
    let file = sh.file(index);

    // A committed guess from an earlier run short-circuits recognition.
    if file.state().await.guessed_filename.is_some() {
        return Ok(());
    }

    let shape = audio::inspect(&file.source_path)
        .map_err(|e| StageError::SpeechRecog(e.to_string()))?;
    let duration = shape.duration_secs();

    let prefix = read_prefix(
        &file.source_path,
        shape.prefix_len(sh.cfg.speech_scan_secs),
    )
    .await
    .map_err(|e| StageError::SpeechRecog(format!("failed to read waveform prefix: {e}")))?;

    let text = sh
        .tools
        .speech
        .transcribe(&prefix)
        .await
        .map_err(|e| StageError::SpeechRecog(e.to_string()))?;

    let parsed = talkytime::words_to_timestamp(&text)
        .map_err(|e| StageError::TimestampParse(format!("{e} (heard: '{text}')")))?;
    let stamp = SpokenStamp {
        when: parsed.when,
        confident: parsed.confident(),
    };

    let guess = name::build_guess(
        &sh.cfg.instrument,
        &stamp,
        duration,
        &parsed.notes,
        file.stem(),
    );
    info!(file = %file.source_name, guess = %guess, "guessed filename");

    file.progress
        .write_marker(FILENAME_GUESS, &guess)
        .map_err(|e| StageError::ProgressWrite(e.to_string()))?;

    let mut st = file.state().await;
    st.duration_secs = Some(duration);
    st.guessed_timestamp = Some(stamp);
    st.notes = parsed.notes;
    st.guessed_filename = Some(guess);
    Ok(())
}

/// Read up to `len` bytes from the start of the file.
async fn read_prefix(path: &Path, len: u64) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    let want = len.min(file.metadata().await?.len()) as usize;
    let mut buf = vec![0u8; want];
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prefix_is_bounded_by_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        tokio::fs::write(&path, vec![7u8; 100]).await.unwrap();

        assert_eq!(read_prefix(&path, 1000).await.unwrap().len(), 100);
        assert_eq!(read_prefix(&path, 10).await.unwrap().len(), 10);
    }
}
