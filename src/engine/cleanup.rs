//! The `cleanup` stage: destructive source replacement behind the
//! all-files xdelta barrier.
//!
//! No source is deleted until *every* file's cross-check has terminated:
//! tokens from pargen are buffered until the xdelta queue closes. Files
//! whose cross-check or parity failed are forwarded untouched.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache;
use crate::domain::{Stage, StageError};
use crate::name;
use crate::tools;

use super::runtime::{Shared, Token, TokenReceiver, TokenSender};

pub(crate) async fn run(
    sh: Arc<Shared>,
    mut pargen_rx: TokenReceiver,
    mut xdelta_rx: TokenReceiver,
    tx: TokenSender,
) -> anyhow::Result<()> {
    let mut buffered: Vec<Token> = Vec::new();
    let mut xdelta_ok = vec![false; sh.files.len()];
    let mut pargen_open = true;

    // Barrier phase: collect until the xdelta stage has terminated.
    loop {
        tokio::select! {
            verdict = xdelta_rx.recv() => match verdict {
                Some(t) => xdelta_ok[t.index] = !t.failed,
                None => break,
            },
            tok = pargen_rx.recv(), if pargen_open => match tok {
                Some(t) => buffered.push(t),
                None => pargen_open = false,
            },
        }
    }
    debug!(buffered = buffered.len(), "xdelta barrier released");

    for token in buffered {
        handle(&sh, token, &xdelta_ok, &tx).await;
    }
    if pargen_open {
        while let Some(token) = pargen_rx.recv().await {
            handle(&sh, token, &xdelta_ok, &tx).await;
        }
    }
    Ok(())
}

async fn handle(sh: &Shared, mut token: Token, xdelta_ok: &[bool], tx: &TokenSender) {
    // A failed cross-check forbids every destructive step for this file.
    if !token.failed && !xdelta_ok[token.index] {
        token.failed = true;
    }
    let work = cleanup_one(sh, token.index);
    sh.process(&mut token, Stage::Cleanup, work).await;
    let _ = tx.send(token).await;
}

async fn cleanup_one(sh: &Shared, index: usize) -> Result<(), StageError> {
    let file = sh.file(index);
    let io_err = |what: &str, e: std::io::Error| {
        StageError::ProgressWrite(format!("{what}: {e}"))
    };

    let (provided, guessed) = {
        let st = file.state().await;
        (
            st.provided_filename
                .clone()
                .ok_or_else(|| StageError::ProgressWrite("no confirmed filename".to_string()))?,
            st.guessed_timestamp,
        )
    };
    let flac_name = format!("{provided}.flac");
    let encoded = file.progress.encoded_flac();
    let link = file.progress.link(&provided);

    // The recording's own time, recovered from the confirmed name, falling
    // back to the guess for force-accepted names without a stamp.
    let stamp = name::find_stamp(&provided)
        .map(|s| s.when)
        .or(guessed.map(|g| g.when));

    if sh.cfg.modify_source {
        if tokio::fs::try_exists(&file.source_path).await.unwrap_or(false) {
            tokio::fs::remove_file(&file.source_path)
                .await
                .map_err(|e| io_err("failed to delete source wav", e))?;
            info!(file = %file.source_name, "source wav deleted");
        }

        // Leave verified copies on the medium under their final names.
        let src_root = file
            .source_path
            .parent()
            .ok_or_else(|| StageError::ProgressWrite("source path has no parent".to_string()))?;
        let flacs_dir = src_root.join("flacs");
        tokio::fs::create_dir_all(&flacs_dir)
            .await
            .map_err(|e| io_err("failed to create flacs dir", e))?;

        let flac_copy = flacs_dir.join(&flac_name);
        copy_absent(&encoded, &flac_copy).await.map_err(|e| io_err("copy-back failed", e))?;
        if let Some(when) = stamp {
            cache::set_mtime(&flac_copy, when).map_err(|e| io_err("failed to set mtime", e))?;
        }
        for vol in tools::par2_volumes(&link).map_err(|e| StageError::CopybackVerify(e.to_string()))? {
            if let Some(vol_name) = vol.file_name() {
                copy_absent(&vol, &flacs_dir.join(vol_name))
                    .await
                    .map_err(|e| io_err("copy-back failed", e))?;
            }
        }

        if sh.cfg.evict {
            let mut copied = vec![flac_copy.clone()];
            copied.extend(
                tools::par2_volumes(&flac_copy)
                    .map_err(|e| StageError::CopybackVerify(e.to_string()))?,
            );
            for path in copied {
                if let Err(err) = cache::advise_evict(&path) {
                    warn!(file = %file.source_name, error = %err, "eviction advisory failed");
                }
            }
        }
        sh.tools
            .par2_verify(&flac_copy)
            .await
            .map_err(|e| StageError::CopybackVerify(e.to_string()))?;
        info!(file = %file.source_name, "copy-back verified");
    }

    // Move the artifacts to the destination under their final names.
    let dest_flac = sh.cfg.dest.join(&flac_name);
    if tokio::fs::try_exists(&encoded).await.unwrap_or(false) {
        move_file(&encoded, &dest_flac)
            .await
            .map_err(|e| io_err("failed to move flac to destination", e))?;
    }
    for vol in tools::par2_volumes(&link).map_err(|e| StageError::ProgressWrite(e.to_string()))? {
        if let Some(vol_name) = vol.file_name() {
            move_file(&vol, &sh.cfg.dest.join(vol_name))
                .await
                .map_err(|e| io_err("failed to move par2 to destination", e))?;
        }
    }
    if let Some(when) = stamp {
        if tokio::fs::try_exists(&dest_flac).await.unwrap_or(false) {
            cache::set_mtime(&dest_flac, when).map_err(|e| io_err("failed to set mtime", e))?;
        }
    }

    tokio::fs::remove_dir_all(&file.progress.dir)
        .await
        .map_err(|e| io_err("failed to remove progress dir", e))?;
    info!(file = %file.source_name, dest = %dest_flac.display(), "retired");
    Ok(())
}

/// Copy `from` to `to` unless `to` already exists (idempotent resume).
async fn copy_absent(from: &Path, to: &Path) -> std::io::Result<()> {
    if tokio::fs::try_exists(to).await.unwrap_or(false) {
        return Ok(());
    }
    tokio::fs::copy(from, to).await.map(|_| ())
}

/// Move a file, falling back to copy + remove across filesystems.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(err) if err.raw_os_error() == Some(libc::EXDEV) => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn move_file_works_within_a_filesystem() {
        let tmp = tempfile::tempdir().unwrap();
        let from = tmp.path().join("a");
        let to = tmp.path().join("b");
        tokio::fs::write(&from, b"payload").await.unwrap();

        move_file(&from, &to).await.unwrap();
        assert!(!from.exists());
        assert_eq!(tokio::fs::read(&to).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn copy_absent_skips_existing_targets() {
        let tmp = tempfile::tempdir().unwrap();
        let from = tmp.path().join("a");
        let to = tmp.path().join("b");
        tokio::fs::write(&from, b"new").await.unwrap();
        tokio::fs::write(&to, b"old").await.unwrap();

        copy_absent(&from, &to).await.unwrap();
        assert_eq!(tokio::fs::read(&to).await.unwrap(), b"old");
    }
}
