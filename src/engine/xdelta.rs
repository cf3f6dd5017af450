//! The `xdelta` stage: byte-equivalence witness between the encoded flac
//! and the source wav.
//!
//! The flac decoder streams into the xdelta3 differ with the source wav as
//! the base; a matching pair produces a delta that is nothing but one full
//! copy of the source. The source must be out of the page cache first so
//! the comparison re-reads the medium.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cache;
use crate::domain::{Stage, StageError};
use crate::tools::vcdiff;

use super::runtime::{Shared, TokenReceiver, TokenSender};

pub(crate) async fn run(
    sh: Arc<Shared>,
    mut rx: TokenReceiver,
    tx: TokenSender,
) -> anyhow::Result<()> {
    while let Some(mut token) = rx.recv().await {
        let work = xdelta_one(&sh, token.index);
        sh.process(&mut token, Stage::Xdelta, work).await;
        if tx.send(token).await.is_err() {
            break;
        }
    }
    Ok(())
}

async fn xdelta_one(sh: &Shared, index: usize) -> Result<(), StageError> {
    let file = sh.file(index);
    let xdelta = file.progress.xdelta();

    // A source already removed by a completed cleanup has nothing left to
    // cross-check.
    if !tokio::fs::try_exists(&file.source_path).await.unwrap_or(false) {
        debug!(file = %file.source_name, "source already gone, skipping cross-check");
        return Ok(());
    }
    if sh.already_retired(index).await {
        debug!(file = %file.source_name, "already retired, skipping cross-check");
        return Ok(());
    }

    // An existing zero-delta witness from an earlier run suffices.
    if tokio::fs::try_exists(&xdelta).await.unwrap_or(false) {
        if check_witness(sh, index).await.is_ok() {
            debug!(file = %file.source_name, "existing zero-delta witness accepted");
            return Ok(());
        }
        tokio::fs::remove_file(&xdelta)
            .await
            .map_err(|e| StageError::XdeltaMismatch(format!("failed to discard stale delta: {e}")))?;
    }

    if sh.cfg.evict {
        cache::wait_for_eviction(&file.source_path, sh.cfg.evict_timeout, sh.cfg.evict_poll)
            .await
            .map_err(|e| StageError::Evict(e.to_string()))?;
    }

    sh.tools
        .xdelta_diff(&file.progress.encoded_flac(), &file.source_path, &xdelta)
        .await
        .map_err(|e| StageError::XdeltaMismatch(e.to_string()))?;

    check_witness(sh, index).await?;
    info!(file = %file.source_name, "decoded flac matches the source wav");
    Ok(())
}

/// Inspect the `.xdelta` artifact and confirm it encodes a zero-delta copy
/// of the full source.
async fn check_witness(sh: &Shared, index: usize) -> Result<(), StageError> {
    let file = sh.file(index);
    let mismatch = |msg: String| StageError::XdeltaMismatch(msg);

    // Guard against a truncated second read masquerading as a match.
    let target_size = tokio::fs::metadata(&file.source_path)
        .await
        .map_err(|e| mismatch(format!("failed to stat source: {e}")))?
        .len();
    vcdiff::precheck_sizes(file.source_size, target_size).map_err(|e| mismatch(e.to_string()))?;

    let output = sh
        .tools
        .xdelta_printdelta(&file.progress.xdelta())
        .await
        .map_err(|e| mismatch(e.to_string()))?;

    if !output.status.success() {
        return Err(mismatch(format!(
            "printdelta exited with {}",
            output.status.code().unwrap_or(-1)
        )));
    }
    if !output.stderr.is_empty() {
        return Err(mismatch(format!(
            "printdelta stderr: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    vcdiff::verify_zero_delta(&text, file.source_size).map_err(|e| mismatch(e.to_string()))
}
