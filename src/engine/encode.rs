//! The `flacenc` stage: lossless encoding with crash-safe output.
//!
//! The encoder writes to `.in_progress.flac` and the result is renamed to
//! `.encoded.flac` only on success, so `.encoded.flac` is either absent or
//! a complete encoding; partial output never survives a crash.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache;
use crate::domain::{Stage, StageError};

use super::runtime::{Shared, TokenReceiver, TokenSender};

pub(crate) async fn run(
    sh: Arc<Shared>,
    mut rx: TokenReceiver,
    xdelta_tx: TokenSender,
    pargen_tx: TokenSender,
) -> anyhow::Result<()> {
    while let Some(mut token) = rx.recv().await {
        let work = encode_one(&sh, token.index);
        sh.process(&mut token, Stage::Encode, work).await;
        // xdelta first: it can verify while the operator is still being
        // prompted for this file.
        if xdelta_tx.send(token).await.is_err() {
            break;
        }
        if pargen_tx.send(token).await.is_err() {
            break;
        }
    }
    Ok(())
}

async fn encode_one(sh: &Shared, index: usize) -> Result<(), StageError> {
    let file = sh.file(index);
    if sh.already_retired(index).await {
        debug!(file = %file.source_name, "already retired, skipping");
        return Ok(());
    }
    let partial = file.progress.in_progress_flac();
    let encoded = file.progress.encoded_flac();

    // Partial output from an interrupted run is always discarded.
    if tokio::fs::try_exists(&partial).await.unwrap_or(false) {
        debug!(file = %file.source_name, "discarding partial flac from an earlier run");
        tokio::fs::remove_file(&partial)
            .await
            .map_err(|e| StageError::Encode(format!("failed to remove partial output: {e}")))?;
    }

    if !tokio::fs::try_exists(&encoded).await.unwrap_or(false) {
        if let Err(err) = sh.tools.flac_encode(&file.source_path, &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(StageError::Encode(err.to_string()));
        }
        tokio::fs::rename(&partial, &encoded)
            .await
            .map_err(|e| StageError::Encode(format!("failed to commit encoded flac: {e}")))?;
        info!(file = %file.source_name, "encoded");
    } else {
        debug!(file = %file.source_name, "already encoded, skipping");
    }

    // Drop the source's pages so later verification reads the medium, not
    // the cache. Best-effort: missing advisory support is not an error.
    if sh.cfg.evict {
        if let Err(err) = cache::advise_evict(&file.source_path) {
            warn!(file = %file.source_name, error = %err, "source eviction advisory failed");
        }
    }

    Ok(())
}
