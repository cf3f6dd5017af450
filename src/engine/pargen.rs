//! The `pargen` stage: name commitment and parity generation.
//!
//! Joins the prompter's and the encoder's outputs for each file. Both
//! queues are FIFO over the same index sequence, so the pairing is checked
//! rather than matched: a mismatch means the runtime itself is broken and
//! the run halts.

use std::sync::Arc;

use anyhow::bail;
use tracing::{debug, info, warn};

use crate::cache;
use crate::domain::{Stage, StageError};
use crate::progress::ENCODED_FLAC;
use crate::tools;

use super::runtime::{Shared, Token, TokenReceiver, TokenSender};

pub(crate) async fn run(
    sh: Arc<Shared>,
    mut prompt_rx: TokenReceiver,
    mut encode_rx: TokenReceiver,
    tx: TokenSender,
) -> anyhow::Result<()> {
    while let Some(prompted) = prompt_rx.recv().await {
        let Some(encoded) = encode_rx.recv().await else {
            bail!(
                "encoder queue closed while file {} was still pending",
                prompted.index
            );
        };
        if prompted.index != encoded.index {
            bail!(
                "mismatching files from the prompter and encoder queues: {} vs {}",
                prompted.index,
                encoded.index
            );
        }

        let mut token = Token {
            index: prompted.index,
            failed: prompted.failed || encoded.failed,
        };
        let work = pargen_one(&sh, token.index);
        sh.process(&mut token, Stage::ParGen, work).await;
        if tx.send(token).await.is_err() {
            break;
        }
    }
    Ok(())
}

async fn pargen_one(sh: &Shared, index: usize) -> Result<(), StageError> {
    let file = sh.file(index);
    if sh.already_retired(index).await {
        debug!(file = %file.source_name, "already retired, skipping");
        return Ok(());
    }
    let provided = file
        .state()
        .await
        .provided_filename
        .clone()
        .ok_or_else(|| StageError::Par2Create("no confirmed filename".to_string()))?;

    // Commit the final name as a symlink; `.encoded.flac` stays the single
    // canonical artifact.
    let link = file.progress.link(&provided);
    if !tokio::fs::try_exists(&link).await.unwrap_or(false) {
        tokio::fs::symlink(ENCODED_FLAC, &link)
            .await
            .map_err(|e| StageError::Par2Create(format!("failed to link final name: {e}")))?;
        debug!(file = %file.source_name, link = %link.display(), "committed final name");
    }

    // A zero-byte volume is corrupt; regenerate the whole set.
    let mut volumes =
        tools::par2_volumes(&link).map_err(|e| StageError::Par2Create(e.to_string()))?;
    let mut corrupt = false;
    for vol in &volumes {
        let len = tokio::fs::metadata(vol)
            .await
            .map_err(|e| StageError::Par2Create(e.to_string()))?
            .len();
        if len == 0 {
            corrupt = true;
        }
    }
    if corrupt {
        warn!(file = %file.source_name, "zero-byte par2 volume found, regenerating the set");
        for vol in &volumes {
            tokio::fs::remove_file(vol)
                .await
                .map_err(|e| StageError::Par2Create(e.to_string()))?;
        }
        volumes.clear();
    }

    if volumes.is_empty() {
        sh.tools
            .par2_create(&link)
            .await
            .map_err(|e| StageError::Par2Create(e.to_string()))?;
        info!(file = %file.source_name, "created par2 set");
    }

    // Verification must read what the medium holds, not the page cache.
    if sh.cfg.evict {
        let encoded = file.progress.encoded_flac();
        if let Err(err) = cache::advise_evict(&encoded) {
            warn!(file = %file.source_name, error = %err, "eviction advisory failed");
        }
        for vol in tools::par2_volumes(&link).map_err(|e| StageError::Par2Create(e.to_string()))? {
            if let Err(err) = cache::advise_evict(&vol) {
                warn!(file = %file.source_name, error = %err, "eviction advisory failed");
            }
        }
        cache::wait_for_eviction(&encoded, sh.cfg.evict_timeout, sh.cfg.evict_poll)
            .await
            .map_err(|e| StageError::Evict(e.to_string()))?;
    }

    sh.tools
        .par2_verify(&link)
        .await
        .map_err(|e| StageError::Par2Verify(e.to_string()))?;
    info!(file = %file.source_name, "par2 set verified");

    Ok(())
}
