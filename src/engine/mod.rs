//! The pipeline engine.
//!
//! Stage tasks linked by bounded queues drive each source file through
//! recognition, curation, encoding, parity, cross-verification, and
//! destructive replacement:
//!
//! ```text
//! setup ─┬─► listen ──► prompt ─────────────► pargen ──► cleanup ──► finish
//!        └─► flacenc ──┬─────────────────────────►│
//!                      └─► xdelta ──All(xdelta)──►│
//! ```
//!
//! Queue closure is the end-of-stream sentinel; `cleanup` additionally
//! waits for the whole `xdelta` stage to terminate before its first
//! destructive step, so no source is deleted while any cross-check is
//! still outstanding.

mod cleanup;
mod encode;
mod finish;
mod listen;
mod pargen;
mod prompt;
mod report;
mod runtime;
mod setup;
mod xdelta;

pub use report::{FileOutcome, RunReport};

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Config;
use crate::tools::Tools;
use crate::ui::FilenamePrompter;

use runtime::{queue, Shared, Token};

/// One configured transfer run.
pub struct Engine {
    cfg: Config,
    prompter: Arc<dyn FilenamePrompter>,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(cfg: Config, prompter: Arc<dyn FilenamePrompter>) -> Self {
        Self {
            cfg,
            prompter,
            cancel: CancellationToken::new(),
        }
    }

    /// Token an interrupt handler can cancel; stages finish their current
    /// file, flush, and forward the rest as aborted.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the pipeline to completion and report per-file outcomes.
    ///
    /// Setup problems and queue/runtime breakage return `Err`; per-file
    /// failures are recorded in the [`RunReport`] instead.
    pub async fn run(&self) -> Result<RunReport> {
        let setup = setup::discover(&self.cfg)
            .await
            .context("setup failed; pipeline not started")?;
        let file_count = setup.files.len();

        let shared = Arc::new(Shared {
            tools: Tools::from_config(&self.cfg),
            cfg: self.cfg.clone(),
            prompter: self.prompter.clone(),
            cancel: self.cancel.clone(),
            files: setup.files,
        });

        // One queue per graph edge.
        let (listen_tx, listen_rx) = queue();
        let (encode_tx, encode_rx) = queue();
        let (prompt_tx, prompt_rx) = queue();
        let (pargen_prompt_tx, pargen_prompt_rx) = queue();
        let (pargen_encode_tx, pargen_encode_rx) = queue();
        let (xdelta_tx, xdelta_rx) = queue();
        let (xdelta_done_tx, xdelta_done_rx) = queue();
        let (cleanup_tx, cleanup_rx) = queue();
        let (finish_tx, finish_rx) = queue();

        let stages = vec![
            (
                "listen",
                tokio::spawn(listen::run(shared.clone(), listen_rx, prompt_tx)),
            ),
            (
                "prompt",
                tokio::spawn(prompt::run(shared.clone(), prompt_rx, pargen_prompt_tx)),
            ),
            (
                "flacenc",
                tokio::spawn(encode::run(
                    shared.clone(),
                    encode_rx,
                    xdelta_tx,
                    pargen_encode_tx,
                )),
            ),
            (
                "pargen",
                tokio::spawn(pargen::run(
                    shared.clone(),
                    pargen_prompt_rx,
                    pargen_encode_rx,
                    cleanup_tx,
                )),
            ),
            (
                "xdelta",
                tokio::spawn(xdelta::run(shared.clone(), xdelta_rx, xdelta_done_tx)),
            ),
            (
                "cleanup",
                tokio::spawn(cleanup::run(
                    shared.clone(),
                    cleanup_rx,
                    xdelta_done_rx,
                    finish_tx,
                )),
            ),
        ];

        // Setup's tail: emit every index onto both head queues, then close
        // them. Dedicated feeders keep a slow head stage from starving the
        // other branch.
        let feeders = [
            tokio::spawn(feed(listen_tx, file_count)),
            tokio::spawn(feed(encode_tx, file_count)),
        ];

        let report = finish::run(shared.clone(), finish_rx, setup.root).await?;

        for feeder in feeders {
            feeder.await.context("feeder task panicked")?;
        }
        for (stage_name, handle) in stages {
            handle
                .await
                .with_context(|| format!("{stage_name} stage panicked"))?
                .with_context(|| format!("{stage_name} stage failed"))?;
        }

        Ok(report)
    }
}

async fn feed(tx: runtime::TokenSender, count: usize) {
    for index in 0..count {
        if tx.send(Token::new(index)).await.is_err() {
            warn!(index, "pipeline head queue closed early");
            break;
        }
    }
}
