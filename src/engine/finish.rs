//! The `finish` terminator: drain, report, and retire the progress root.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::domain::{Stage, StageStatus};
use crate::progress::ProgressRoot;

use super::report::{FileOutcome, RunReport};
use super::runtime::{Shared, TokenReceiver};

/// Consume the cleanup output, build the run report, and remove the
/// top-level progress directory iff every file succeeded.
pub(crate) async fn run(
    sh: Arc<Shared>,
    mut rx: TokenReceiver,
    root: ProgressRoot,
) -> Result<RunReport> {
    while let Some(token) = rx.recv().await {
        let file = sh.file(token.index);
        let mut st = file.state().await;
        if !st.failed() {
            st.set_status(Stage::Finish, StageStatus::Complete);
        }
    }

    let mut outcomes = Vec::with_capacity(sh.files.len());
    for file in &sh.files {
        let st = file.state().await;
        let (failed_stage, error_kind, error) = match &st.error {
            Some((stage, err)) => (Some(stage.as_str()), Some(err.kind()), Some(err.to_string())),
            None => (None, None, None),
        };
        outcomes.push(FileOutcome {
            source: file.source_name.clone(),
            final_name: st.provided_filename.clone(),
            ok: st.error.is_none(),
            failed_stage,
            error_kind,
            error,
        });
    }

    let aborted = sh.cancel.is_cancelled();
    let mut report = RunReport {
        outcomes,
        aborted,
        progress_removed: false,
    };

    if report.all_ok() {
        let dir = root.dir().to_path_buf();
        root.remove()
            .with_context(|| format!("failed to remove progress dir {}", dir.display()))?;
        report.progress_removed = true;
        info!(files = report.outcomes.len(), "run complete");
    } else {
        warn!(
            failed = report.failed_count(),
            aborted,
            progress_dir = %root.dir().display(),
            "run incomplete; progress preserved for resumption"
        );
    }

    Ok(report)
}
