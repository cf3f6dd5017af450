//! Command-line interface for taketake.
//!
//! `run` drives a full transfer; `status` inspects the progress state an
//! interrupted run left behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::engine::{Engine, RunReport};
use crate::progress::{self, ProgressRoot};
use crate::ui::TerminalPrompter;

/// taketake - verified wav-to-flac transfer off removable media
#[derive(Parser, Debug)]
#[command(name = "taketake")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transfer all wav files from a source directory to a destination
    Run {
        /// Source directory (the removable medium)
        source: PathBuf,

        /// Destination directory for the flac + par2 sets
        dest: PathBuf,

        /// Never modify the source medium (no deletion, no flacs/ copies)
        #[arg(long)]
        keep_source: bool,

        /// Filename prefix, e.g. the instrument being recorded
        #[arg(long, alias = "prefix", default_value = "audio")]
        instrument: String,

        /// Speech-to-text command fed a waveform prefix on stdin
        #[arg(long, default_value = "taketake-stt")]
        stt_bin: PathBuf,

        /// Per-file speech recognition deadline in seconds
        #[arg(long, default_value_t = 120)]
        speech_timeout_secs: u64,

        /// Skip page-cache eviction gating (for non-evictable filesystems)
        #[arg(long)]
        no_evict_check: bool,

        /// flac encoder/decoder binary
        #[arg(long, default_value = "flac")]
        flac_bin: PathBuf,

        /// par2 creator/verifier binary
        #[arg(long, default_value = "par2")]
        par2_bin: PathBuf,

        /// xdelta3 differ binary
        #[arg(long, default_value = "xdelta3")]
        xdelta3_bin: PathBuf,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show per-file progress markers from the newest progress directory
    Status {
        /// Source directory to inspect
        source: PathBuf,

        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                source,
                dest,
                keep_source,
                instrument,
                stt_bin,
                speech_timeout_secs,
                no_evict_check,
                flac_bin,
                par2_bin,
                xdelta3_bin,
                json,
            } => {
                let mut cfg = Config::new(source, dest);
                cfg.modify_source = !keep_source;
                cfg.instrument = instrument;
                cfg.speech_bin = stt_bin;
                cfg.speech_timeout = Duration::from_secs(speech_timeout_secs);
                cfg.evict = !no_evict_check;
                cfg.flac_bin = flac_bin;
                cfg.par2_bin = par2_bin;
                cfg.xdelta3_bin = xdelta3_bin;
                run_transfer(cfg, json).await
            }
            Commands::Status { source, json } => show_status(&source, json),
        }
    }
}

async fn run_transfer(cfg: Config, json: bool) -> Result<()> {
    let engine = Engine::new(cfg, Arc::new(TerminalPrompter::new()));

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing in-flight work");
            cancel.cancel();
        }
    });

    let report = engine.run().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.all_ok() {
        bail!(
            "{} of {} file(s) failed{}; re-run to resume from the preserved progress directory",
            report.failed_count(),
            report.outcomes.len(),
            if report.aborted { " (run aborted)" } else { "" }
        );
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    if report.outcomes.is_empty() {
        println!("No wav files to transfer.");
        return;
    }
    println!("{:<28} {:<10} {}", "SOURCE", "RESULT", "DETAIL");
    for o in &report.outcomes {
        let (result, detail) = if o.ok {
            (
                "ok",
                o.final_name
                    .as_ref()
                    .map(|n| format!("{n}.flac"))
                    .unwrap_or_default(),
            )
        } else {
            (
                "FAILED",
                format!(
                    "{} in {}: {}",
                    o.error_kind.unwrap_or("?"),
                    o.failed_stage.unwrap_or("?"),
                    o.error.as_deref().unwrap_or("")
                ),
            )
        };
        println!("{:<28} {:<10} {}", o.source, result, detail);
    }
}

fn show_status(source: &Path, json: bool) -> Result<()> {
    let src_root = source
        .canonicalize()
        .with_context(|| format!("source directory {} not accessible", source.display()))?;
    let Some(dir) = ProgressRoot::find_latest(&src_root)
        .with_context(|| format!("failed to scan {}", src_root.display()))?
    else {
        println!("No progress directory under {}.", src_root.display());
        return Ok(());
    };

    let files = progress::snapshot(&dir)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&files)?);
        return Ok(());
    }

    println!("Progress: {}", dir.display());
    println!(
        "{:<28} {:<7} {:<7} {:<9} {:<6} {}",
        "FILE", "GUESS", "NAME", "ENCODED", "PAR2", "XDELTA"
    );
    for f in files {
        println!(
            "{:<28} {:<7} {:<7} {:<9} {:<6} {}",
            f.name,
            tick(f.guess.is_some()),
            tick(f.provided.is_some()),
            if f.in_progress {
                "partial"
            } else {
                tick(f.encoded)
            },
            f.par2_volumes,
            tick(f.xdelta),
        );
    }
    Ok(())
}

fn tick(present: bool) -> &'static str {
    if present {
        "yes"
    } else {
        "-"
    }
}
