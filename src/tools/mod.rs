//! External tool invocations.
//!
//! The engine never re-implements compression, parity, or diffing; it
//! drives the `flac`, `par2`, and `xdelta3` binaries as child processes and
//! interprets their exit status and output. All paths are configurable so
//! tests can substitute stand-ins.

pub mod vcdiff;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::Config;
use crate::speech::SpeechTool;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with code {code}: {stderr}")]
    Failed {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("{tool} io error: {source}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no par2 volumes found next to {0}")]
    MissingPar2(PathBuf),
}

/// par2 sizing knobs, lifted out of [`Config`] for the create call.
#[derive(Debug, Clone, Copy)]
pub struct Par2Settings {
    pub volumes: u32,
    pub redundancy_percent: u32,
    pub base_blocksize: u64,
    pub max_blocks: u64,
}

/// Handles to the external tools for one run.
#[derive(Debug, Clone)]
pub struct Tools {
    flac: PathBuf,
    par2: PathBuf,
    xdelta3: PathBuf,
    pub speech: SpeechTool,
    par2_settings: Par2Settings,
}

impl Tools {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            flac: cfg.flac_bin.clone(),
            par2: cfg.par2_bin.clone(),
            xdelta3: cfg.xdelta3_bin.clone(),
            speech: SpeechTool::new(
                cfg.speech_bin.clone(),
                cfg.speech_args.clone(),
                cfg.speech_timeout,
                cfg.speech_retries,
            ),
            par2_settings: Par2Settings {
                volumes: cfg.par2_volumes,
                redundancy_percent: cfg.par2_redundancy,
                base_blocksize: cfg.par2_base_blocksize,
                max_blocks: cfg.par2_max_blocks,
            },
        }
    }

    /// Encode a wav into a flac at the given output path.
    pub async fn flac_encode(&self, wav: &Path, out: &Path) -> Result<(), ToolError> {
        run_checked(
            Command::new(&self.flac)
                .arg(wav)
                .arg("-o")
                .arg(out),
            "flac",
        )
        .await
        .map(|_| ())
    }

    /// Decode a flac to stdout, diff it against `base` with xdelta3, and
    /// write the delta to `out`.
    ///
    /// The decoder's write end is handed to the differ and our copy is
    /// dropped, so the decoder sees SIGPIPE if the differ exits early.
    pub async fn xdelta_diff(&self, flac: &Path, base: &Path, out: &Path) -> Result<(), ToolError> {
        let as_io = |tool: &str| {
            let tool = tool.to_string();
            move |source: std::io::Error| ToolError::Io { tool, source }
        };

        let mut decoder = Command::new(&self.flac)
            .arg("-c")
            .arg("-d")
            .arg(flac)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                tool: "flac".into(),
                source,
            })?;

        let decoded = decoder.stdout.take().ok_or_else(|| ToolError::Io {
            tool: "flac".into(),
            source: std::io::Error::other("decoder stdout not captured"),
        })?;
        let decoded: std::os::fd::OwnedFd = decoded.into_owned_fd().map_err(as_io("flac"))?;

        let delta_file = std::fs::File::create(out).map_err(as_io("xdelta3"))?;

        let mut differ = Command::new(&self.xdelta3)
            .arg("-s")
            .arg(base)
            .stdin(Stdio::from(decoded))
            .stdout(Stdio::from(delta_file))
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                tool: "xdelta3".into(),
                source,
            })?;

        let differ_status = differ.wait().await.map_err(as_io("xdelta3"))?;
        let decoder_status = decoder.wait().await.map_err(as_io("flac"))?;

        if !differ_status.success() {
            return Err(ToolError::Failed {
                tool: "xdelta3".into(),
                code: differ_status.code().unwrap_or(-1),
                stderr: String::new(),
            });
        }
        if !decoder_status.success() {
            return Err(ToolError::Failed {
                tool: "flac".into(),
                code: decoder_status.code().unwrap_or(-1),
                stderr: String::new(),
            });
        }
        Ok(())
    }

    /// Run `xdelta3 printdelta` and return its raw output for inspection.
    pub async fn xdelta_printdelta(
        &self,
        xdelta: &Path,
    ) -> Result<std::process::Output, ToolError> {
        Command::new(&self.xdelta3)
            .arg("printdelta")
            .arg(xdelta)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ToolError::Spawn {
                tool: "xdelta3".into(),
                source,
            })
    }

    /// Create a par2 volume set for `file` and delete the redundant base
    /// `.par2`.
    pub async fn par2_create(&self, file: &Path) -> Result<(), ToolError> {
        let as_io = |source: std::io::Error| ToolError::Io {
            tool: "par2".into(),
            source,
        };
        let size = tokio::fs::metadata(file).await.map_err(as_io)?.len();
        let s = &self.par2_settings;
        let blocksize = par2_block_size(size, s.volumes, s.redundancy_percent, s.base_blocksize, s.max_blocks);
        debug!(file = %file.display(), size, blocksize, "creating par2 set");

        run_checked(
            Command::new(&self.par2)
                .arg("create")
                .arg(format!("-s{blocksize}"))
                .arg(format!("-r{}", s.redundancy_percent))
                .arg(format!("-n{}", s.volumes))
                .arg("-u")
                .arg(file),
            "par2",
        )
        .await?;

        // The vol*.par2 files carry the same recovery data; the base file
        // is clutter.
        let base = par2_base_path(file);
        match tokio::fs::remove_file(&base).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(as_io(source)),
        }
    }

    /// Verify the file covered by its par2 volume set.
    pub async fn par2_verify(&self, file: &Path) -> Result<(), ToolError> {
        let par2 = related_par2_file(file)?;
        run_checked(
            Command::new(&self.par2).arg("verify").arg("-q").arg(&par2),
            "par2",
        )
        .await
        .map(|_| ())
    }
}

async fn run_checked(
    cmd: &mut Command,
    tool: &'static str,
) -> Result<std::process::Output, ToolError> {
    let output = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ToolError::Spawn {
            tool: tool.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(ToolError::Failed {
            tool: tool.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

/// `<file>.par2`, the base file par2 creates beside the volumes.
fn par2_base_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_os_string();
    name.push(".par2");
    PathBuf::from(name)
}

/// Enumerate `<file>.vol*.par2` next to the given file, sorted.
pub fn par2_volumes(file: &Path) -> Result<Vec<PathBuf>, ToolError> {
    let pattern = format!("{}.vol*.par2", glob::Pattern::escape(&file.display().to_string()));
    let mut vols: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| ToolError::Io {
            tool: "par2".into(),
            source: std::io::Error::other(e),
        })?
        .filter_map(|entry| entry.ok())
        .collect();
    vols.sort();
    Ok(vols)
}

/// Pick a file to hand `par2 verify`: the file's own `.par2` set.
fn related_par2_file(file: &Path) -> Result<PathBuf, ToolError> {
    if file.extension().map(|e| e == "par2").unwrap_or(false) {
        return Ok(file.to_path_buf());
    }
    let vols = par2_volumes(file)?;
    vols.into_iter()
        .next()
        .ok_or_else(|| ToolError::MissingPar2(file.to_path_buf()))
}

/// Smallest multiple of `base` that keeps the block count under
/// `max_blocks` for the requested redundancy.
pub fn par2_block_size(
    file_size: u64,
    volumes: u32,
    redundancy_percent: u32,
    base: u64,
    max_blocks: u64,
) -> u64 {
    let par_bytes = file_size * volumes as u64 * redundancy_percent as u64 / 100;
    let min_blocksize = par_bytes / max_blocks.max(1);
    let rounded = min_blocksize.div_ceil(base.max(1)) * base.max(1);
    if rounded == 0 {
        base
    } else {
        rounded
    }
}
