//! Engine configuration.
//!
//! Everything an operator can influence lives here; the CLI fills a
//! [`Config`] from its flags and hands it to the engine. Defaults follow
//! the companion recognizer setup: a 90 s speech prefix, a two-volume 5 %
//! par2 set, and tools resolved from `PATH`.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one transfer run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the source `.wav` files (the removable medium).
    pub source: PathBuf,

    /// Destination directory for the final `.flac` + par2 sets.
    pub dest: PathBuf,

    /// When true, sources are deleted and `flacs/` copies are left on the
    /// medium after verification. When false the medium is never written.
    pub modify_source: bool,

    /// Prefix for generated filenames, e.g. the instrument being recorded.
    pub instrument: String,

    /// External speech-to-text command and extra arguments.
    pub speech_bin: PathBuf,
    pub speech_args: Vec<String>,

    /// Per-file deadline for one recognition attempt.
    pub speech_timeout: Duration,

    /// Retries after a failed or timed-out recognition attempt.
    pub speech_retries: u32,

    /// Seconds of waveform fed to the recognizer.
    pub speech_scan_secs: f64,

    /// Longest acceptable distance between the confirmed timestamp and the
    /// guess.
    pub prompt_window: chrono::Duration,

    /// Gate the destructive steps on page-cache eviction of what they are
    /// about to trust. Disable on filesystems that cannot evict (tmpfs).
    pub evict: bool,
    pub evict_timeout: Duration,
    pub evict_poll: Duration,

    /// par2 set shape: volume count and per-volume redundancy.
    pub par2_volumes: u32,
    pub par2_redundancy: u32,
    pub par2_base_blocksize: u64,
    pub par2_max_blocks: u64,

    /// External tool binaries.
    pub flac_bin: PathBuf,
    pub par2_bin: PathBuf,
    pub xdelta3_bin: PathBuf,
}

impl Config {
    /// A configuration with the standard defaults for the given source and
    /// destination.
    pub fn new(source: PathBuf, dest: PathBuf) -> Self {
        Self {
            source,
            dest,
            modify_source: true,
            instrument: "audio".to_string(),
            speech_bin: PathBuf::from("taketake-stt"),
            speech_args: Vec::new(),
            speech_timeout: Duration::from_secs(120),
            speech_retries: 1,
            speech_scan_secs: 90.0,
            prompt_window: chrono::Duration::hours(24),
            evict: true,
            evict_timeout: Duration::from_secs(30),
            evict_poll: Duration::from_millis(500),
            par2_volumes: 2,
            par2_redundancy: 5,
            par2_base_blocksize: 4096,
            par2_max_blocks: 10_000,
            flac_bin: PathBuf::from("flac"),
            par2_bin: PathBuf::from("par2"),
            xdelta3_bin: PathBuf::from("xdelta3"),
        }
    }
}
