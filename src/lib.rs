//! taketake - verified transfer of wav recordings off removable media.
//!
//! Each source `.wav` is driven through speech recognition (to recover the
//! spoken timestamp at the head of the recording), interactive filename
//! curation, flac encoding, par2 parity generation, and an xdelta-based
//! byte-equivalence check against a second read of the medium. Only when a
//! file's parity set verifies *and* every file's cross-check has passed is
//! the source replaced by its compressed artifacts.
//!
//! # Architecture
//!
//! - Stage actors joined by bounded queues of file indices; closing a
//!   queue is the end-of-stream sentinel (`engine`).
//! - The filesystem is the source of truth for resumption: marker files in
//!   a `.taketake.<datestamp>` directory witness each completed substep
//!   (`progress`).
//! - Compression, parity, and diffing are external tools (`tools`);
//!   speech-to-text and the filename prompt are external collaborators
//!   behind seams (`speech`, `ui`).
//!
//! # Usage
//!
//! ```bash
//! # Transfer, wiping verified sources from the medium
//! taketake run /media/usb0 ~/recordings
//!
//! # Transfer without touching the medium
//! taketake run --keep-source /media/usb0 ~/recordings
//!
//! # Inspect an interrupted run
//! taketake status /media/usb0
//! ```

pub mod audio;
pub mod cache;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod name;
pub mod progress;
pub mod speech;
pub mod tools;
pub mod ui;

// Re-export the main types at the crate root for convenience.
pub use config::Config;
pub use domain::{FileInfo, SpokenStamp, Stage, StageError, StageStatus};
pub use engine::{Engine, FileOutcome, RunReport};
pub use ui::{FilenamePrompter, PromptReply, PromptRequest, ScriptedPrompter, TerminalPrompter};
