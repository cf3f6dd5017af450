//! Data structures shared across the pipeline.
//!
//! A [`FileInfo`] is created per source `.wav` at setup and indexed into a
//! shared vector; stages pass the indices between themselves and mutate only
//! the interior [`FileState`] of the file they currently hold.

mod error;
mod file;

pub use error::StageError;
pub use file::{FileInfo, FileState, SpokenStamp, Stage, StageStatus};
