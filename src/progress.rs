//! On-disk progress state.
//!
//! The filesystem is the only source of truth for resumption: a top-level
//! `.taketake.<datestamp>` directory sits next to the source waveforms and
//! holds one scratch sub-directory per file. Marker files inside each
//! sub-directory witness completed substeps, so a fresh process can rebuild
//! everything it needs by looking at names alone. The in-memory state is a
//! cache of this layout, never the other way around.

use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use serde::Serialize;
use tracing::info;

/// Prefix of the top-level progress directory, completed by a datestamp.
pub const ROOT_PREFIX: &str = ".taketake.";

/// Datestamp format for the top-level directory name.
const ROOT_STAMP_FMT: &str = "%Y%m%d-%H%M-%a";

/// Names the source root this progress directory belongs to.
pub const SRC_MARKER: &str = ".src";

/// Contents = the guessed filename.
pub const FILENAME_GUESS: &str = ".filename_guess";

/// Contents = the operator-confirmed filename.
pub const FILENAME_PROVIDED: &str = ".filename_provided";

/// Partial encoder output; always discarded on resume.
pub const IN_PROGRESS_FLAC: &str = ".in_progress.flac";

/// Final encoded artifact; only ever appears via atomic rename.
pub const ENCODED_FLAC: &str = ".encoded.flac";

/// Diff artifact; zero-delta content witnesses the cross-check.
pub const XDELTA: &str = ".xdelta";

/// The top-level progress directory, held exclusively for the run.
#[derive(Debug)]
pub struct ProgressRoot {
    dir: PathBuf,
    src_root: PathBuf,
    _lock: std::fs::File,
}

impl ProgressRoot {
    /// Find the newest `.taketake.*` directory in the source root, if any.
    pub fn find_latest(src_root: &Path) -> io::Result<Option<PathBuf>> {
        let mut candidates = Vec::new();
        for entry in std::fs::read_dir(src_root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(ROOT_PREFIX) && entry.file_type()?.is_dir() {
                candidates.push(entry.path());
            }
        }
        // Datestamps sort lexicographically, so the maximum is the newest.
        candidates.sort();
        Ok(candidates.pop())
    }

    /// Create a fresh progress directory for this run.
    pub fn create(src_root: &Path) -> Result<Self> {
        let stamp = chrono::Local::now().format(ROOT_STAMP_FMT);
        let dir = src_root.join(format!("{ROOT_PREFIX}{stamp}"));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create progress dir {}", dir.display()))?;
        std::fs::write(dir.join(SRC_MARKER), src_root.display().to_string())
            .with_context(|| format!("failed to write {SRC_MARKER} in {}", dir.display()))?;
        info!(dir = %dir.display(), "created progress directory");
        Self::lock(dir, src_root.to_path_buf())
    }

    /// Re-open an existing progress directory, verifying it belongs to the
    /// same source root.
    pub fn open(dir: PathBuf, src_root: &Path) -> Result<Self> {
        let recorded = std::fs::read_to_string(dir.join(SRC_MARKER))
            .with_context(|| format!("failed to read {SRC_MARKER} in {}", dir.display()))?;
        let recorded = recorded.trim();
        if recorded != src_root.display().to_string() {
            bail!(
                "progress dir {} was created for source '{}', not '{}'",
                dir.display(),
                recorded,
                src_root.display()
            );
        }
        info!(dir = %dir.display(), "resuming from progress directory");
        Self::lock(dir, src_root.to_path_buf())
    }

    fn lock(dir: PathBuf, src_root: PathBuf) -> Result<Self> {
        let lock = std::fs::File::open(dir.join(SRC_MARKER))
            .with_context(|| format!("failed to open {SRC_MARKER} in {}", dir.display()))?;
        lock.try_lock_exclusive().with_context(|| {
            format!(
                "another taketake run holds the progress dir {}",
                dir.display()
            )
        })?;
        Ok(Self {
            dir,
            src_root,
            _lock: lock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn src_root(&self) -> &Path {
        &self.src_root
    }

    /// Names of the per-file sub-directories already present.
    pub fn file_dir_names(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Create (or reuse) the scratch sub-directory for one source file.
    pub fn ensure_file_dir(&self, basename: &str) -> io::Result<FileProgress> {
        let dir = self.dir.join(basename);
        std::fs::create_dir_all(&dir)?;
        Ok(FileProgress::new(dir))
    }

    /// Remove the whole progress directory; the terminal act of a fully
    /// successful run.
    pub fn remove(self) -> io::Result<()> {
        info!(dir = %self.dir.display(), "removing progress directory");
        std::fs::remove_dir_all(&self.dir)
    }
}

/// One file's scratch directory and its markers.
#[derive(Debug, Clone)]
pub struct FileProgress {
    pub dir: PathBuf,
}

impl FileProgress {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn marker(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn encoded_flac(&self) -> PathBuf {
        self.dir.join(ENCODED_FLAC)
    }

    pub fn in_progress_flac(&self) -> PathBuf {
        self.dir.join(IN_PROGRESS_FLAC)
    }

    pub fn xdelta(&self) -> PathBuf {
        self.dir.join(XDELTA)
    }

    /// Path of the `<provided>.flac` symlink for a confirmed name.
    pub fn link(&self, provided: &str) -> PathBuf {
        self.dir.join(format!("{provided}.flac"))
    }

    /// Read a text marker; absent or empty markers read as `None`.
    pub async fn read_marker(&self, name: &str) -> io::Result<Option<String>> {
        match tokio::fs::read_to_string(self.marker(name)).await {
            Ok(text) => {
                let text = text.trim().to_string();
                Ok(if text.is_empty() { None } else { Some(text) })
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Write a text marker atomically: temp file in the same directory,
    /// fsync, then rename into place.
    pub fn write_marker(&self, name: &str, contents: &str) -> io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.marker(name)).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Marker presence for one file, as reported by `taketake status`.
#[derive(Debug, Serialize)]
pub struct FileMarkers {
    pub name: String,
    pub guess: Option<String>,
    pub provided: Option<String>,
    pub encoded: bool,
    pub in_progress: bool,
    pub par2_volumes: usize,
    pub xdelta: bool,
}

/// Summarize the markers under an existing progress directory.
pub fn snapshot(root_dir: &Path) -> Result<Vec<FileMarkers>> {
    let mut out = Vec::new();
    let mut subdirs: Vec<PathBuf> = std::fs::read_dir(root_dir)
        .with_context(|| format!("failed to read {}", root_dir.display()))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    subdirs.sort();

    for dir in subdirs {
        let read = |marker: &str| -> Option<String> {
            std::fs::read_to_string(dir.join(marker))
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let par2_volumes = std::fs::read_dir(&dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_name().to_string_lossy().ends_with(".par2"))
                    .count()
            })
            .unwrap_or(0);

        out.push(FileMarkers {
            name: dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            guess: read(FILENAME_GUESS),
            provided: read(FILENAME_PROVIDED),
            encoded: dir.join(ENCODED_FLAC).exists(),
            in_progress: dir.join(IN_PROGRESS_FLAC).exists(),
            par2_volumes,
            xdelta: dir.join(XDELTA).exists(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_writes_src_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let root = ProgressRoot::create(tmp.path()).unwrap();

        let src = std::fs::read_to_string(root.dir().join(SRC_MARKER)).unwrap();
        assert_eq!(src, tmp.path().display().to_string());
        assert!(root
            .dir()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(ROOT_PREFIX));
    }

    #[test]
    fn find_latest_picks_newest_datestamp() {
        let tmp = tempfile::tempdir().unwrap();
        for stamp in ["20210101-0900-Fri", "20211106-1044-Sat", "20200612-2330-Fri"] {
            std::fs::create_dir(tmp.path().join(format!("{ROOT_PREFIX}{stamp}"))).unwrap();
        }
        // A stray file with the prefix must not win.
        std::fs::write(tmp.path().join(".taketake.99999999-0000-Sun"), b"").unwrap();

        let latest = ProgressRoot::find_latest(tmp.path()).unwrap().unwrap();
        assert!(latest
            .file_name()
            .unwrap()
            .to_string_lossy()
            .contains("20211106-1044"));
    }

    #[test]
    fn open_rejects_mismatched_source() {
        let tmp = tempfile::tempdir().unwrap();
        let root = ProgressRoot::create(tmp.path()).unwrap();
        let dir = root.dir().to_path_buf();
        drop(root);

        let err = ProgressRoot::open(dir, Path::new("/somewhere/else")).unwrap_err();
        assert!(err.to_string().contains("was created for source"));
    }

    #[test]
    fn second_opener_is_locked_out() {
        let tmp = tempfile::tempdir().unwrap();
        let root = ProgressRoot::create(tmp.path()).unwrap();
        let dir = root.dir().to_path_buf();

        let err = ProgressRoot::open(dir, tmp.path()).unwrap_err();
        assert!(err.to_string().contains("another taketake run"));
        drop(root);
    }

    #[tokio::test]
    async fn markers_read_back_and_empty_reads_as_none() {
        let tmp = tempfile::tempdir().unwrap();
        let root = ProgressRoot::create(tmp.path()).unwrap();
        let fp = root.ensure_file_dir("audio001.wav").unwrap();

        assert_eq!(fp.read_marker(FILENAME_GUESS).await.unwrap(), None);

        fp.write_marker(FILENAME_GUESS, "piano.20211106-104400-Sat.2m5s.audio001")
            .unwrap();
        assert_eq!(
            fp.read_marker(FILENAME_GUESS).await.unwrap().unwrap(),
            "piano.20211106-104400-Sat.2m5s.audio001"
        );

        fp.write_marker(FILENAME_PROVIDED, "").unwrap();
        assert_eq!(fp.read_marker(FILENAME_PROVIDED).await.unwrap(), None);
    }

    #[test]
    fn file_dirs_enumerate_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let root = ProgressRoot::create(tmp.path()).unwrap();
        root.ensure_file_dir("b.wav").unwrap();
        root.ensure_file_dir("a.wav").unwrap();
        assert_eq!(root.file_dir_names().unwrap(), vec!["a.wav", "b.wav"]);
    }

    #[test]
    fn remove_deletes_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let root = ProgressRoot::create(tmp.path()).unwrap();
        root.ensure_file_dir("a.wav").unwrap();
        let dir = root.dir().to_path_buf();
        root.remove().unwrap();
        assert!(!dir.exists());
        assert!(ProgressRoot::find_latest(tmp.path()).unwrap().is_none());
    }
}
