//! Run initialization: source discovery and progress-state resumption.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::{FileInfo, FileState, SpokenStamp};
use crate::name;
use crate::progress::{ProgressRoot, FILENAME_GUESS, FILENAME_PROVIDED};

/// Everything setup hands to the pipeline.
#[derive(Debug)]
pub(crate) struct SetupOutput {
    pub root: ProgressRoot,
    pub files: Vec<FileInfo>,
}

/// Discover source files and build the shared `FileInfo` vector, resuming
/// from the newest progress directory when one exists.
///
/// Any failure here is fatal; the pipeline is not started.
pub(crate) async fn discover(cfg: &Config) -> Result<SetupOutput> {
    let src_root = tokio::fs::canonicalize(&cfg.source)
        .await
        .with_context(|| format!("source directory {} not accessible", cfg.source.display()))?;
    if !tokio::fs::metadata(&src_root)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        bail!("source {} is not a directory", src_root.display());
    }

    tokio::fs::create_dir_all(&cfg.dest)
        .await
        .with_context(|| format!("failed to create destination {}", cfg.dest.display()))?;

    let root = match ProgressRoot::find_latest(&src_root)
        .with_context(|| format!("failed to scan {} for progress dirs", src_root.display()))?
    {
        Some(dir) => ProgressRoot::open(dir, &src_root)?,
        None => ProgressRoot::create(&src_root)?,
    };

    // Union of the wavs on the medium and the per-file progress dirs left
    // by an interrupted run (whose sources may already be gone).
    let mut basenames: BTreeSet<String> = BTreeSet::new();
    let mut entries = tokio::fs::read_dir(&src_root)
        .await
        .with_context(|| format!("failed to read {}", src_root.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_wav(&path) && entry.file_type().await?.is_file() {
            basenames.insert(entry.file_name().to_string_lossy().into_owned());
        }
    }
    for name in root.file_dir_names().context("failed to list progress dirs")? {
        basenames.insert(name);
    }

    let mut files = Vec::with_capacity(basenames.len());
    for (index, basename) in basenames.into_iter().enumerate() {
        let source_path = src_root.join(&basename);
        let (source_size, source_mtime) = match tokio::fs::metadata(&source_path).await {
            Ok(meta) => (meta.len(), meta.modified().ok()),
            Err(_) => {
                warn!(file = %basename, "source wav missing, resuming from progress state");
                (0, None)
            }
        };

        let progress = root
            .ensure_file_dir(&basename)
            .with_context(|| format!("failed to create progress dir for {basename}"))?;

        let mut state = FileState::default();
        state.guessed_filename = progress
            .read_marker(FILENAME_GUESS)
            .await
            .with_context(|| format!("failed to read {FILENAME_GUESS} for {basename}"))?;
        state.provided_filename = progress
            .read_marker(FILENAME_PROVIDED)
            .await
            .with_context(|| format!("failed to read {FILENAME_PROVIDED} for {basename}"))?;
        if let Some(guess) = &state.guessed_filename {
            state.guessed_timestamp = name::find_stamp(guess).map(|s| SpokenStamp {
                when: s.when,
                confident: s.confident,
            });
        }

        files.push(FileInfo::new(
            index,
            source_path,
            basename,
            source_size,
            source_mtime,
            progress,
            state,
        ));
    }

    info!(
        files = files.len(),
        progress_dir = %root.dir().display(),
        "setup complete"
    );
    Ok(SetupOutput { root, files })
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_config(tmp: &tempfile::TempDir) -> Config {
        Config::new(tmp.path().join("src"), tmp.path().join("dest"))
    }

    async fn prime_source(tmp: &tempfile::TempDir, names: &[&str]) {
        tokio::fs::create_dir_all(tmp.path().join("src")).await.unwrap();
        for name in names {
            tokio::fs::write(tmp.path().join("src").join(name), b"RIFFfake")
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn fresh_run_scans_wavs_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        prime_source(&tmp, &["b.wav", "a.WAV", "notes.txt"]).await;

        let out = discover(&test_config(&tmp)).await.unwrap();
        let names: Vec<_> = out.files.iter().map(|f| f.source_name.clone()).collect();
        assert_eq!(names, vec!["a.WAV", "b.wav"]);
        assert_eq!(out.files[0].index, 0);
        assert!(out.files[0].progress.dir.exists());
        assert!(tmp.path().join("dest").exists());
    }

    #[tokio::test]
    async fn resume_loads_markers_and_missing_sources() {
        let tmp = tempfile::tempdir().unwrap();
        prime_source(&tmp, &["a.wav"]).await;
        let cfg = test_config(&tmp);

        // First discovery creates the progress dir; commit a guess, then
        // simulate a later phase having deleted a source covered by a
        // second progress sub-directory.
        let first = discover(&cfg).await.unwrap();
        first.files[0]
            .progress
            .write_marker(FILENAME_GUESS, "piano.20211106-104400-Sat.2m.a")
            .unwrap();
        first.root.ensure_file_dir("gone.wav").unwrap();
        drop(first);

        let out = discover(&cfg).await.unwrap();
        let names: Vec<_> = out.files.iter().map(|f| f.source_name.clone()).collect();
        assert_eq!(names, vec!["a.wav", "gone.wav"]);

        let st = out.files[0].state().await;
        assert_eq!(
            st.guessed_filename.as_deref(),
            Some("piano.20211106-104400-Sat.2m.a")
        );
        let stamp = st.guessed_timestamp.unwrap();
        assert_eq!(stamp.when.to_string(), "2021-11-06 10:44:00");
        assert!(stamp.confident);
        drop(st);

        assert_eq!(out.files[1].source_size, 0);
        assert!(out.files[1].source_mtime.is_none());
    }

    #[tokio::test]
    async fn mismatched_src_marker_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        prime_source(&tmp, &["a.wav"]).await;
        let cfg = test_config(&tmp);

        let first = discover(&cfg).await.unwrap();
        std::fs::write(
            first.root.dir().join(crate::progress::SRC_MARKER),
            "/somewhere/else",
        )
        .unwrap();
        drop(first);

        let err = discover(&cfg).await.unwrap_err();
        assert!(err.to_string().contains("was created for source"));
    }

    #[tokio::test]
    async fn missing_source_dir_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = Config::new(tmp.path().join("absent"), PathBuf::from("/dev/null/d"));
        assert!(discover(&cfg).await.is_err());
    }

    #[tokio::test]
    async fn zero_wavs_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        prime_source(&tmp, &[]).await;
        let out = discover(&test_config(&tmp)).await.unwrap();
        assert!(out.files.is_empty());
    }
}
