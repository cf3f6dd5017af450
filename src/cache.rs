//! Page-cache advisories and residency checks.
//!
//! The cross-verification stages must read back what landed on the medium,
//! not what the kernel still holds in memory. Files are flushed and advised
//! out of the page cache, then polled with `mincore` until no page remains
//! resident. Platforms without these advisories degrade to a no-op and the
//! residency gate is skipped with a warning.

use std::fs::File;
use std::io;
use std::path::Path;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, TimeZone};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum EvictError {
    #[error("failed to inspect {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("{path} still has {resident} of {total} pages resident after {waited:?}")]
    StillResident {
        path: String,
        resident: usize,
        total: usize,
        waited: Duration,
    },
}

/// Flush the file and ask the kernel to drop its cached pages.
///
/// Returns `Ok(false)` on platforms without `posix_fadvise`.
#[cfg(target_os = "linux")]
pub fn advise_evict(path: &Path) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let file = File::open(path)?;
    file.sync_all()?;
    // Safety: the fd comes from a live `File`, and `posix_fadvise` neither
    // retains pointers nor mutates Rust-owned memory.
    let rc = unsafe { libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_DONTNEED) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(true)
}

#[cfg(not(target_os = "linux"))]
pub fn advise_evict(_path: &Path) -> io::Result<bool> {
    Ok(false)
}

/// Count `(resident, total)` pages of the file, or `None` where `mincore`
/// is unavailable.
#[cfg(target_os = "linux")]
pub fn resident_pages(path: &Path) -> io::Result<Option<(usize, usize)>> {
    use std::os::unix::io::AsRawFd;

    let file = File::open(path)?;
    let len = file.metadata()?.len() as usize;
    if len == 0 {
        return Ok(Some((0, 0)));
    }

    // Safety: we map the file read-only for the duration of the mincore
    // query and unmap before returning; `vec` is sized to one byte per
    // page as mincore requires.
    unsafe {
        let addr = libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            0,
        );
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let page = libc::sysconf(libc::_SC_PAGESIZE) as usize;
        let pages = len.div_ceil(page);
        let mut vec = vec![0u8; pages];
        let rc = libc::mincore(addr, len, vec.as_mut_ptr());
        let result = if rc == 0 {
            Ok(Some((
                vec.iter().filter(|b| (**b & 1) != 0).count(),
                pages,
            )))
        } else {
            Err(io::Error::last_os_error())
        };
        libc::munmap(addr, len);
        result
    }
}

#[cfg(not(target_os = "linux"))]
pub fn resident_pages(_path: &Path) -> io::Result<Option<(usize, usize)>> {
    Ok(None)
}

/// Poll until the file has no resident pages, advising eviction on each
/// round, bounded by `deadline`.
pub async fn wait_for_eviction(
    path: &Path,
    deadline: Duration,
    poll: Duration,
) -> Result<(), EvictError> {
    let as_io = |source: io::Error| EvictError::Io {
        path: path.display().to_string(),
        source,
    };

    let start = std::time::Instant::now();
    loop {
        match resident_pages(path).map_err(as_io)? {
            None => {
                warn!(path = %path.display(), "page residency check unsupported here, skipping");
                return Ok(());
            }
            Some((0, _)) => return Ok(()),
            Some((resident, total)) => {
                if start.elapsed() >= deadline {
                    return Err(EvictError::StillResident {
                        path: path.display().to_string(),
                        resident,
                        total,
                        waited: start.elapsed(),
                    });
                }
                if let Err(err) = advise_evict(path) {
                    warn!(path = %path.display(), error = %err, "eviction advisory failed");
                }
                tokio::time::sleep(poll).await;
            }
        }
    }
}

/// Stamp a file's mtime with a local wall-clock time.
pub fn set_mtime(path: &Path, when: NaiveDateTime) -> io::Result<()> {
    let local = Local
        .from_local_datetime(&when)
        .earliest()
        .unwrap_or_else(|| Local.from_utc_datetime(&when));
    let ft = filetime::FileTime::from_unix_time(local.timestamp(), 0);
    filetime::set_file_mtime(path, ft)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtime_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"data").unwrap();

        let when = chrono::NaiveDate::from_ymd_opt(2021, 11, 6)
            .unwrap()
            .and_hms_opt(10, 44, 0)
            .unwrap();
        set_mtime(&path, when).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        let got = filetime::FileTime::from_last_modification_time(&meta);
        let expected = Local
            .from_local_datetime(&when)
            .earliest()
            .unwrap()
            .timestamp();
        assert_eq!(got.unix_seconds(), expected);
    }

    #[test]
    fn empty_file_counts_as_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();
        if let Some((resident, total)) = resident_pages(&path).unwrap() {
            assert_eq!((resident, total), (0, 0));
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn resident_pages_counts_plausibly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, vec![7u8; 8192]).unwrap();

        let (resident, total) = resident_pages(&path).unwrap().unwrap();
        assert!(total >= 1);
        assert!(resident <= total);
    }
}
