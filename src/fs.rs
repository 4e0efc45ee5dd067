//! The interface between the engine and the file system.

use anyhow::{anyhow, Context};
use std::time::UNIX_EPOCH;

/// MTime info gathered for a file.  This also models "file is absent".
/// Stamps are nanoseconds since the epoch; `Missing` orders before any stamp
/// so mtime comparisons read naturally.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MTime {
    Missing,
    Stamp(i64),
}

/// Result of reading a file; "not found" is interesting to callers (a
/// missing depfile just means a rebuild) while other errors are fatal.
pub enum ReadFile {
    Okay(Vec<u8>),
    NotFound,
    Err(anyhow::Error),
}

/// Disk operations used by the scanner and builder.  `Sync` because the
/// scan's pre-stat phase may call `stat`/`lstat` from worker threads when
/// `is_stat_thread_safe` says that's allowed.
pub trait DiskInterface: Sync {
    /// stat() an on-disk path, producing its mtime.
    fn stat(&self, path: &str) -> anyhow::Result<MTime>;
    /// stat() without following symlinks; also reports whether the path is a
    /// directory.  Used for generated outputs, which must not be
    /// dereferenced when they are symlinks.
    fn lstat(&self, path: &str) -> anyhow::Result<(MTime, bool)>;
    fn read_file(&self, path: &str) -> ReadFile;
    fn write_file(&self, path: &str, content: &[u8]) -> anyhow::Result<()>;
    /// Remove a file; removing an already-missing file is not an error.
    fn remove_file(&self, path: &str) -> anyhow::Result<()>;
    /// Create the directories leading up to `path`.
    fn make_dirs(&self, path: &str) -> anyhow::Result<()>;
    fn is_stat_thread_safe(&self) -> bool;
}

/// The real file system.
pub struct RealDisk;

fn mtime_of(meta: &std::fs::Metadata) -> MTime {
    let nanos = match meta.modified() {
        Ok(time) => match time.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_nanos() as i64,
            Err(_) => 0,
        },
        Err(_) => 0,
    };
    MTime::Stamp(nanos)
}

impl DiskInterface for RealDisk {
    fn stat(&self, path: &str) -> anyhow::Result<MTime> {
        match std::fs::metadata(path) {
            Ok(meta) => Ok(mtime_of(&meta)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(MTime::Missing),
            Err(err) => Err(anyhow!("stat {}: {}", path, err)),
        }
    }

    fn lstat(&self, path: &str) -> anyhow::Result<(MTime, bool)> {
        match std::fs::symlink_metadata(path) {
            Ok(meta) => Ok((mtime_of(&meta), meta.is_dir())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok((MTime::Missing, false)),
            Err(err) => Err(anyhow!("lstat {}: {}", path, err)),
        }
    }

    fn read_file(&self, path: &str) -> ReadFile {
        match std::fs::read(path) {
            Ok(content) => ReadFile::Okay(content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => ReadFile::NotFound,
            Err(err) => ReadFile::Err(anyhow!("read {}: {}", path, err)),
        }
    }

    fn write_file(&self, path: &str, content: &[u8]) -> anyhow::Result<()> {
        std::fs::write(path, content).with_context(|| format!("write {}", path))
    }

    fn remove_file(&self, path: &str) -> anyhow::Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(anyhow!("remove {}: {}", path, err)),
        }
    }

    fn make_dirs(&self, path: &str) -> anyhow::Result<()> {
        match std::path::Path::new(path).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                std::fs::create_dir_all(parent).with_context(|| format!("mkdir {}", parent.display()))
            }
            _ => Ok(()),
        }
    }

    fn is_stat_thread_safe(&self) -> bool {
        true
    }
}
