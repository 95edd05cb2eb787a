//! Advisory-lock + fsync discipline shared by every persisted structure.
//!
//! Every atomic write is temp-write → fsync → rename; every append is
//! write → fsync while holding an advisory exclusive lock on the target
//! file. All mutating calls across the tracker, WAL, and checkpoint manager
//! route through these two helpers so the discipline is enforced in one
//! place rather than re-implemented per component.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use fs2::FileExt;

/// Atomically replace `path`'s contents with `contents`.
///
/// Writes to a sibling `.tmp` file, fsyncs it, then renames over `path`.
/// Rename is the commit point: `path` either shows the old content or the
/// new content in full, never a partial write.
pub fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    let result = (|| -> std::io::Result<()> {
        let mut f = File::create(&tmp_path)?;
        f.lock_exclusive()?;
        f.write_all(contents)?;
        f.flush()?;
        f.sync_all()?;
        FileExt::unlock(&f)?;
        drop(f);
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// Append `line` (without a trailing newline) plus `\n` to `path`, holding
/// an exclusive advisory lock for the duration of the write and fsyncing
/// before releasing it.
///
/// Returns the byte length of the file after the append, so callers can
/// decide whether the write crossed a rotation threshold.
pub fn append_locked(path: &Path, line: &[u8]) -> std::io::Result<u64> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    f.lock_exclusive()?;
    let result = (|| -> std::io::Result<u64> {
        f.write_all(line)?;
        f.write_all(b"\n")?;
        f.flush()?;
        f.sync_all()?;
        f.metadata().map(|m| m.len())
    })();
    let _ = FileExt::unlock(&f);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn atomic_write_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.json");
        atomic_write(&path, b"hello").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn atomic_write_overwrites() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.json");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn atomic_write_leaves_no_tmp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.json");
        atomic_write(&path, b"hello").unwrap();
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn append_locked_accumulates_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        append_locked(&path, b"{\"a\":1}").unwrap();
        append_locked(&path, b"{\"a\":2}").unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "{\"a\":1}\n{\"a\":2}\n");
    }

    #[test]
    fn append_locked_reports_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let size = append_locked(&path, b"1234").unwrap();
        assert_eq!(size, 5);
    }
}
