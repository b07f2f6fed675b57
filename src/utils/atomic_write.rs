//! Write-tmp-then-rename helper shared by the config store and the frame
//! snapshot publisher, so neither ever exposes a partially-written file to
//! a concurrent reader.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::{AppError, Result};

/// Writes `bytes` to `path` by first writing to `<path>.tmp` in the same
/// directory, `fsync`-ing it, then renaming over `path`. The rename is
/// atomic on the same filesystem, so a reader either sees the old content
/// or the new content, never a partial write.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        AppError::Internal(format!("{} has no parent directory", path.display()))
    })?;
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("atomic_write")
    ));

    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(bytes)?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_atomically_creates_file_with_exact_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        write_atomically(&path, b"hello").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn write_atomically_leaves_no_tmp_file_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        write_atomically(&path, b"data").unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn write_atomically_overwrites_existing_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        write_atomically(&path, b"first").unwrap();
        write_atomically(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }
}
