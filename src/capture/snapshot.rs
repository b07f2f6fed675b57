//! C2: LatestSnapshot — atomic JPEG publish to a fixed path.
//!
//! `publish` reuses [`crate::utils::atomic_write::write_atomically`], the
//! same temp-then-rename idiom the original's `_atomic_write` helper in
//! `ffmpeg_mjpeg.py` used ad hoc.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::utils::atomic_write::write_atomically;

pub struct LatestSnapshot {
    path: PathBuf,
}

impl LatestSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Publishes `frame` atomically. Hashing/dedup is the consumer's
    /// responsibility — this call always writes.
    pub fn publish(&self, frame: &[u8]) -> Result<()> {
        write_atomically(&self.path, frame)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Modification time of the currently published frame, if any.
    pub fn mtime(&self) -> Option<std::time::SystemTime> {
        std::fs::metadata(&self.path).ok()?.modified().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn publish_writes_exact_bytes() {
        let dir = tempdir().unwrap();
        let snap = LatestSnapshot::new(dir.path().join("latest.jpg"));
        snap.publish(&[0xFF, 0xD8, 1, 2, 0xFF, 0xD9]).unwrap();
        assert_eq!(
            std::fs::read(snap.path()).unwrap(),
            vec![0xFF, 0xD8, 1, 2, 0xFF, 0xD9]
        );
    }

    #[test]
    fn mtime_advances_across_publishes() {
        let dir = tempdir().unwrap();
        let snap = LatestSnapshot::new(dir.path().join("latest.jpg"));
        snap.publish(b"one").unwrap();
        let first = snap.mtime().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        snap.publish(b"two").unwrap();
        let second = snap.mtime().unwrap();
        assert!(second >= first);
    }

    #[test]
    fn mtime_is_none_before_first_publish() {
        let dir = tempdir().unwrap();
        let snap = LatestSnapshot::new(dir.path().join("latest.jpg"));
        assert!(snap.mtime().is_none());
    }
}
