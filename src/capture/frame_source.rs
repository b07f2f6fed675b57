//! C1: FrameSource — supervises an external MJPEG-producing subprocess and
//! scans its stdout for SOI/EOI-framed JPEGs.
//!
//! Grounded on `original_source/kaivm/capture/ffmpeg_mjpeg.py`'s
//! `FfmpegMJPEGReader`: same SOI/EOI byte markers, same resync policy
//! (drop to a short tail once the buffer grows past a cap with no SOI
//! found), same "stdout closed" fatal-for-this-attempt treatment.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{AppError, Result};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Resync threshold: once the buffer exceeds this with no SOI in sight,
/// retain only the tail.
const MAX_BUFFER_BYTES: usize = 3 * 1024 * 1024;
/// Tail length kept on resync.
const RESYNC_TAIL_BYTES: usize = 2 * 1024;

fn find(haystack: &[u8], needle: [u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == needle)
}

/// Owns the subprocess and the read buffer. One JPEG per `next_frame()`.
pub struct FrameSource {
    command: Vec<String>,
    child: Option<Child>,
    buf: Vec<u8>,
    started_at: Option<Instant>,
}

impl FrameSource {
    pub fn new(command: Vec<String>) -> Self {
        Self { command, child: None, buf: Vec::new(), started_at: None }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Ok(());
        }
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| AppError::CaptureSpawn("empty source command".into()))?;

        debug!(command = ?self.command, "starting capture subprocess");
        let child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AppError::CaptureSpawn(e.to_string()))?;

        self.child = Some(child);
        self.buf.clear();
        self.started_at = Some(Instant::now());
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    pub fn uptime(&self) -> Option<std::time::Duration> {
        self.started_at.map(|t| t.elapsed())
    }

    /// Blocks reading subprocess stdout until one complete JPEG is
    /// available, resyncing the buffer as needed. Returns an error
    /// (subprocess exited, read failed) that the caller should treat as
    /// fatal to this attempt — `start()` must be called again.
    ///
    /// Returns `Bytes` rather than `Vec<u8>` so that `CaptureLoop` can fan
    /// the same frame out to both `LatestSnapshot` and `LiveStreamer`
    /// without a second full copy (spec.md §5: the two publish paths run
    /// off one read).
    pub fn next_frame(&mut self) -> Result<Bytes> {
        loop {
            if let Some(start) = find(&self.buf, SOI) {
                if let Some(end_rel) = find(&self.buf[start + 2..], EOI) {
                    let end = start + 2 + end_rel + 2;
                    let frame = Bytes::copy_from_slice(&self.buf[start..end]);
                    self.buf.drain(..end);
                    return Ok(frame);
                }
                if start > 0 {
                    self.buf.drain(..start);
                }
            } else if self.buf.len() > MAX_BUFFER_BYTES {
                warn!(buffered = self.buf.len(), "no SOI found, resyncing buffer");
                let tail_start = self.buf.len() - RESYNC_TAIL_BYTES;
                self.buf.drain(..tail_start);
            }

            let child = self
                .child
                .as_mut()
                .ok_or_else(|| AppError::CaptureSpawn("subprocess not started".into()))?;
            let stdout = child
                .stdout
                .as_mut()
                .ok_or_else(|| AppError::CaptureSpawn("subprocess has no stdout pipe".into()))?;

            let mut chunk = [0u8; 4096];
            let n = stdout.read(&mut chunk).map_err(AppError::Io)?;
            if n == 0 {
                let status = child.try_wait().ok().flatten();
                return Err(AppError::CaptureSpawn(format!(
                    "capture subprocess stdout closed (status={status:?})"
                )));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_frame_extracts_single_jpeg_from_stream() {
        let mut source = FrameSource::new(vec!["cat".into()]);
        source.buf = [&SOI[..], b"hello", &EOI[..], b"trailing"].concat();
        // simulate without a live child by exercising the parsing path
        // directly: find+drain logic identical to what next_frame uses.
        let start = find(&source.buf, SOI).unwrap();
        let end = start + 2 + find(&source.buf[start + 2..], EOI).unwrap() + 2;
        let frame = &source.buf[start..end];
        assert_eq!(frame, &[0xFF, 0xD8, b'h', b'e', b'l', b'l', b'o', 0xFF, 0xD9][..]);
    }

    #[test]
    fn resync_keeps_only_tail_when_buffer_grows_with_no_soi() {
        let mut buf = vec![0u8; MAX_BUFFER_BYTES + 100];
        assert!(find(&buf, SOI).is_none());
        assert!(buf.len() > MAX_BUFFER_BYTES);
        let tail_start = buf.len() - RESYNC_TAIL_BYTES;
        buf.drain(..tail_start);
        assert_eq!(buf.len(), RESYNC_TAIL_BYTES);
    }

    #[test]
    fn find_locates_markers() {
        let data = [0x00, 0xFF, 0xD8, 0x01, 0xFF, 0xD9];
        assert_eq!(find(&data, SOI), Some(1));
        assert_eq!(find(&data, EOI), Some(4));
    }
}
