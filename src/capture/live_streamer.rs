//! C3: LiveStreamer — a dedicated writer thread owns the FIFO file
//! descriptor so the capture (frame-reader) thread never blocks on it.
//!
//! Grounded on the teacher's pattern of isolating blocking I/O behind a
//! dedicated thread (`video/device.rs`'s reader thread, `hid/endpoint.rs`'s
//! EAGAIN/EPIPE reopen loop reused here for the FIFO's broken-pipe case).

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::utils::throttle::LogThrottler;

struct Shared {
    queue: Mutex<VecDeque<Bytes>>,
    condvar: Condvar,
    depth: usize,
    shutdown: Mutex<bool>,
}

/// Bounded drop-oldest queue backing a FIFO, drained by a dedicated
/// writer thread.
pub struct LiveStreamer {
    shared: Arc<Shared>,
    handle: Option<std::thread::JoinHandle<()>>,
    enabled: bool,
}

impl LiveStreamer {
    /// Creates the FIFO (mode 0666) if absent. If a non-FIFO already
    /// exists at `path`, live streaming is disabled for this run — `push`
    /// becomes a no-op and no thread is spawned.
    pub fn new(path: impl Into<PathBuf>, depth: usize) -> Self {
        let path = path.into();

        if let Err(e) = ensure_fifo(&path) {
            warn!(path = %path.display(), error = %e, "live streaming disabled for this run");
            return Self {
                shared: Arc::new(Shared {
                    queue: Mutex::new(VecDeque::new()),
                    condvar: Condvar::new(),
                    depth,
                    shutdown: Mutex::new(true),
                }),
                handle: None,
                enabled: false,
            };
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            depth,
            shutdown: Mutex::new(false),
        });

        let writer_shared = shared.clone();
        let handle = std::thread::spawn(move || writer_loop(path, writer_shared));

        Self { shared, handle: Some(handle), enabled: true }
    }

    /// Enqueues `frame`, dropping the oldest queued frame if full. Takes
    /// anything cheaply convertible to `Bytes` so callers holding the same
    /// frame `CaptureLoop` just published to `LatestSnapshot` pay only a
    /// refcount bump, not a copy.
    pub fn push(&self, frame: impl Into<Bytes>) {
        if !self.enabled {
            return;
        }
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.len() >= self.shared.depth {
            queue.pop_front();
        }
        queue.push_back(frame.into());
        self.shared.condvar.notify_one();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Drop for LiveStreamer {
    fn drop(&mut self) {
        *self.shared.shutdown.lock().unwrap() = true;
        self.shared.condvar.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn ensure_fifo(path: &Path) -> std::io::Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) => {
            use std::os::unix::fs::FileTypeExt;
            if meta.file_type().is_fifo() {
                Ok(())
            } else {
                Err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!("{} exists and is not a FIFO", path.display()),
                ))
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            use std::os::unix::ffi::OsStrExt;
            let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
            let ret = unsafe { libc::mkfifo(c_path.as_ptr(), 0o666) };
            if ret != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn set_blocking(file: &File, blocking: bool) {
    let fd = file.as_raw_fd();
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return;
        }
        let new_flags = if blocking { flags & !libc::O_NONBLOCK } else { flags | libc::O_NONBLOCK };
        libc::fcntl(fd, libc::F_SETFL, new_flags);
    }
}

fn writer_loop(path: PathBuf, shared: Arc<Shared>) {
    let mut fd: Option<File> = None;
    let throttle = LogThrottler::with_secs(5);

    loop {
        let frame = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if *shared.shutdown.lock().unwrap() {
                    return;
                }
                if let Some(frame) = queue.pop_front() {
                    break frame;
                }
                queue = shared.condvar.wait(queue).unwrap();
            }
        };

        if fd.is_none() {
            match OpenOptions::new().write(true).custom_flags(libc::O_NONBLOCK).open(&path) {
                Ok(f) => {
                    set_blocking(&f, true);
                    debug!(path = %path.display(), "live FIFO opened by a reader");
                    fd = Some(f);
                }
                Err(_) => {
                    // No reader attached (ENXIO or similar) — drop silently.
                    continue;
                }
            }
        }

        if let Some(ref file) = fd {
            if write_all(file, &frame).is_err() {
                if throttle.should_log("live_fifo_write") {
                    warn!(path = %path.display(), "live FIFO write failed, will reopen on next frame");
                }
                fd = None;
            }
        }
    }
}

fn write_all(file: &File, bytes: &[u8]) -> std::io::Result<()> {
    let mut written = 0usize;
    while written < bytes.len() {
        let ret = unsafe {
            libc::write(
                file.as_raw_fd(),
                bytes[written..].as_ptr() as *const libc::c_void,
                bytes.len() - written,
            )
        };
        if ret < 0 {
            return Err(std::io::Error::last_os_error());
        }
        written += ret as usize;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_fifo_when_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("live.mjpg");
        let streamer = LiveStreamer::new(&path, 2);
        assert!(streamer.is_enabled());
        let meta = std::fs::metadata(&path).unwrap();
        use std::os::unix::fs::FileTypeExt;
        assert!(meta.file_type().is_fifo());
    }

    #[test]
    fn disabled_when_a_regular_file_occupies_the_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("live.mjpg");
        std::fs::write(&path, b"not a fifo").unwrap();
        let streamer = LiveStreamer::new(&path, 2);
        assert!(!streamer.is_enabled());
    }

    #[test]
    fn push_without_reader_does_not_block_or_panic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("live.mjpg");
        let streamer = LiveStreamer::new(&path, 2);
        streamer.push(vec![0xFF, 0xD8, 0xFF, 0xD9]);
        streamer.push(vec![0xFF, 0xD8, 1, 0xFF, 0xD9]);
        streamer.push(vec![0xFF, 0xD8, 2, 0xFF, 0xD9]);
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
}
