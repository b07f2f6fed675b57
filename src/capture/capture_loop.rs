//! C4: CaptureLoop — runs the two rate schedules over frames pulled from
//! [`FrameSource`], publishing to [`LatestSnapshot`] and pushing to
//! [`LiveStreamer`], restarting the subprocess with backoff on failure.
//!
//! Grounded on `original_source/kaivm/capture/ffmpeg_mjpeg.py`'s
//! `run_capture_loop`: warmup window, backoff that shrinks when the last
//! good frame was recent, restart-on-any-error.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::CaptureConfig;
use crate::utils::throttle::LogThrottler;

use super::frame_source::FrameSource;
use super::live_streamer::LiveStreamer;
use super::snapshot::LatestSnapshot;

pub struct CaptureLoop {
    source: FrameSource,
    snapshot: LatestSnapshot,
    live: LiveStreamer,
    config: CaptureConfig,
    throttle: LogThrottler,
}

impl CaptureLoop {
    pub fn new(
        config: CaptureConfig,
        snapshot: LatestSnapshot,
        live: LiveStreamer,
    ) -> Self {
        let source = FrameSource::new(config.source_command.clone());
        Self { source, snapshot, live, config, throttle: LogThrottler::with_secs(5) }
    }

    /// Runs until `should_stop` returns true, checked between attempts and
    /// after each published frame.
    pub fn run(&mut self, should_stop: impl Fn() -> bool) {
        let mut last_ok = Instant::now().checked_sub(Duration::from_secs(3600));

        while !should_stop() {
            if let Err(e) = self.source.start() {
                warn!(error = %e, "failed to start capture subprocess");
                std::thread::sleep(self.backoff(last_ok));
                continue;
            }

            let attempt_start = Instant::now();
            let out_period = period(self.config.out_fps);
            let live_period = period(self.config.live_fps);
            let mut next_latest = Instant::now();
            let mut next_live = Instant::now();

            loop {
                if should_stop() {
                    self.source.stop();
                    return;
                }

                match self.source.next_frame() {
                    Ok(frame) => {
                        if attempt_start.elapsed().as_secs_f64() < self.config.warmup_s {
                            continue;
                        }
                        let now = Instant::now();

                        if live_period.is_none() || now >= next_live {
                            self.live.push(frame.clone());
                            if let Some(p) = live_period {
                                while next_live <= now {
                                    next_live += p;
                                }
                            }
                        }

                        if out_period.is_none() || now >= next_latest {
                            if let Err(e) = self.snapshot.publish(&frame) {
                                if self.throttle.should_log("snapshot_publish") {
                                    warn!(error = %e, "failed to publish snapshot");
                                }
                            } else {
                                last_ok = Some(now);
                            }
                            if let Some(p) = out_period {
                                while next_latest <= now {
                                    next_latest += p;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "capture read failed, restarting");
                        break;
                    }
                }
            }

            self.source.stop();
            std::thread::sleep(self.backoff(last_ok));
        }
    }

    fn backoff(&self, last_ok: Option<Instant>) -> Duration {
        let recent = last_ok
            .map(|t| t.elapsed().as_secs_f64() < self.config.backoff_recent_window_s)
            .unwrap_or(false);
        let secs = if recent { self.config.backoff_min_s } else { self.config.backoff_max_s };
        Duration::from_secs_f64(secs)
    }
}

/// `None` means unlimited (0 fps): every frame is forwarded.
fn period(fps: u32) -> Option<Duration> {
    if fps == 0 {
        None
    } else {
        Some(Duration::from_secs_f64(1.0 / fps as f64))
    }
}

pub fn log_start(config: &CaptureConfig) {
    info!(command = ?config.source_command, out_fps = config.out_fps, live_fps = config.live_fps, "capture loop starting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_zero_is_unlimited() {
        assert_eq!(period(0), None);
    }

    #[test]
    fn period_five_fps_is_200ms() {
        assert_eq!(period(5), Some(Duration::from_millis(200)));
    }

    #[test]
    fn backoff_picks_min_when_recently_healthy() {
        let config = CaptureConfig { backoff_min_s: 1.0, backoff_max_s: 5.0, backoff_recent_window_s: 5.0, ..CaptureConfig::default() };
        let loop_ = CaptureLoop {
            source: FrameSource::new(vec!["true".into()]),
            snapshot: LatestSnapshot::new(std::env::temp_dir().join("kaivm_test_latest.jpg")),
            live: LiveStreamer::new(std::env::temp_dir().join("kaivm_test_live.mjpg"), 2),
            config,
            throttle: LogThrottler::with_secs(5),
        };
        assert_eq!(loop_.backoff(Some(Instant::now())), Duration::from_secs(1));
    }

    #[test]
    fn backoff_picks_max_when_last_ok_is_old_or_absent() {
        let config = CaptureConfig { backoff_min_s: 1.0, backoff_max_s: 5.0, backoff_recent_window_s: 5.0, ..CaptureConfig::default() };
        let loop_ = CaptureLoop {
            source: FrameSource::new(vec!["true".into()]),
            snapshot: LatestSnapshot::new(std::env::temp_dir().join("kaivm_test_latest2.jpg")),
            live: LiveStreamer::new(std::env::temp_dir().join("kaivm_test_live2.mjpg"), 2),
            config,
            throttle: LogThrottler::with_secs(5),
        };
        assert_eq!(loop_.backoff(None), Duration::from_secs(5));
    }
}
