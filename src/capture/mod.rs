//! Video capture pipeline (C1-C4): subprocess-backed MJPEG source, atomic
//! snapshot publish, bounded live FIFO, and the scheduling loop tying them
//! together. Runs as its own process per the topology in the concurrency
//! model — see `main.rs`'s `capture` subcommand.

pub mod capture_loop;
pub mod frame_source;
pub mod live_streamer;
pub mod snapshot;

pub use capture_loop::CaptureLoop;
pub use frame_source::FrameSource;
pub use live_streamer::LiveStreamer;
pub use snapshot::LatestSnapshot;
