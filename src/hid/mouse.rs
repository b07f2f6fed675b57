//! C8: AbsoluteMouse (+ RelativeMouse variant) — coordinate calibration,
//! chunked relative moves, and click sequencing.
//!
//! Byte layouts and timing constants (2ms inter-chunk sleep, 50ms click
//! settle, 60ms default hold) are pinned from the original `hid/mouse.py`.

use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Result;
use crate::hid::endpoint::HidEndpoint;
use crate::hid::types::{AbsoluteMouseReport, MouseButton, RelativeMouseReport};

const CHUNK_SLEEP: Duration = Duration::from_millis(2);
const CLICK_SETTLE: Duration = Duration::from_millis(50);
const DEFAULT_HOLD_MS: u64 = 60;

/// Four reals defining the affine map from normalized screen coordinates
/// to device-normalized coordinates: `d = n*s + o`, clamped to `[0,1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub sx: f64,
    pub sy: f64,
    pub ox: f64,
    pub oy: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self { sx: 1.0, sy: 1.0, ox: 0.0, oy: 0.0 }
    }
}

impl Calibration {
    /// Parse the `"sx,sy,ox,oy"` UTF-8 text persisted at
    /// `<CONFIG_DIR>/calibration.txt`.
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.trim().split(',').collect();
        if parts.len() != 4 {
            return None;
        }
        let v: Vec<f64> = parts.iter().filter_map(|p| p.trim().parse().ok()).collect();
        if v.len() != 4 {
            return None;
        }
        Some(Self { sx: v[0], sy: v[1], ox: v[2], oy: v[3] })
    }

    pub fn to_text(self) -> String {
        format!("{},{},{},{}", self.sx, self.sy, self.ox, self.oy)
    }

    fn apply_x(&self, nx: f64) -> f64 {
        (nx * self.sx + self.ox).clamp(0.0, 1.0)
    }

    fn apply_y(&self, ny: f64) -> f64 {
        (ny * self.sy + self.oy).clamp(0.0, 1.0)
    }
}

/// Given `samples` of `(screen_normalized, hid_normalized)` pairs for one
/// axis, solves the least-squares linear fit `hid = scale*screen + offset`.
/// Requires at least 2 samples; returns `None` otherwise or if the screen
/// values are degenerate (all equal).
pub fn derive_calibration_axis(samples: &[(f64, f64)]) -> Option<(f64, f64)> {
    if samples.len() < 2 {
        return None;
    }
    let n = samples.len() as f64;
    let sum_x: f64 = samples.iter().map(|(x, _)| x).sum();
    let sum_y: f64 = samples.iter().map(|(_, y)| y).sum();
    let sum_xx: f64 = samples.iter().map(|(x, _)| x * x).sum();
    let sum_xy: f64 = samples.iter().map(|(x, y)| x * y).sum();

    let denom = n * sum_xx - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return None;
    }
    let scale = (n * sum_xy - sum_x * sum_y) / denom;
    let offset = (sum_y - scale * sum_x) / n;
    Some((scale, offset))
}

/// Combines per-axis least-squares fits into a full [`Calibration`].
pub fn derive_calibration(x_samples: &[(f64, f64)], y_samples: &[(f64, f64)]) -> Option<Calibration> {
    let (sx, ox) = derive_calibration_axis(x_samples)?;
    let (sy, oy) = derive_calibration_axis(y_samples)?;
    Some(Calibration { sx, sy, ox, oy })
}

/// Drives the absolute-mouse HID endpoint.
pub struct AbsoluteMouse {
    endpoint: HidEndpoint,
    calibration: Calibration,
    last_pos: Mutex<(u16, u16)>,
}

impl AbsoluteMouse {
    pub fn new(endpoint: HidEndpoint, calibration: Calibration) -> Self {
        Self { endpoint, calibration, last_pos: Mutex::new((0, 0)) }
    }

    /// Maps normalized planner coordinates `(nx, ny) in [0,1000]^2` to a
    /// device coordinate pair in `[0, 32767]`.
    pub fn to_device_coords(&self, nx: f64, ny: f64) -> (u16, u16) {
        let dx = self.calibration.apply_x(nx / 1000.0);
        let dy = self.calibration.apply_y(ny / 1000.0);
        ((dx * 32767.0).round() as u16, (dy * 32767.0).round() as u16)
    }

    fn send(&self, buttons: u8, x: u16, y: u16) -> Result<()> {
        *self.last_pos.lock() = (x, y);
        self.endpoint
            .write(&AbsoluteMouseReport { buttons, x, y }.to_bytes())
    }

    /// Moves to `(nx, ny)` with buttons released, caching the position for
    /// a subsequent coordinate-less click.
    pub fn move_to(&self, nx: f64, ny: f64) -> Result<()> {
        let (x, y) = self.to_device_coords(nx, ny);
        self.send(0, x, y)
    }

    /// move (buttons=0) -> settle -> press (buttons=mask) -> hold ->
    /// release (buttons=0, position preserved).
    pub fn click(&self, nx: f64, ny: f64, button: MouseButton) -> Result<()> {
        self.click_with_hold(nx, ny, button, DEFAULT_HOLD_MS)
    }

    pub fn click_with_hold(&self, nx: f64, ny: f64, button: MouseButton, hold_ms: u64) -> Result<()> {
        let (x, y) = self.to_device_coords(nx, ny);
        self.send(0, x, y)?;
        std::thread::sleep(CLICK_SETTLE);
        self.send(button.to_hid_bit(), x, y)?;
        std::thread::sleep(Duration::from_millis(hold_ms));
        self.send(0, x, y)
    }

    /// The device-coordinate pair last sent in any report (move or click).
    /// Kept for `AgentState.last_abs_cursor` (spec.md §3 invariant: "for any
    /// executed absolute move, the last sent (x,y) matches
    /// `last_abs_cursor`").
    pub fn last_pos(&self) -> (u16, u16) {
        *self.last_pos.lock()
    }

    /// Re-issues a click at the last known position (no coordinates given).
    pub fn click_at_last(&self, button: MouseButton) -> Result<()> {
        let (x, y) = *self.last_pos.lock();
        self.send(0, x, y)?;
        std::thread::sleep(CLICK_SETTLE);
        self.send(button.to_hid_bit(), x, y)?;
        std::thread::sleep(Duration::from_millis(DEFAULT_HOLD_MS));
        self.send(0, x, y)
    }
}

/// Drives the relative-mouse HID endpoint, chunking moves into
/// `[-127, 127]` steps.
pub struct RelativeMouse {
    endpoint: HidEndpoint,
}

impl RelativeMouse {
    pub fn new(endpoint: HidEndpoint) -> Self {
        Self { endpoint }
    }

    fn send(&self, buttons: u8, dx: i8, dy: i8) -> Result<()> {
        self.endpoint
            .write(&RelativeMouseReport { buttons, dx, dy }.to_bytes())
    }

    /// Chunks `(dx, dy)` into `[-127, 127]` reports; sleeps ~2ms between
    /// non-final chunks so the host can process each report.
    pub fn r#move(&self, mut dx: i32, mut dy: i32) -> Result<()> {
        loop {
            let step_x = dx.clamp(-127, 127);
            let step_y = dy.clamp(-127, 127);
            dx -= step_x;
            dy -= step_y;
            let is_final = dx == 0 && dy == 0;

            self.send(0, step_x as i8, step_y as i8)?;
            if is_final {
                return Ok(());
            }
            std::thread::sleep(CHUNK_SLEEP);
        }
    }

    pub fn click(&self, button: MouseButton) -> Result<()> {
        self.click_with_hold(button, DEFAULT_HOLD_MS)
    }

    pub fn click_with_hold(&self, button: MouseButton, hold_ms: u64) -> Result<()> {
        self.send(button.to_hid_bit(), 0, 0)?;
        std::thread::sleep(Duration::from_millis(hold_ms));
        self.send(0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_calibration_corners_p7() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mouse = AbsoluteMouse::new(HidEndpoint::new("abs", tmp.path()), Calibration::default());
        assert_eq!(mouse.to_device_coords(0.0, 0.0), (0, 0));
        assert_eq!(mouse.to_device_coords(1000.0, 1000.0), (32767, 32767));
    }

    #[test]
    fn click_at_center_matches_scenario_4() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mouse = AbsoluteMouse::new(HidEndpoint::new("abs", tmp.path()), Calibration::default());
        mouse.click(500.0, 500.0, MouseButton::Left).unwrap();

        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut std::fs::File::open(tmp.path()).unwrap(), &mut buf)
            .unwrap();
        assert_eq!(
            buf,
            vec![
                0x00, 0xFF, 0x3F, 0xFF, 0x3F, // move
                0x01, 0xFF, 0x3F, 0xFF, 0x3F, // press
                0x00, 0xFF, 0x3F, 0xFF, 0x3F, // release
            ]
        );
    }

    #[test]
    fn relative_move_chunk_sum_matches_p6() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mouse = RelativeMouse::new(HidEndpoint::new("rel", tmp.path()));
        mouse.r#move(300, -200).unwrap();

        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut std::fs::File::open(tmp.path()).unwrap(), &mut buf)
            .unwrap();
        assert_eq!(buf.len() % 3, 0);
        let mut sum_dx = 0i32;
        let mut sum_dy = 0i32;
        for chunk in buf.chunks(3) {
            assert!((-127..=127).contains(&(chunk[1] as i8 as i32)));
            assert!((-127..=127).contains(&(chunk[2] as i8 as i32)));
            sum_dx += chunk[1] as i8 as i32;
            sum_dy += chunk[2] as i8 as i32;
        }
        assert_eq!(sum_dx, 300);
        assert_eq!(sum_dy, -200);
    }

    #[test]
    fn derive_calibration_identity_from_matching_samples() {
        let samples = [(0.0, 0.0), (1.0, 1.0)];
        let (scale, offset) = derive_calibration_axis(&samples).unwrap();
        assert!((scale - 1.0).abs() < 1e-9);
        assert!(offset.abs() < 1e-9);
    }

    #[test]
    fn derive_calibration_needs_at_least_two_points() {
        assert!(derive_calibration_axis(&[(0.5, 0.5)]).is_none());
    }

    #[test]
    fn calibration_text_round_trip() {
        let c = Calibration { sx: 1.1, sy: 0.9, ox: 0.01, oy: -0.02 };
        let parsed = Calibration::parse(&c.to_text()).unwrap();
        assert_eq!(parsed, c);
    }
}
