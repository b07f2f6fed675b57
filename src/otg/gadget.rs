//! C5: GadgetControl — bind/unbind re-enumeration of an already-provisioned
//! USB gadget.
//!
//! Provisioning the configfs tree (functions, strings, symlinks) happens
//! once, out of this crate's scope; `GadgetControl` only toggles the `UDC`
//! attribute that tells the kernel to bind (or release) the gadget to a
//! controller, which is what makes the host re-enumerate the device.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Result;
use crate::utils::throttle::LogThrottler;

use super::configfs;

const DEFAULT_SETTLE: Duration = Duration::from_millis(1000);

/// Controls bind/unbind of one USB gadget via its configfs `UDC` attribute.
pub struct GadgetControl {
    gadget_name: String,
    udc_path: PathBuf,
    settle: Duration,
    throttle: LogThrottler,
}

impl GadgetControl {
    pub fn new(gadget_name: impl Into<String>) -> Self {
        let gadget_name = gadget_name.into();
        let udc_path = Path::new(configfs::CONFIGFS_PATH)
            .join(&gadget_name)
            .join("UDC");
        Self {
            gadget_name,
            udc_path,
            settle: DEFAULT_SETTLE,
            throttle: LogThrottler::with_secs(5),
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Read `/sys/class/udc/<name>/state`. `None` if the controller or
    /// gadget isn't present.
    pub fn udc_state(&self, udc_name: &str) -> Option<String> {
        let path = Path::new("/sys/class/udc").join(udc_name).join("state");
        configfs::read_file(&path).ok()
    }

    /// True once the host has enumerated the gadget.
    pub fn is_configured(&self, udc_name: &str) -> bool {
        self.udc_state(udc_name)
            .map(|s| s.trim().eq_ignore_ascii_case("configured"))
            .unwrap_or(false)
    }

    /// Unbind, sleep `settle`, rebind to the single discovered UDC.
    ///
    /// Requires root (writing configfs `UDC` needs CAP_SYS_ADMIN-equivalent
    /// file permissions); if not privileged this logs a warning and returns
    /// `Ok(())` without touching anything — it never fails the run.
    pub fn rebind(&self) -> Result<()> {
        if !is_root() {
            if self.throttle.should_log("gadget_privilege") {
                warn!(
                    gadget = %self.gadget_name,
                    "not running as root, skipping gadget rebind"
                );
            }
            return Ok(());
        }

        let udc_name = match configfs::find_udc() {
            Some(name) => name,
            None => {
                warn!("no USB device controller found under /sys/class/udc");
                return Ok(());
            }
        };

        if let Err(e) = configfs::write_file(&self.udc_path, "") {
            warn!(error = %e, "failed to unbind gadget (continuing)");
        }
        std::thread::sleep(self.settle);

        if let Err(e) = configfs::write_file(&self.udc_path, &udc_name) {
            warn!(error = %e, "failed to rebind gadget (continuing)");
        }
        std::thread::sleep(self.settle);

        debug!(udc = %udc_name, "gadget rebind complete");
        Ok(())
    }
}

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udc_state_missing_controller_is_none() {
        let ctl = GadgetControl::new("kaivm-test-nonexistent");
        assert!(ctl.udc_state("no-such-udc").is_none());
    }

    #[test]
    fn is_configured_false_when_state_missing() {
        let ctl = GadgetControl::new("kaivm-test-nonexistent");
        assert!(!ctl.is_configured("no-such-udc"));
    }

    #[test]
    fn rebind_without_privilege_is_a_noop_ok() {
        // This test only exercises the non-root path: CI/sandboxes never
        // run these tests as root against a real configfs tree.
        if is_root() {
            return;
        }
        let ctl = GadgetControl::new("kaivm-test-nonexistent");
        assert!(ctl.rebind().is_ok());
    }
}
