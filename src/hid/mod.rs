//! HID (Human Interface Device) control module (C6/C7/C8)
//!
//! Three fixed character devices under `/dev/hidgN`, written directly by
//! [`KeyboardMapper`] and the mouse types. No backend abstraction layer —
//! kaiVM only ever targets the Linux USB gadget (`otg::GadgetControl`
//! handles bind/unbind; this module only writes reports once the gadget is
//! up).

pub mod endpoint;
pub mod keyboard;
pub mod keymap;
pub mod mouse;
pub mod types;

pub use endpoint::HidEndpoint;
pub use keyboard::KeyboardMapper;
pub use mouse::{AbsoluteMouse, Calibration, RelativeMouse};
pub use types::{AbsoluteMouseReport, KeyboardReport, MouseButton, RelativeMouseReport};

/// Conventional instance numbers for the three gadget HID functions, fixed
/// by the `functions=hid.usb0,hid.usb1,hid.usb2` ordering provisioned into
/// configfs.
pub const KEYBOARD_INSTANCE: u8 = 0;
pub const RELATIVE_MOUSE_INSTANCE: u8 = 1;
pub const ABSOLUTE_MOUSE_INSTANCE: u8 = 2;

/// Bundles the three HID endpoints the agent loop and the capture-adjacent
/// input relay both depend on.
pub struct HidDevices {
    pub keyboard: KeyboardMapper,
    pub relative_mouse: RelativeMouse,
    pub absolute_mouse: AbsoluteMouse,
}

impl HidDevices {
    pub fn open(calibration: Calibration) -> Self {
        Self {
            keyboard: KeyboardMapper::new(HidEndpoint::new(
                "keyboard",
                endpoint::device_path(KEYBOARD_INSTANCE),
            )),
            relative_mouse: RelativeMouse::new(HidEndpoint::new(
                "relative_mouse",
                endpoint::device_path(RELATIVE_MOUSE_INSTANCE),
            )),
            absolute_mouse: AbsoluteMouse::new(
                HidEndpoint::new("absolute_mouse", endpoint::device_path(ABSOLUTE_MOUSE_INSTANCE)),
                calibration,
            ),
        }
    }
}
