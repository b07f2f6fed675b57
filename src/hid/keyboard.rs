//! C7: KeyboardMapper — ASCII/keyname → (modifier, keycode), hotkey combo
//! parsing, and `type_text`/`send_hotkey` over a [`HidEndpoint`].
//!
//! The ASCII map, named-key table, modifier-name table and hotkey grammar
//! are ported directly from the original `hid/keyboard.py`'s `ASCII_MAP`,
//! `KEYCODES`, and `MOD_NAMES`.

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;
use crate::hid::endpoint::HidEndpoint;
use crate::hid::keymap::usb;
use crate::hid::types::KeyboardReport;

pub const MOD_LCTRL: u8 = 0x01;
pub const MOD_LSHIFT: u8 = 0x02;
pub const MOD_LALT: u8 = 0x04;
pub const MOD_LGUI: u8 = 0x08;

const INTER_KEY_DELAY: Duration = Duration::from_millis(5);
const KEY_HOLD_DELAY: Duration = Duration::from_millis(15);

fn ascii_map() -> HashMap<char, (u8, u8)> {
    let mut m = HashMap::new();
    for (i, c) in ('a'..='z').enumerate() {
        m.insert(c, (0, usb::KEY_A + i as u8));
        m.insert(c.to_ascii_uppercase(), (MOD_LSHIFT, usb::KEY_A + i as u8));
    }
    let digits = [
        ('1', usb::KEY_1),
        ('2', usb::KEY_2),
        ('3', usb::KEY_3),
        ('4', usb::KEY_4),
        ('5', usb::KEY_5),
        ('6', usb::KEY_6),
        ('7', usb::KEY_7),
        ('8', usb::KEY_8),
        ('9', usb::KEY_9),
        ('0', usb::KEY_0),
    ];
    let shifted_digits = ['!', '@', '#', '$', '%', '^', '&', '*', '(', ')'];
    for (i, (c, code)) in digits.iter().enumerate() {
        m.insert(*c, (0, *code));
        m.insert(shifted_digits[i], (MOD_LSHIFT, *code));
    }
    m.insert(' ', (0, usb::KEY_SPACE));
    m.insert('\n', (0, usb::KEY_ENTER));
    m.insert('\t', (0, usb::KEY_TAB));

    let plain = [
        ('-', usb::KEY_MINUS),
        ('=', usb::KEY_EQUAL),
        ('[', usb::KEY_LEFT_BRACKET),
        (']', usb::KEY_RIGHT_BRACKET),
        ('\\', usb::KEY_BACKSLASH),
        (';', usb::KEY_SEMICOLON),
        ('\'', usb::KEY_APOSTROPHE),
        ('`', usb::KEY_GRAVE),
        (',', usb::KEY_COMMA),
        ('.', usb::KEY_PERIOD),
        ('/', usb::KEY_SLASH),
    ];
    let shifted = [
        ('_', usb::KEY_MINUS),
        ('+', usb::KEY_EQUAL),
        ('{', usb::KEY_LEFT_BRACKET),
        ('}', usb::KEY_RIGHT_BRACKET),
        ('|', usb::KEY_BACKSLASH),
        (':', usb::KEY_SEMICOLON),
        ('"', usb::KEY_APOSTROPHE),
        ('~', usb::KEY_GRAVE),
        ('<', usb::KEY_COMMA),
        ('>', usb::KEY_PERIOD),
        ('?', usb::KEY_SLASH),
    ];
    for (c, code) in plain {
        m.insert(c, (0, code));
    }
    for (c, code) in shifted {
        m.insert(c, (MOD_LSHIFT, code));
    }
    m
}

fn named_keys() -> HashMap<&'static str, u8> {
    let mut m = HashMap::new();
    m.insert("ENTER", usb::KEY_ENTER);
    m.insert("ESC", usb::KEY_ESCAPE);
    m.insert("ESCAPE", usb::KEY_ESCAPE);
    m.insert("BACKSPACE", usb::KEY_BACKSPACE);
    m.insert("TAB", usb::KEY_TAB);
    m.insert("SPACE", usb::KEY_SPACE);
    m.insert("CAPSLOCK", usb::KEY_CAPS_LOCK);
    m.insert("LEFT", usb::KEY_LEFT_ARROW);
    m.insert("RIGHT", usb::KEY_RIGHT_ARROW);
    m.insert("UP", usb::KEY_UP_ARROW);
    m.insert("DOWN", usb::KEY_DOWN_ARROW);
    m.insert("DELETE", usb::KEY_DELETE);
    m.insert("HOME", usb::KEY_HOME);
    m.insert("END", usb::KEY_END);
    m.insert("PAGEUP", usb::KEY_PAGE_UP);
    m.insert("PAGEDOWN", usb::KEY_PAGE_DOWN);
    let f_keys = [
        usb::KEY_F1,
        usb::KEY_F2,
        usb::KEY_F3,
        usb::KEY_F4,
        usb::KEY_F5,
        usb::KEY_F6,
        usb::KEY_F7,
        usb::KEY_F8,
        usb::KEY_F9,
        usb::KEY_F10,
        usb::KEY_F11,
        usb::KEY_F12,
    ];
    let names: [&'static str; 12] = [
        "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8", "F9", "F10", "F11", "F12",
    ];
    for (name, code) in names.iter().zip(f_keys.iter()) {
        m.insert(*name, *code);
    }
    m
}

fn modifier_names() -> HashMap<&'static str, u8> {
    let mut m = HashMap::new();
    m.insert("CTRL", MOD_LCTRL);
    m.insert("CONTROL", MOD_LCTRL);
    m.insert("SHIFT", MOD_LSHIFT);
    m.insert("ALT", MOD_LALT);
    m.insert("GUI", MOD_LGUI);
    m.insert("WIN", MOD_LGUI);
    m.insert("WINDOWS", MOD_LGUI);
    m.insert("CMD", MOD_LGUI);
    m.insert("COMMAND", MOD_LGUI);
    m.insert("SUPER", MOD_LGUI);
    m.insert("META", MOD_LGUI);
    m
}

/// Maps ASCII text and named hotkey combos to keyboard HID reports, and
/// drives a keyboard [`HidEndpoint`] to send them.
pub struct KeyboardMapper {
    endpoint: HidEndpoint,
    ascii: HashMap<char, (u8, u8)>,
    named: HashMap<&'static str, u8>,
    modifiers: HashMap<&'static str, u8>,
}

impl KeyboardMapper {
    pub fn new(endpoint: HidEndpoint) -> Self {
        Self {
            endpoint,
            ascii: ascii_map(),
            named: named_keys(),
            modifiers: modifier_names(),
        }
    }

    /// Low-level primitive: send a raw report then release. Allows an
    /// external input relay to mirror a live keyboard state.
    pub fn send_report(&self, mod_mask: u8, keycode: u8) -> Result<()> {
        self.endpoint.write(&KeyboardReport::press(mod_mask, keycode).to_bytes())?;
        std::thread::sleep(KEY_HOLD_DELAY);
        self.endpoint.write(&KeyboardReport::release().to_bytes())
    }

    /// Sends `text` one character at a time, skipping (and logging) any
    /// character absent from the ASCII map.
    pub fn type_text(&self, text: &str) -> Result<()> {
        for ch in text.chars() {
            match self.ascii.get(&ch) {
                Some(&(mods, code)) => {
                    self.send_report(mods, code)?;
                    std::thread::sleep(INTER_KEY_DELAY);
                }
                None => warn!(char = %ch, "unmapped character in type_text, skipping"),
            }
        }
        Ok(())
    }

    /// Parses a `+`/`-`-separated hotkey combo (case-insensitive) and
    /// sends it. Returns `Ok(false)` without sending anything if the
    /// combo names only modifiers (e.g. `"ctrl"` alone).
    pub fn send_hotkey(&self, combo: &str) -> Result<bool> {
        let mut mod_mask = 0u8;
        let mut key_part: Option<u8> = None;

        for raw_part in combo.split(['+', '-']) {
            let part = raw_part.trim();
            if part.is_empty() {
                continue;
            }
            let upper = part.to_ascii_uppercase();

            if let Some(&bit) = self.modifiers.get(upper.as_str()) {
                mod_mask |= bit;
                continue;
            }
            if upper == "SPACE" {
                key_part = Some(usb::KEY_SPACE);
                continue;
            }
            if part.chars().count() == 1 {
                if let Some(&(ascii_mod, code)) = self.ascii.get(&part.chars().next().unwrap()) {
                    mod_mask |= ascii_mod;
                    key_part = Some(code);
                    continue;
                }
            }
            if let Some(&code) = self.named.get(upper.as_str()) {
                key_part = Some(code);
                continue;
            }
            warn!(part = %part, combo = %combo, "unrecognized hotkey component, ignoring");
        }

        match key_part {
            Some(code) => {
                self.send_report(mod_mask, code)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
