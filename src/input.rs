//! OS clipboard access and synthesized copy/paste chords.

use anyhow::Result;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay between releasing held modifiers and sending a chord.
pub const CHORD_SETTLE: Duration = Duration::from_millis(50);

pub trait Clipboard: Send + Sync {
    fn read(&self) -> Result<String>;
    fn write(&self, text: &str) -> Result<()>;
}

/// Injects keyboard input into whatever window has focus.
pub trait KeySender: Send + Sync {
    fn simulate_copy(&self);
    fn simulate_paste(&self);
}

pub struct SystemClipboard;

impl Clipboard for SystemClipboard {
    fn read(&self) -> Result<String> {
        #[cfg(windows)]
        {
            clipboard_win::get_clipboard_string()
                .map_err(|e| anyhow::anyhow!("Failed to read clipboard: {}", e))
        }
        #[cfg(not(windows))]
        {
            anyhow::bail!("Clipboard access is only supported on Windows")
        }
    }

    fn write(&self, text: &str) -> Result<()> {
        #[cfg(windows)]
        {
            clipboard_win::set_clipboard_string(text)
                .map_err(|e| anyhow::anyhow!("Failed to write clipboard: {}", e))
        }
        #[cfg(not(windows))]
        {
            let _ = text;
            anyhow::bail!("Clipboard access is only supported on Windows")
        }
    }
}

/// Sends Ctrl+C / Ctrl+V by virtual-key code, so the active keyboard layout
/// does not matter.
pub struct SystemKeys {
    pub settle: Duration,
}

impl Default for SystemKeys {
    fn default() -> Self {
        Self { settle: CHORD_SETTLE }
    }
}

impl SystemKeys {
    fn ctrl_chord(&self, letter: u8) {
        // The hotkey's own modifiers may still be reported as held.
        release_all_modifiers();
        thread::sleep(self.settle);
        if !send_ctrl_chord(letter) {
            warn!("SendInput injected fewer events than requested for Ctrl+{}", letter as char);
        }
    }
}

impl KeySender for SystemKeys {
    fn simulate_copy(&self) {
        debug!("Sending Ctrl+C");
        self.ctrl_chord(b'C');
    }

    fn simulate_paste(&self) {
        debug!("Sending Ctrl+V");
        self.ctrl_chord(b'V');
    }
}

#[cfg(windows)]
mod win {
    use windows::Win32::UI::Input::KeyboardAndMouse as km;

    const MODIFIERS: [km::VIRTUAL_KEY; 5] = [km::VK_CONTROL, km::VK_MENU, km::VK_SHIFT, km::VK_LWIN, km::VK_RWIN];

    fn key(vk: km::VIRTUAL_KEY, flags: km::KEYBD_EVENT_FLAGS) -> km::INPUT {
        km::INPUT {
            r#type: km::INPUT_KEYBOARD,
            Anonymous: km::INPUT_0 {
                ki: km::KEYBDINPUT {
                    wVk: vk,
                    wScan: 0,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        }
    }

    fn send(inputs: &[km::INPUT]) -> bool {
        let sent = unsafe { km::SendInput(inputs, std::mem::size_of::<km::INPUT>() as i32) };
        sent == inputs.len() as u32
    }

    pub fn release_all_modifiers() {
        let inputs: Vec<km::INPUT> = MODIFIERS.iter().map(|vk| key(*vk, km::KEYEVENTF_KEYUP)).collect();
        let _ = send(&inputs);
    }

    pub fn send_ctrl_chord(letter: u8) -> bool {
        let down = km::KEYBD_EVENT_FLAGS(0);
        let vk = km::VIRTUAL_KEY(letter as u16);
        send(&[
            key(km::VK_CONTROL, down),
            key(vk, down),
            key(vk, km::KEYEVENTF_KEYUP),
            key(km::VK_CONTROL, km::KEYEVENTF_KEYUP),
        ])
    }
}

#[cfg(windows)]
use win::{release_all_modifiers, send_ctrl_chord};

#[cfg(not(windows))]
fn release_all_modifiers() {}

#[cfg(not(windows))]
fn send_ctrl_chord(letter: u8) -> bool {
    warn!("Cannot synthesize Ctrl+{}: input injection is only supported on Windows", letter as char);
    false
}
