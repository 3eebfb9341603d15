//! Input listener (spec.md §4.8): maps raw Linux input-device keycodes to
//! arbiter actions. Reads the kernel's `struct input_event` wire format
//! directly off the device node rather than pulling in a dedicated crate,
//! since the arbiter only needs key-press/release edges for a handful of
//! fixed keycodes.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    TalkPress,
    TalkRelease,
    MonologueToggle,
    StatusRead,
    Logbook,
    EmergencyStop,
    VolumeUp,
    VolumeDown,
}

#[async_trait]
pub trait InputSource: Send {
    async fn next_action(&mut self) -> Option<InputAction>;
}

/// `evdev` event type/code constants this listener cares about. Others are
/// read and discarded.
const EV_KEY: u16 = 1;
const KEY_RELEASED: i32 = 0;
const KEY_PRESSED: i32 = 1;

const KEY_TALK: u16 = 1;
const KEY_MONOLOGUE: u16 = 2;
const KEY_STATUS: u16 = 3;
const KEY_LOGBOOK: u16 = 4;
const KEY_EMERGENCY: u16 = 5;
const KEY_VOLUME_UP: u16 = 6;
const KEY_VOLUME_DOWN: u16 = 7;

/// Size in bytes of `struct input_event` on a 64-bit Linux kernel:
/// `struct timeval` (8 + 8) + `type` (2) + `code` (2) + `value` (4).
const INPUT_EVENT_SIZE: usize = 24;

pub struct RawInputListener {
    device_path: PathBuf,
    file: Option<tokio::fs::File>,
}

impl RawInputListener {
    pub fn new(device_path: impl Into<PathBuf>) -> Self {
        Self { device_path: device_path.into(), file: None }
    }

    async fn ensure_open(&mut self) -> bool {
        if self.file.is_some() {
            return true;
        }
        match tokio::fs::File::open(&self.device_path).await {
            Ok(file) => {
                self.file = Some(file);
                true
            }
            Err(err) => {
                tracing::warn!(path = %self.device_path.display(), error = %err, "input device not available");
                false
            }
        }
    }
}

#[async_trait]
impl InputSource for RawInputListener {
    async fn next_action(&mut self) -> Option<InputAction> {
        use tokio::io::AsyncReadExt;

        loop {
            if !self.ensure_open().await {
                tokio::time::sleep(Duration::from_secs(2)).await;
                continue;
            }

            let mut buf = [0u8; INPUT_EVENT_SIZE];
            let file = self.file.as_mut()?;
            match file.read_exact(&mut buf).await {
                Ok(_) => {
                    if let Some(action) = decode_event(&buf) {
                        return Some(action);
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "input device read failed, reconnecting");
                    self.file = None;
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    }
}

fn decode_event(buf: &[u8; INPUT_EVENT_SIZE]) -> Option<InputAction> {
    let event_type = u16::from_ne_bytes([buf[16], buf[17]]);
    let code = u16::from_ne_bytes([buf[18], buf[19]]);
    let value = i32::from_ne_bytes([buf[20], buf[21], buf[22], buf[23]]);

    if event_type != EV_KEY {
        return None;
    }

    match (code, value) {
        (KEY_TALK, KEY_PRESSED) => Some(InputAction::TalkPress),
        (KEY_TALK, KEY_RELEASED) => Some(InputAction::TalkRelease),
        (KEY_MONOLOGUE, KEY_PRESSED) => Some(InputAction::MonologueToggle),
        (KEY_STATUS, KEY_PRESSED) => Some(InputAction::StatusRead),
        (KEY_LOGBOOK, KEY_PRESSED) => Some(InputAction::Logbook),
        (KEY_EMERGENCY, KEY_PRESSED) => Some(InputAction::EmergencyStop),
        (KEY_VOLUME_UP, KEY_PRESSED) => Some(InputAction::VolumeUp),
        (KEY_VOLUME_DOWN, KEY_PRESSED) => Some(InputAction::VolumeDown),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(code: u16, value: i32) -> [u8; INPUT_EVENT_SIZE] {
        let mut buf = [0u8; INPUT_EVENT_SIZE];
        buf[16..18].copy_from_slice(&EV_KEY.to_ne_bytes());
        buf[18..20].copy_from_slice(&code.to_ne_bytes());
        buf[20..24].copy_from_slice(&value.to_ne_bytes());
        buf
    }

    #[test]
    fn decodes_talk_press_and_release() {
        assert_eq!(decode_event(&event(KEY_TALK, KEY_PRESSED)), Some(InputAction::TalkPress));
        assert_eq!(decode_event(&event(KEY_TALK, KEY_RELEASED)), Some(InputAction::TalkRelease));
    }

    #[test]
    fn ignores_non_key_events() {
        let mut buf = event(KEY_TALK, KEY_PRESSED);
        buf[16..18].copy_from_slice(&2u16.to_ne_bytes());
        assert_eq!(decode_event(&buf), None);
    }

    #[test]
    fn ignores_unmapped_keycodes() {
        assert_eq!(decode_event(&event(99, KEY_PRESSED)), None);
    }
}
