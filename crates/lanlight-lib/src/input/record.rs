//! Fixed-size input records and the key edges they carry.
//!
//! evdev `input_event` layout: `[timeval][u16 type][u16 code][i32 value]`,
//! little-endian, where the timeval is 8 bytes on 32-bit kernels and 16 on
//! 64-bit ones. Keycode streams carry one byte per record, 0 = release.

use serde::{Deserialize, Serialize};

use super::{InputError, Result};

/// evdev event type for keys and buttons.
pub const EV_KEY: u16 = 1;

const KEY_RELEASE: i32 = 0;
const KEY_PRESS: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    /// 16-byte `input_event` (32-bit timeval).
    Evdev32,
    /// 24-byte `input_event` (64-bit timeval).
    Evdev64,
    /// One keycode byte per record.
    Keycode,
}

impl RecordFormat {
    pub fn record_size(self) -> usize {
        match self {
            RecordFormat::Evdev32 => 16,
            RecordFormat::Evdev64 => 24,
            RecordFormat::Keycode => 1,
        }
    }

    /// Offset of the `type` field; `code` and `value` follow at +2 and +4.
    fn type_offset(self) -> usize {
        match self {
            RecordFormat::Evdev32 => 8,
            RecordFormat::Evdev64 => 16,
            RecordFormat::Keycode => 0,
        }
    }
}

impl std::fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordFormat::Evdev32 => write!(f, "evdev32"),
            RecordFormat::Evdev64 => write!(f, "evdev64"),
            RecordFormat::Keycode => write!(f, "keycode"),
        }
    }
}

impl std::str::FromStr for RecordFormat {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "evdev32" => Ok(RecordFormat::Evdev32),
            "evdev64" | "evdev" => Ok(RecordFormat::Evdev64),
            "keycode" => Ok(RecordFormat::Keycode),
            other => Err(InputError::UnknownFormat(other.to_string())),
        }
    }
}

/// A raw key transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEdge {
    Down(u16),
    Up,
}

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

/// Parse one record. Returns `Ok(None)` for records that are not key
/// presses or releases (sync events, LEDs, OS autorepeat).
pub fn parse_record(format: RecordFormat, bytes: &[u8]) -> Result<Option<KeyEdge>> {
    let expected = format.record_size();
    if bytes.len() < expected {
        return Err(InputError::ShortRecord {
            expected,
            got: bytes.len(),
        });
    }

    if format == RecordFormat::Keycode {
        return Ok(Some(match bytes[0] {
            0 => KeyEdge::Up,
            code => KeyEdge::Down(u16::from(code)),
        }));
    }

    let at = format.type_offset();
    if u16_at(bytes, at) != EV_KEY {
        return Ok(None);
    }
    let code = u16_at(bytes, at + 2);
    let value = i32::from_le_bytes([
        bytes[at + 4],
        bytes[at + 5],
        bytes[at + 6],
        bytes[at + 7],
    ]);
    Ok(match value {
        KEY_PRESS => Some(KeyEdge::Down(code)),
        KEY_RELEASE => Some(KeyEdge::Up),
        _ => None,
    })
}

#[cfg(test)]
pub(crate) fn evdev(format: RecordFormat, typ: u16, code: u16, value: i32) -> Vec<u8> {
    let mut rec = vec![0xAA; format.type_offset()];
    rec.extend_from_slice(&typ.to_le_bytes());
    rec.extend_from_slice(&code.to_le_bytes());
    rec.extend_from_slice(&value.to_le_bytes());
    rec
}
