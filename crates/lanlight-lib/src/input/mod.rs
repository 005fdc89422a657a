//! Raw key input — record parsing, typematic repeat, per-device threads.

mod record;
mod repeat;
mod stream;

use std::fmt;

pub use record::{EV_KEY, KeyEdge, RecordFormat, parse_record};
pub use repeat::{Activate, RepeatScheduler, RepeatState, RepeatTiming};
pub use stream::{read_edges, run_scheduler, spawn_stream};

#[derive(Debug)]
pub enum InputError {
    /// The input device could not be opened.
    Open { path: String, source: std::io::Error },
    /// A record was shorter than its format requires.
    ShortRecord { expected: usize, got: usize },
    /// Unknown record format name.
    UnknownFormat(String),
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputError::Open { path, source } => write!(f, "Cannot open {path}: {source}"),
            InputError::ShortRecord { expected, got } => {
                write!(f, "Short input record: expected {expected} bytes, got {got}")
            }
            InputError::UnknownFormat(name) => {
                write!(
                    f,
                    "Unknown input format: {name} (use evdev32, evdev64 or keycode)"
                )
            }
        }
    }
}

impl std::error::Error for InputError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InputError::Open { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, InputError>;
