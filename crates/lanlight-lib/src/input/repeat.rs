//! Typematic repeat — turns key edges into press and repeat activations.
//!
//! The scheduler is a pure state machine over caller-supplied instants:
//! feed edges with [`RepeatScheduler::on_edge`], and call
//! [`RepeatScheduler::on_timer`] once [`RepeatScheduler::next_due`] passes.
//! The OS's own autorepeat is never consulted.

use std::time::{Duration, Instant};

use super::KeyEdge;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatTiming {
    /// Hold time before the first repeat.
    pub initial_delay: Duration,
    /// Time between repeats after the first.
    pub interval: Duration,
}

impl Default for RepeatTiming {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            interval: Duration::from_millis(100),
        }
    }
}

/// A logical key activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activate {
    pub code: u16,
    /// `false` for the press itself, `true` for every repeat after it.
    pub is_repeat: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatState {
    Idle,
    PressedWaitingInitialRepeat { code: u16, due: Instant },
    Repeating { code: u16, due: Instant },
}

#[derive(Debug, Clone)]
pub struct RepeatScheduler {
    timing: RepeatTiming,
    state: RepeatState,
}

impl RepeatScheduler {
    pub fn new(timing: RepeatTiming) -> Self {
        Self {
            timing,
            state: RepeatState::Idle,
        }
    }

    pub fn state(&self) -> RepeatState {
        self.state
    }

    /// When the armed timer fires, if any.
    pub fn next_due(&self) -> Option<Instant> {
        match self.state {
            RepeatState::Idle => None,
            RepeatState::PressedWaitingInitialRepeat { due, .. }
            | RepeatState::Repeating { due, .. } => Some(due),
        }
    }

    /// Apply a raw edge. A press (even of a new key while another is held)
    /// restarts the sequence and activates immediately; a release disarms.
    pub fn on_edge(&mut self, edge: KeyEdge, now: Instant) -> Option<Activate> {
        match edge {
            KeyEdge::Down(code) => {
                self.state = RepeatState::PressedWaitingInitialRepeat {
                    code,
                    due: now + self.timing.initial_delay,
                };
                Some(Activate {
                    code,
                    is_repeat: false,
                })
            }
            KeyEdge::Up => {
                self.state = RepeatState::Idle;
                None
            }
        }
    }

    /// Fire the armed timer if it is due at `now`.
    ///
    /// The next repeat is scheduled one interval after `now`, so a late
    /// wake-up never produces a burst.
    pub fn on_timer(&mut self, now: Instant) -> Option<Activate> {
        match self.state {
            RepeatState::PressedWaitingInitialRepeat { code, due }
            | RepeatState::Repeating { code, due }
                if now >= due =>
            {
                self.state = RepeatState::Repeating {
                    code,
                    due: now + self.timing.interval,
                };
                Some(Activate {
                    code,
                    is_repeat: true,
                })
            }
            _ => None,
        }
    }
}
