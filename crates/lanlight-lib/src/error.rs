//! Unified error type for the lanlight-lib crate.
//!
//! [`LanlightError`] wraps the module errors (`LightError`, `InputError`)
//! plus I/O and configuration failures, so `?` works across module
//! boundaries.

use std::fmt;

use crate::device::LightError;
use crate::input::InputError;

/// Unified error type for lanlight-lib operations.
#[derive(Debug)]
pub enum LanlightError {
    /// Light discovery, transport or session error.
    Light(LightError),
    /// Input device error.
    Input(InputError),
    /// Standard I/O error (config persistence, threads).
    Io(std::io::Error),
    /// Configuration validation error.
    Config(String),
}

impl fmt::Display for LanlightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LanlightError::Light(e) => write!(f, "{e}"),
            LanlightError::Input(e) => write!(f, "{e}"),
            LanlightError::Io(e) => write!(f, "I/O error: {e}"),
            LanlightError::Config(e) => write!(f, "Config error: {e}"),
        }
    }
}

impl std::error::Error for LanlightError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LanlightError::Light(e) => Some(e),
            LanlightError::Input(e) => Some(e),
            LanlightError::Io(e) => Some(e),
            LanlightError::Config(_) => None,
        }
    }
}

impl From<LightError> for LanlightError {
    fn from(e: LightError) -> Self {
        LanlightError::Light(e)
    }
}

impl From<InputError> for LanlightError {
    fn from(e: InputError) -> Self {
        LanlightError::Input(e)
    }
}

impl From<std::io::Error> for LanlightError {
    fn from(e: std::io::Error) -> Self {
        LanlightError::Io(e)
    }
}

/// Crate-level Result alias using [`LanlightError`].
pub type Result<T> = std::result::Result<T, LanlightError>;
