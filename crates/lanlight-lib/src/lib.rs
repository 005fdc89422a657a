//! lanlight — drive LIFX lights on the local network from raw key input.

pub mod action;
pub mod backoff;
pub mod cloud;
pub mod config;
pub mod control;
pub mod device;
pub mod discovery;
pub mod error;
pub mod input;
pub mod lan;
pub mod reconnect;
pub mod session;

pub use error::LanlightError;
