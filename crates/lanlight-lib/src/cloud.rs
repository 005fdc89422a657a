//! LIFX cloud fallback.
//!
//! Used only while the LAN group is down. Covers absolute actions (power,
//! presets, brightness); relative steps need a readable light and are
//! skipped.

use std::time::Duration;

use serde_json::json;

use crate::action::Action;
use crate::device::{LightError, Power, Result};

/// Cloud endpoint that sets the state of every light on the account.
pub const DEFAULT_STATE_URL: &str = "https://api.lifx.com/v1/lights/all/state";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Form body for a power change.
pub fn power_form(power: Power) -> [(&'static str, String); 1] {
    [("power", power.to_string())]
}

/// JSON body selecting plain white at `kelvin` and a brightness fraction,
/// powered on.
pub fn white_json(kelvin: u16, brightness: f32) -> serde_json::Value {
    let brightness = crate::session::clamp_fraction(brightness);
    json!({
        "color": format!("kelvin:{kelvin} brightness:{brightness}"),
        "power": "on",
    })
}

fn brightness_json(brightness: f32) -> serde_json::Value {
    json!({ "brightness": crate::session::clamp_fraction(brightness) })
}

pub struct CloudClient {
    http: reqwest::blocking::Client,
    url: String,
    token: String,
}

impl CloudClient {
    pub fn new(url: &str, token: &str) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("lanlight/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LightError::Http(e.to_string()))?;
        Ok(Self {
            http,
            url: url.to_string(),
            token: token.to_string(),
        })
    }

    pub fn set_power(&self, power: Power) -> Result<()> {
        self.send(
            self.http
                .put(&self.url)
                .bearer_auth(&self.token)
                .form(&power_form(power)),
        )
    }

    pub fn set_white(&self, kelvin: u16, brightness: f32) -> Result<()> {
        self.send(
            self.http
                .put(&self.url)
                .bearer_auth(&self.token)
                .json(&white_json(kelvin, brightness)),
        )
    }

    /// Apply `action` through the cloud. Returns `false` for actions the
    /// cloud path does not cover.
    pub fn apply(&self, action: Action) -> Result<bool> {
        match action {
            Action::PowerOn => self.set_power(Power::On)?,
            Action::PowerOff => self.set_power(Power::Off)?,
            Action::Preset { kelvin, brightness } => self.set_white(kelvin, brightness)?,
            Action::Brightness(v) => self.send(
                self.http
                    .put(&self.url)
                    .bearer_auth(&self.token)
                    .json(&brightness_json(v)),
            )?,
            _ => return Ok(false),
        }
        log::info!("[cloud] {action}");
        Ok(true)
    }

    fn send(&self, request: reqwest::blocking::RequestBuilder) -> Result<()> {
        let response = request
            .send()
            .map_err(|e| LightError::Http(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().unwrap_or_default();
            Err(LightError::Http(format!("{status}: {}", body.trim())))
        }
    }
}
