//! TOML config file loading and validation. Every setting has a default
//! matching the reference installation, so an empty file is a valid config.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::time::Duration;

use crate::night::NightWindow;
use crate::pumps::Pump;
use crate::thresholds::{ThresholdRange, Thresholds};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub web: WebConfig,
    pub pins: PinConfig,
    pub timing: TimingConfig,
    pub night_mode: NightWindow,
    pub thresholds: Thresholds,
    pub sim: SimConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Prefix for every topic, including the trailing `/`.
    pub base_topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_sec: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "hydro-controller".to_string(),
            base_topic: "hydroponics/".to_string(),
            username: None,
            password: None,
            keep_alive_sec: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

/// BCM pin numbers of the pump relays.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    pub ph_down_pump: u8,
    pub nutrient_pump: u8,
    pub main_pump: u8,
    pub active_low: bool,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            ph_down_pump: 19,
            nutrient_pump: 21,
            main_pump: 22,
            active_low: false,
        }
    }
}

impl PinConfig {
    pub fn pin_for(&self, pump: Pump) -> u8 {
        match pump {
            Pump::PhDown => self.ph_down_pump,
            Pump::Nutrient => self.nutrient_pump,
            Pump::Main => self.main_pump,
        }
    }
}

/// All periods and durations, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub reading_interval_ms: u64,
    pub safety_check_interval_ms: u64,
    pub irrigation_interval_ms: u64,
    pub irrigation_duration_ms: u64,
    pub nutrient_pulse_ms: u64,
    pub ph_down_pulse_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reading_interval_ms: 300_000,
            safety_check_interval_ms: 60_000,
            irrigation_interval_ms: 3_600_000,
            irrigation_duration_ms: 300_000,
            nutrient_pulse_ms: 5_000,
            ph_down_pulse_ms: 3_000,
        }
    }
}

impl TimingConfig {
    pub fn reading_interval(&self) -> Duration {
        Duration::from_millis(self.reading_interval_ms)
    }

    pub fn safety_check_interval(&self) -> Duration {
        Duration::from_millis(self.safety_check_interval_ms)
    }

    pub fn nutrient_pulse(&self) -> Duration {
        Duration::from_millis(self.nutrient_pulse_ms)
    }

    pub fn ph_down_pulse(&self) -> Duration {
        Duration::from_millis(self.ph_down_pulse_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// `nominal`, `drifting`, `low-water` or `flaky`.
    pub scenario: String,
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            scenario: "nominal".to_string(),
            seed: None,
        }
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
const VALID_GPIO_PINS: std::ops::RangeInclusive<u8> = 2..=27;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all settings. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_mqtt(&mut errors);
        self.validate_pins(&mut errors);
        self.validate_timing(&mut errors);
        self.validate_night_mode(&mut errors);
        self.validate_thresholds(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_mqtt(&self, errors: &mut Vec<String>) {
        let m = &self.mqtt;
        if m.host.trim().is_empty() {
            errors.push("mqtt: host is empty".to_string());
        }
        if m.port == 0 {
            errors.push("mqtt: port must be non-zero".to_string());
        }
        if m.client_id.trim().is_empty() {
            errors.push("mqtt: client_id is empty".to_string());
        }
        if m.base_topic.is_empty() || !m.base_topic.ends_with('/') {
            errors.push(format!(
                "mqtt: base_topic '{}' must be non-empty and end with '/'",
                m.base_topic
            ));
        }
        if m.base_topic.contains(['+', '#']) {
            errors.push(format!(
                "mqtt: base_topic '{}' must not contain wildcards",
                m.base_topic
            ));
        }
        if m.username.is_some() != m.password.is_some() {
            errors.push("mqtt: username and password must be set together".to_string());
        }
        if m.keep_alive_sec == 0 {
            errors.push("mqtt: keep_alive_sec must be positive".to_string());
        }
        if self.web.enabled && self.web.port == 0 {
            errors.push("web: port must be non-zero".to_string());
        }
    }

    fn validate_pins(&self, errors: &mut Vec<String>) {
        let mut seen: HashSet<u8> = HashSet::new();
        for pump in Pump::ALL {
            let pin = self.pins.pin_for(pump);
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "pins: {} pump gpio {pin} is not a valid BCM GPIO pin (allowed: 2-27)",
                    pump.as_str()
                ));
            } else if !seen.insert(pin) {
                errors.push(format!(
                    "pins: {} pump gpio {pin} is already used by another pump",
                    pump.as_str()
                ));
            }
        }
    }

    fn validate_timing(&self, errors: &mut Vec<String>) {
        let t = &self.timing;
        let positive = [
            ("reading_interval_ms", t.reading_interval_ms),
            ("safety_check_interval_ms", t.safety_check_interval_ms),
            ("irrigation_interval_ms", t.irrigation_interval_ms),
            ("irrigation_duration_ms", t.irrigation_duration_ms),
            ("nutrient_pulse_ms", t.nutrient_pulse_ms),
            ("ph_down_pulse_ms", t.ph_down_pulse_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                errors.push(format!("timing: {name} must be positive"));
            }
        }

        if t.irrigation_duration_ms > 0 && t.irrigation_duration_ms >= t.irrigation_interval_ms {
            errors.push(format!(
                "timing: irrigation_duration_ms ({}) must be less than irrigation_interval_ms ({})",
                t.irrigation_duration_ms, t.irrigation_interval_ms
            ));
        }
    }

    fn validate_night_mode(&self, errors: &mut Vec<String>) {
        let n = &self.night_mode;
        if n.start_hour > 23 {
            errors.push(format!(
                "night_mode: start_hour {} out of range [0, 23]",
                n.start_hour
            ));
        }
        if n.end_hour > 23 {
            errors.push(format!(
                "night_mode: end_hour {} out of range [0, 23]",
                n.end_hour
            ));
        }
        if let Some(h) = n.utc_offset_hours {
            if !(-12..=14).contains(&h) {
                errors.push(format!(
                    "night_mode: utc_offset_hours {h} out of range [-12, 14]"
                ));
            }
        }
    }

    fn validate_thresholds(&self, errors: &mut Vec<String>) {
        let t = &self.thresholds;
        let ranges: [(&str, ThresholdRange); 4] = [
            ("ph", t.ph),
            ("ec", t.ec),
            ("temperature", t.temperature),
            ("humidity", t.humidity),
        ];
        for (name, r) in ranges {
            if !r.min.is_finite() || !r.max.is_finite() {
                errors.push(format!(
                    "thresholds: {name} bounds must be finite (min {}, max {})",
                    r.min, r.max
                ));
            } else if r.min > r.max {
                errors.push(format!(
                    "thresholds: {name} min ({}) must not exceed max ({})",
                    r.min, r.max
                ));
            }
        }

        if !t.water_level_min.is_finite() || t.water_level_min < 0.0 {
            errors.push(format!(
                "thresholds: water_level_min {} must be finite and non-negative",
                t.water_level_min
            ));
        }
    }

    /// Environment overrides for deployment-specific settings.
    fn apply_env(&mut self) {
        if let Ok(host) = env::var("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = env::var("MQTT_PORT").ok().and_then(|s| s.parse().ok()) {
            self.mqtt.port = port;
        }
        if let Some(port) = env::var("WEB_PORT").ok().and_then(|s| s.parse().ok()) {
            self.web.port = port;
        }
        // Many common relay boards are active-low.
        if let Ok(v) = env::var("RELAY_ACTIVE_LOW") {
            self.pins.active_low = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse a TOML config file, apply environment overrides, then
/// validate the result.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let mut config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config.apply_env();
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
