//! Decoding of everything published under the base topic, plus the bounded
//! history the `status` command prints.

use serde::Deserialize;
use std::collections::VecDeque;
use std::fmt::Write as _;
use time::macros::format_description;
use time::OffsetDateTime;

const MAX_READINGS: usize = 100;
const MAX_STATUS: usize = 10;
const MAX_ALERTS: usize = 10;

// ---------------------------------------------------------------------------
// MQTT message types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Telemetry {
    pub ts: i64,
    pub temperature: f32,
    pub humidity: f32,
    pub ph: f32,
    pub ec: f32,
    pub water_level: f32,
    pub pump1: bool,
    pub pump2: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Telemetry(Telemetry),
    Alert(String),
    Status(String),
    /// A pump command, ours or anyone else's.
    Control { target: String, payload: String },
}

/// Decode a message received on `topic`. `Ok(None)` for topics outside the
/// controller's layout.
pub fn classify(base: &str, topic: &str, payload: &[u8]) -> Result<Option<Inbound>, String> {
    let Some(suffix) = topic.strip_prefix(base) else {
        return Ok(None);
    };
    let text = || String::from_utf8_lossy(payload).trim().to_string();

    let msg = match suffix {
        "sensors" => {
            let t = serde_json::from_slice::<Telemetry>(payload)
                .map_err(|e| format!("bad telemetry json: {e}"))?;
            Inbound::Telemetry(t)
        }
        "alerts" => Inbound::Alert(text()),
        "status" => Inbound::Status(text()),
        other => match other.strip_prefix("control/") {
            Some(target) if !target.is_empty() && !target.contains('/') => Inbound::Control {
                target: target.to_string(),
                payload: text(),
            },
            _ => return Ok(None),
        },
    };
    Ok(Some(msg))
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Stamped {
    pub at: OffsetDateTime,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct History {
    readings: VecDeque<Telemetry>,
    statuses: VecDeque<Stamped>,
    alerts: VecDeque<Stamped>,
}

fn push_bounded<T>(buf: &mut VecDeque<T>, item: T, cap: usize) {
    if buf.len() >= cap {
        buf.pop_front();
    }
    buf.push_back(item);
}

impl History {
    pub fn ingest(&mut self, msg: Inbound, at: OffsetDateTime) {
        match msg {
            Inbound::Telemetry(t) => push_bounded(&mut self.readings, t, MAX_READINGS),
            Inbound::Alert(text) => push_bounded(&mut self.alerts, Stamped { at, text }, MAX_ALERTS),
            Inbound::Status(text) => {
                push_bounded(&mut self.statuses, Stamped { at, text }, MAX_STATUS)
            }
            Inbound::Control { .. } => {}
        }
    }

    pub fn latest(&self) -> Option<&Telemetry> {
        self.readings.back()
    }

    pub fn reading_count(&self) -> usize {
        self.readings.len()
    }

    /// Human-readable digest for the console.
    pub fn summary(&self) -> String {
        let mut out = String::new();

        match self.latest() {
            Some(t) => {
                let _ = writeln!(
                    out,
                    "Latest reading ({} buffered):\n  temperature {:.1} °C  humidity {:.1} %\n  \
                     pH {:.2}  EC {:.2} mS/cm  water level {:.1} cm\n  \
                     pH-down pump {}  nutrient pump {}",
                    self.readings.len(),
                    t.temperature,
                    t.humidity,
                    t.ph,
                    t.ec,
                    t.water_level,
                    on_off(t.pump1),
                    on_off(t.pump2),
                );
            }
            None => out.push_str("No readings yet.\n"),
        }

        section(&mut out, "Status", &self.statuses);
        section(&mut out, "Alerts", &self.alerts);
        out
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

fn section(out: &mut String, title: &str, items: &VecDeque<Stamped>) {
    let _ = writeln!(out, "{title} ({}):", items.len());
    let fmt = format_description!("[hour]:[minute]:[second]");
    for item in items.iter().rev() {
        let at = item.at.format(fmt).unwrap_or_default();
        let _ = writeln!(out, "  [{at}] {}", item.text);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
