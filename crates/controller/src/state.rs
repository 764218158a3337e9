use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::pumps::{Pump, PumpStates};
use crate::scheduler::IrrigationState;
use crate::sensors::SensorSnapshot;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Read-only mirror of the controller for the status API. The control loop
/// owns the real state and copies it in here after every pass.
pub struct SystemState {
    pub started_at: Instant,
    pub mqtt_connected: bool,
    pub irrigation: IrrigationState,
    pub pumps: PumpStates,
    pub snapshot: Option<TimedSnapshot>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct TimedSnapshot {
    #[serde(with = "time::serde::rfc3339")]
    pub taken_at: OffsetDateTime,
    #[serde(flatten)]
    pub snapshot: SensorSnapshot,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Reading,
    Alert,
    Status,
    Override,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub irrigation: IrrigationState,
    pub pumps: PumpStates,
    pub snapshot: Option<TimedSnapshot>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            mqtt_connected: false,
            irrigation: IrrigationState::default(),
            pumps: PumpStates::default(),
            snapshot: None,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Record a sampling pass.
    pub fn record_reading(&mut self, snap: SensorSnapshot) {
        let detail = format!(
            "temp={:.1} hum={:.1} ph={:.2} ec={:.2} level={:.1}",
            snap.temperature, snap.humidity, snap.ph, snap.ec, snap.water_level
        );
        self.snapshot = Some(TimedSnapshot {
            taken_at: OffsetDateTime::now_utc(),
            snapshot: snap,
        });
        self.push_event(EventKind::Reading, detail);
    }

    /// Copy the controller's authoritative state into the mirror.
    pub fn sync(&mut self, irrigation: IrrigationState, pumps: PumpStates) {
        self.irrigation = irrigation;
        self.pumps = pumps;
    }

    pub fn record_alert(&mut self, detail: String) {
        self.push_event(EventKind::Alert, detail);
    }

    pub fn record_status(&mut self, detail: String) {
        self.push_event(EventKind::Status, detail);
    }

    /// Record a manual pump command.
    pub fn record_override(&mut self, pump: Pump, on: bool) {
        let state_str = if on { "ON" } else { "OFF" };
        self.push_event(
            EventKind::Override,
            format!("{} pump set {state_str}", pump.as_str()),
        );
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot. Events are newest first.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected,
            irrigation: self.irrigation,
            pumps: self.pumps,
            snapshot: self.snapshot.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn snap() -> SensorSnapshot {
        SensorSnapshot {
            temperature: 22.0,
            humidity: 70.0,
            ph: 6.0,
            ec: 1.8,
            water_level: 25.0,
            pump_active: [false, true],
        }
    }

    #[test]
    fn new_state_is_idle_and_empty() {
        let st = SystemState::new();
        assert!(!st.mqtt_connected);
        assert!(!st.irrigation.is_irrigating);
        assert!(st.snapshot.is_none());
        assert!(st.events.is_empty());
    }

    #[test]
    fn record_reading_stores_snapshot_and_event() {
        let mut st = SystemState::new();
        st.record_reading(snap());

        assert_eq!(st.snapshot.as_ref().map(|s| s.snapshot), Some(snap()));
        assert_eq!(st.events.len(), 1);
        assert_eq!(st.events[0].kind, EventKind::Reading);
        assert!(st.events[0].detail.contains("ph=6.00"));
    }

    #[test]
    fn record_override_detail() {
        let mut st = SystemState::new();
        st.record_override(Pump::Nutrient, true);
        assert_eq!(st.events[0].kind, EventKind::Override);
        assert_eq!(st.events[0].detail, "nutrient pump set ON");
    }

    #[test]
    fn ring_buffer_is_bounded() {
        let mut st = SystemState::new();
        for i in 0..(MAX_EVENTS + 25) {
            st.record_status(format!("event {i}"));
        }
        assert_eq!(st.events.len(), MAX_EVENTS);
        assert_eq!(st.events.front().map(|e| e.detail.as_str()), Some("event 25"));
    }

    #[test]
    fn status_lists_newest_first() {
        let mut st = SystemState::new();
        st.record_system("first".to_string());
        st.record_alert("second".to_string());

        let status = st.to_status();
        assert_eq!(status.events[0].detail, "second");
        assert_eq!(status.events[1].detail, "first");
    }

    #[test]
    fn status_json_shape() {
        let mut st = SystemState::new();
        st.sync(
            IrrigationState {
                is_irrigating: true,
                cycle_start_ms: 10,
                last_cycle_start_ms: 10,
            },
            PumpStates {
                main: true,
                ..PumpStates::default()
            },
        );
        st.record_reading(snap());
        st.record_error("bad".to_string());

        let v = serde_json::to_value(st.to_status()).unwrap();
        assert_eq!(v["irrigation"]["is_irrigating"], true);
        assert_eq!(v["pumps"]["main"], true);
        assert_eq!(v["snapshot"]["ph"], 6.0);
        assert!(v["snapshot"]["taken_at"].is_string());
        assert_eq!(v["events"][0]["kind"], "error");
        assert!(v["events"][0]["ts"].is_string());
    }
}
