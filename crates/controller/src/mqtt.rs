//! MQTT plumbing: topic layout, wire payloads, the outbound publisher and
//! the event-loop task that turns inbound control messages into pump
//! overrides.

use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::pumps::Pump;
use crate::sensors::SensorSnapshot;
use crate::state::SharedState;

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// Topic names derived from the configured base (which ends in `/`).
#[derive(Debug, Clone)]
pub struct Topics {
    base: String,
}

impl Topics {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.to_string(),
        }
    }

    pub fn sensors(&self) -> String {
        format!("{}sensors", self.base)
    }

    pub fn alerts(&self) -> String {
        format!("{}alerts", self.base)
    }

    pub fn status(&self) -> String {
        format!("{}status", self.base)
    }

    /// Subscription filter covering every pump control topic.
    pub fn control_filter(&self) -> String {
        format!("{}control/+", self.base)
    }

    /// Map "<base>control/pump1" / "<base>control/pump2" to the pump they drive.
    pub fn control_pump(&self, topic: &str) -> Option<Pump> {
        match topic.strip_prefix(&self.base)?.strip_prefix("control/")? {
            "pump1" => Some(Pump::PhDown),
            "pump2" => Some(Pump::Nutrient),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

/// One telemetry message, published on `<base>sensors` every sampling pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMsg {
    /// Unix seconds.
    pub ts: i64,
    pub temperature: f32,
    pub humidity: f32,
    pub ph: f32,
    pub ec: f32,
    pub water_level: f32,
    /// pH-down pump.
    pub pump1: bool,
    /// Nutrient pump.
    pub pump2: bool,
}

impl TelemetryMsg {
    pub fn from_snapshot(snap: &SensorSnapshot, ts: i64) -> Self {
        Self {
            ts,
            temperature: snap.temperature,
            humidity: snap.humidity,
            ph: snap.ph,
            ec: snap.ec,
            water_level: snap.water_level,
            pump1: snap.pump_active[0],
            pump2: snap.pump_active[1],
        }
    }

    pub fn now(snap: &SensorSnapshot) -> Self {
        Self::from_snapshot(snap, OffsetDateTime::now_utc().unix_timestamp())
    }
}

/// Everything the control loop publishes.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Telemetry(TelemetryMsg),
    Alert(String),
    Status(String),
}

/// A manual pump command received over MQTT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpOverride {
    pub pump: Pump,
    pub on: bool,
}

/// Parse an "ON"/"OFF" payload into a bool (case-insensitive, trims whitespace).
pub fn parse_pump_command(payload: &[u8]) -> Result<bool, String> {
    let s = String::from_utf8_lossy(payload).trim().to_uppercase();
    match s.as_str() {
        "ON" => Ok(true),
        "OFF" => Ok(false),
        _ => Err(format!("unknown pump command '{s}'")),
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Fire-and-forget publisher. Never blocks the control loop: if the client
/// queue is full or the broker is gone, the message is dropped and logged.
#[derive(Clone)]
pub struct Publisher {
    client: AsyncClient,
    topics: Topics,
}

impl Publisher {
    pub fn new(client: AsyncClient, topics: Topics) -> Self {
        Self { client, topics }
    }

    pub fn publish(&self, msg: &Outbound) {
        let (topic, payload) = match msg {
            Outbound::Telemetry(t) => match serde_json::to_vec(t) {
                Ok(json) => (self.topics.sensors(), json),
                Err(e) => {
                    warn!(error = %e, "mqtt: telemetry encode failed");
                    return;
                }
            },
            Outbound::Alert(text) => (self.topics.alerts(), text.clone().into_bytes()),
            Outbound::Status(text) => (self.topics.status(), text.clone().into_bytes()),
        };

        if let Err(e) = self
            .client
            .try_publish(topic.as_str(), QoS::AtMostOnce, false, payload)
        {
            warn!(%topic, error = %e, "mqtt: publish dropped");
        }
    }
}

// ---------------------------------------------------------------------------
// Reconnect backoff
// ---------------------------------------------------------------------------

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Exponential backoff, 1 s doubling to a 30 s ceiling.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            current: BACKOFF_INITIAL,
        }
    }
}

impl Backoff {
    /// Delay to wait now; the following call returns double, up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(BACKOFF_MAX);
        delay
    }

    pub fn reset(&mut self) {
        self.current = BACKOFF_INITIAL;
    }
}

// ---------------------------------------------------------------------------
// Event loop task
// ---------------------------------------------------------------------------

/// Drive the MQTT connection forever. Parsed overrides go to `overrides`;
/// connection changes and rejected commands are mirrored into `shared`.
pub async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: Topics,
    overrides: mpsc::Sender<PumpOverride>,
    shared: SharedState,
) {
    let mut backoff = Backoff::default();

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                backoff.reset();
                let filter = topics.control_filter();
                if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                    warn!(%filter, error = %e, "mqtt: subscribe failed");
                }
                info!(%filter, "mqtt connected");

                let mut st = shared.write().await;
                st.mqtt_connected = true;
                st.record_system("mqtt connected".to_string());
            }
            Ok(Event::Incoming(Packet::Publish(p))) => {
                let Some(pump) = topics.control_pump(&p.topic) else {
                    debug!(topic = %p.topic, "mqtt: unhandled topic");
                    continue;
                };

                match parse_pump_command(&p.payload) {
                    Ok(on) => {
                        if overrides.send(PumpOverride { pump, on }).await.is_err() {
                            // Control loop has gone away; nothing left to drive.
                            return;
                        }
                    }
                    Err(msg) => {
                        warn!(topic = %p.topic, "{msg} (use ON/OFF)");
                        shared.write().await.record_error(format!("{}: {msg}", p.topic));
                    }
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                info!("mqtt disconnected");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_system("mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(error = %e, retry_in_secs = delay.as_secs(), "mqtt error, reconnecting");
                {
                    let mut st = shared.write().await;
                    st.mqtt_connected = false;
                    st.record_error(format!("mqtt error: {e}"));
                }
                sleep(delay).await;
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
