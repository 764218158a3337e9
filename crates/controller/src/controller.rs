//! One owner for everything the control loop touches: sensors, pumps, wall
//! clock and irrigation state. The loop in `main` only decides *when* a pass
//! runs; this module decides what a pass does and what it publishes.

use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::config::Config;
use crate::mqtt::{Outbound, PumpOverride, TelemetryMsg};
use crate::night::{gate, NightWindow, WallClock};
use crate::pumps::{Actuators, PumpStates};
use crate::safety::check_water_level;
use crate::scheduler::{IrrigationState, Scheduler, StatusEvent};
use crate::sensors::{SensorSnapshot, SensorSource};
use crate::thresholds::{evaluate, Thresholds};

// ---------------------------------------------------------------------------
// Loop timing
// ---------------------------------------------------------------------------

/// Periodic timer reporting each tick as milliseconds since a shared base.
///
/// The reported time is the tick's scheduled deadline, not the moment the
/// loop got round to it, so consecutive sampling ticks are always at least
/// one period apart.
pub struct TickTimer {
    base: Instant,
    interval: Interval,
}

impl TickTimer {
    pub fn new(base: Instant, period: Duration) -> Self {
        let mut interval = interval_at(base, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { base, interval }
    }

    pub async fn tick(&mut self) -> u64 {
        let at = self.interval.tick().await;
        at.duration_since(self.base).as_millis() as u64
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct Controller<S, A, C> {
    scheduler: Scheduler,
    thresholds: Thresholds,
    night: NightWindow,
    state: IrrigationState,
    sensors: S,
    pumps: A,
    clock: C,
    last_snapshot: Option<SensorSnapshot>,
}

impl<S, A, C> Controller<S, A, C>
where
    S: SensorSource,
    A: Actuators,
    C: WallClock,
{
    pub fn new(cfg: &Config, sensors: S, pumps: A, clock: C) -> Self {
        Self {
            scheduler: Scheduler::new(&cfg.timing, &cfg.thresholds),
            thresholds: cfg.thresholds.clone(),
            night: cfg.night_mode,
            state: IrrigationState::default(),
            sensors,
            pumps,
            clock,
            last_snapshot: None,
        }
    }

    fn sample(&mut self) -> SensorSnapshot {
        let pumps = self.pumps.states();
        self.sensors.set_pumps(pumps);
        let snap = SensorSnapshot::new(self.sensors.read(), &pumps);
        self.last_snapshot = Some(snap);
        snap
    }

    /// Sampling tick: read, publish telemetry, raise alerts, then let the
    /// scheduler act. Returns only after any dosing pulse has finished.
    pub async fn sampling_pass(&mut self, now_ms: u64) -> Vec<Outbound> {
        let snap = self.sample();
        info!(
            temperature = snap.temperature,
            humidity = snap.humidity,
            ph = snap.ph,
            ec = snap.ec,
            water_level = snap.water_level,
            "reading"
        );

        let mut out = vec![Outbound::Telemetry(TelemetryMsg::now(&snap))];

        for alert in evaluate(&snap, &self.thresholds) {
            warn!(quantity = ?alert.quantity, value = alert.value, "{alert}");
            out.push(Outbound::Alert(alert.to_string()));
        }

        let clock = &self.clock;
        let night = &self.night;
        let outcome = self
            .scheduler
            .tick(
                &mut self.state,
                &snap,
                now_ms,
                || gate(clock, night),
                &mut self.pumps,
            )
            .await;

        for event in outcome.events {
            if let StatusEvent::Dosed { pump, duration } = event {
                self.sensors.record_dose(pump, duration);
            }
            out.push(Outbound::Status(event.to_string()));
        }

        out
    }

    /// Interlock tick: fresh reading, water level only.
    pub fn safety_pass(&mut self) -> Vec<Outbound> {
        let snap = self.sample();
        check_water_level(&mut self.state, &snap, &self.thresholds, &mut self.pumps)
            .map(|trip| Outbound::Alert(trip.to_string()))
            .into_iter()
            .collect()
    }

    /// Manual command. Drives the pump directly and leaves the cycle alone.
    pub fn apply_override(&mut self, cmd: PumpOverride) {
        info!(pump = cmd.pump.as_str(), on = cmd.on, "manual override");
        self.pumps.set(cmd.pump, cmd.on);
    }

    pub fn shutdown(&mut self) {
        info!("switching all pumps off");
        self.pumps.all_off();
    }

    pub fn irrigation(&self) -> IrrigationState {
        self.state
    }

    pub fn pump_states(&self) -> PumpStates {
        self.pumps.states()
    }

    pub fn last_snapshot(&self) -> Option<SensorSnapshot> {
        self.last_snapshot
    }
}

// ===========================================================================
// Tests
// ===========================================================================
