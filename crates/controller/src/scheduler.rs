//! Irrigation scheduler: decides once per sampling tick whether to start,
//! continue or end an irrigation cycle, and runs corrective dosing at the
//! moment a cycle starts.
//!
//! ## State machine
//!
//! ```text
//!         ┌──[interval elapsed, day]────────▶ Irrigating ──[duration elapsed]──┐
//!  Idle ──┤                                                                     │
//!   ▲ ▲   └──[interval elapsed, night or no clock]──▶ skipped (stays Idle)      │
//!   │ └────────────────────────────────────────────────────────────────────────┘
//!   └──────── water-level interlock (`safety`), any time between ticks
//! ```
//!
//! [`Scheduler::decide`] is pure; [`Scheduler::tick`] applies its decision to
//! the state, the pumps and the event list.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::TimingConfig;
use crate::night::ClockError;
use crate::pumps::{pulse, Actuators, Pump};
use crate::sensors::SensorSnapshot;
use crate::thresholds::Thresholds;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Cycle bookkeeping. Owned by the control loop and handed to every tick.
///
/// Times are milliseconds on a monotonic clock starting at process start.
/// `cycle_start_ms` only means something while `is_irrigating` is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IrrigationState {
    pub is_irrigating: bool,
    pub cycle_start_ms: u64,
    pub last_cycle_start_ms: u64,
}

// ---------------------------------------------------------------------------
// Decisions and events
// ---------------------------------------------------------------------------

/// Corrective pulses to run at cycle start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dosing {
    pub nutrient: bool,
    pub ph_down: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Cycle duration reached; stop the main pump.
    Complete,
    /// Cycle still running.
    Continue,
    /// Inter-cycle interval not yet elapsed.
    Wait,
    Start(Dosing),
    SkipNightMode,
    SkipClockUnavailable(ClockError),
}

/// Published on the status channel, one per transition or pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    CycleStarted,
    CycleCompleted,
    SkippedNightMode,
    SkippedClockUnavailable,
    Dosed { pump: Pump, duration: Duration },
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CycleStarted => f.write_str("Starting irrigation cycle"),
            Self::CycleCompleted => f.write_str("Irrigation cycle completed"),
            Self::SkippedNightMode => f.write_str("Irrigation skipped - Night mode"),
            Self::SkippedClockUnavailable => f.write_str("Irrigation skipped - Clock unavailable"),
            Self::Dosed { pump, duration } => write!(
                f,
                "Dosing {} pump for {} ms",
                match pump {
                    Pump::Nutrient => "nutrient",
                    Pump::PhDown => "pH-down",
                    Pump::Main => "main",
                },
                duration.as_millis()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    pub decision: Decision,
    pub events: Vec<StatusEvent>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler {
    interval_ms: u64,
    duration_ms: u64,
    nutrient_pulse: Duration,
    ph_down_pulse: Duration,
    ec_min: f32,
    ph_max: f32,
}

impl Scheduler {
    pub fn new(timing: &TimingConfig, thresholds: &Thresholds) -> Self {
        Self {
            interval_ms: timing.irrigation_interval_ms,
            duration_ms: timing.irrigation_duration_ms,
            nutrient_pulse: timing.nutrient_pulse(),
            ph_down_pulse: timing.ph_down_pulse(),
            ec_min: thresholds.ec.min,
            ph_max: thresholds.ph.max,
        }
    }

    /// Decide what this tick should do. `gate` is consulted only when a new
    /// cycle is due; `Ok(true)` means night mode.
    pub fn decide<G>(
        &self,
        state: &IrrigationState,
        snap: &SensorSnapshot,
        now_ms: u64,
        gate: G,
    ) -> Decision
    where
        G: FnOnce() -> Result<bool, ClockError>,
    {
        if state.is_irrigating {
            return if now_ms.saturating_sub(state.cycle_start_ms) >= self.duration_ms {
                Decision::Complete
            } else {
                Decision::Continue
            };
        }

        if now_ms.saturating_sub(state.last_cycle_start_ms) < self.interval_ms {
            return Decision::Wait;
        }

        match gate() {
            Ok(true) => Decision::SkipNightMode,
            Ok(false) => Decision::Start(self.dosing_for(snap)),
            Err(e) => Decision::SkipClockUnavailable(e),
        }
    }

    /// Strict comparisons: a NaN reading never triggers a dose.
    fn dosing_for(&self, snap: &SensorSnapshot) -> Dosing {
        Dosing {
            nutrient: snap.ec < self.ec_min,
            ph_down: snap.ph > self.ph_max,
        }
    }

    /// Run one tick: decide, then apply the decision. Dosing pulses are
    /// awaited in place, so the tick returns only once every pump it touched
    /// is back off (except the main pump of a cycle it started).
    pub async fn tick<A, G>(
        &self,
        state: &mut IrrigationState,
        snap: &SensorSnapshot,
        now_ms: u64,
        gate: G,
        pumps: &mut A,
    ) -> TickOutcome
    where
        A: Actuators + ?Sized,
        G: FnOnce() -> Result<bool, ClockError>,
    {
        let decision = self.decide(state, snap, now_ms, gate);
        let mut events = Vec::new();

        match decision {
            Decision::Continue | Decision::Wait => {}
            Decision::Complete => {
                pumps.set(Pump::Main, false);
                state.is_irrigating = false;
                info!(
                    elapsed_ms = now_ms.saturating_sub(state.cycle_start_ms),
                    "scheduler: cycle complete"
                );
                events.push(StatusEvent::CycleCompleted);
            }
            Decision::SkipNightMode => {
                info!("scheduler: cycle due but night mode active, skipping");
                events.push(StatusEvent::SkippedNightMode);
            }
            Decision::SkipClockUnavailable(e) => {
                warn!(error = %e, "scheduler: cycle due but wall clock unavailable, skipping");
                events.push(StatusEvent::SkippedClockUnavailable);
            }
            Decision::Start(dosing) => {
                pumps.set(Pump::Main, true);
                state.is_irrigating = true;
                state.cycle_start_ms = now_ms;
                state.last_cycle_start_ms = now_ms;
                info!(
                    ec = snap.ec,
                    ph = snap.ph,
                    dose_nutrient = dosing.nutrient,
                    dose_ph_down = dosing.ph_down,
                    "scheduler: starting cycle"
                );
                events.push(StatusEvent::CycleStarted);

                if dosing.nutrient {
                    events.push(self.dose(pumps, Pump::Nutrient, self.nutrient_pulse).await);
                }
                if dosing.ph_down {
                    events.push(self.dose(pumps, Pump::PhDown, self.ph_down_pulse).await);
                }
            }
        }

        TickOutcome { decision, events }
    }

    async fn dose<A: Actuators + ?Sized>(
        &self,
        pumps: &mut A,
        pump: Pump,
        duration: Duration,
    ) -> StatusEvent {
        info!(pump = pump.as_str(), duration_ms = duration.as_millis() as u64, "scheduler: dosing");
        pulse(pumps, pump, duration).await;
        StatusEvent::Dosed { pump, duration }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pumps::PumpStates;
    use tokio::time::Instant;

    const INTERVAL: u64 = 3_600_000;
    const DURATION: u64 = 300_000;

    /// Records every switch so tests can check ordering.
    #[derive(Default)]
    struct RecordingBoard {
        states: PumpStates,
        switches: Vec<(Pump, bool)>,
    }

    impl Actuators for RecordingBoard {
        fn set(&mut self, pump: Pump, on: bool) {
            match pump {
                Pump::PhDown => self.states.ph_down = on,
                Pump::Nutrient => self.states.nutrient = on,
                Pump::Main => self.states.main = on,
            }
            self.switches.push((pump, on));
        }

        fn states(&self) -> PumpStates {
            self.states
        }
    }

    impl RecordingBoard {
        fn switches_of(&self, pump: Pump) -> Vec<bool> {
            self.switches
                .iter()
                .filter(|(p, _)| *p == pump)
                .map(|(_, on)| *on)
                .collect()
        }
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(&TimingConfig::default(), &Thresholds::default())
    }

    fn nominal() -> SensorSnapshot {
        SensorSnapshot {
            temperature: 22.0,
            humidity: 70.0,
            ph: 6.0,
            ec: 1.8,
            water_level: 25.0,
            pump_active: [false, false],
        }
    }

    fn day() -> Result<bool, ClockError> {
        Ok(false)
    }

    fn night() -> Result<bool, ClockError> {
        Ok(true)
    }

    fn irrigating_since(start: u64) -> IrrigationState {
        IrrigationState {
            is_irrigating: true,
            cycle_start_ms: start,
            last_cycle_start_ms: start,
        }
    }

    // -- decide: idle -------------------------------------------------------

    #[test]
    fn idle_before_interval_waits() {
        let s = scheduler();
        let d = s.decide(&IrrigationState::default(), &nominal(), INTERVAL - 1, day);
        assert_eq!(d, Decision::Wait);
    }

    #[test]
    fn gate_not_consulted_while_waiting() {
        let s = scheduler();
        let d = s.decide(&IrrigationState::default(), &nominal(), 1_000, || {
            panic!("gate consulted before interval elapsed")
        });
        assert_eq!(d, Decision::Wait);
    }

    #[test]
    fn idle_after_interval_starts_in_daytime() {
        let s = scheduler();
        let d = s.decide(&IrrigationState::default(), &nominal(), INTERVAL, day);
        assert_eq!(d, Decision::Start(Dosing::default()));
    }

    #[test]
    fn idle_after_interval_skips_at_night() {
        let s = scheduler();
        let d = s.decide(&IrrigationState::default(), &nominal(), INTERVAL, night);
        assert_eq!(d, Decision::SkipNightMode);
    }

    #[test]
    fn idle_after_interval_skips_without_clock() {
        let s = scheduler();
        let d = s.decide(&IrrigationState::default(), &nominal(), INTERVAL, || {
            Err(ClockError::OffsetUnknown)
        });
        assert_eq!(d, Decision::SkipClockUnavailable(ClockError::OffsetUnknown));
    }

    #[test]
    fn interval_measured_from_last_start() {
        let s = scheduler();
        let state = IrrigationState {
            is_irrigating: false,
            cycle_start_ms: 10_000,
            last_cycle_start_ms: 10_000,
        };
        assert_eq!(s.decide(&state, &nominal(), 10_000 + INTERVAL - 1, day), Decision::Wait);
        assert!(matches!(
            s.decide(&state, &nominal(), 10_000 + INTERVAL, day),
            Decision::Start(_)
        ));
    }

    // -- decide: irrigating -------------------------------------------------

    #[test]
    fn completion_boundary_is_inclusive() {
        let s = scheduler();
        let state = irrigating_since(1_000);
        assert_eq!(s.decide(&state, &nominal(), 1_000 + DURATION - 1, day), Decision::Continue);
        assert_eq!(s.decide(&state, &nominal(), 1_000 + DURATION, day), Decision::Complete);
    }

    #[test]
    fn never_starts_while_irrigating() {
        let s = scheduler();
        let state = irrigating_since(0);
        // Far past both duration and interval, gate open: completion wins.
        for now in [1, DURATION - 1, DURATION, INTERVAL, INTERVAL * 5] {
            let d = s.decide(&state, &nominal(), now, day);
            assert!(!matches!(d, Decision::Start(_)), "started at {now}: {d:?}");
        }
    }

    // -- decide: dosing -----------------------------------------------------

    #[test]
    fn dosing_follows_ec_min_and_ph_max() {
        let s = scheduler();
        let cases = [
            (1.8, 6.0, Dosing { nutrient: false, ph_down: false }),
            (1.0, 6.0, Dosing { nutrient: true, ph_down: false }),
            (1.8, 7.0, Dosing { nutrient: false, ph_down: true }),
            (1.0, 7.0, Dosing { nutrient: true, ph_down: true }),
            // Exactly on the bound is not a correction.
            (1.5, 6.5, Dosing { nutrient: false, ph_down: false }),
            // Low pH is never corrected by the pH-down pump.
            (1.8, 5.0, Dosing { nutrient: false, ph_down: false }),
        ];
        for (ec, ph, expected) in cases {
            let snap = SensorSnapshot { ec, ph, ..nominal() };
            let d = s.decide(&IrrigationState::default(), &snap, INTERVAL, day);
            assert_eq!(d, Decision::Start(expected), "ec={ec} ph={ph}");
        }
    }

    #[test]
    fn nan_readings_never_dose() {
        let s = scheduler();
        let snap = SensorSnapshot {
            ec: f32::NAN,
            ph: f32::NAN,
            ..nominal()
        };
        let d = s.decide(&IrrigationState::default(), &snap, INTERVAL, day);
        assert_eq!(d, Decision::Start(Dosing::default()));
    }

    // -- tick ---------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn start_with_low_ec_pulses_nutrient_only() {
        let s = scheduler();
        let mut state = IrrigationState::default();
        let mut board = RecordingBoard::default();
        let snap = SensorSnapshot {
            ec: 1.0,
            ph: 6.0,
            ..nominal()
        };

        let started = Instant::now();
        let out = s.tick(&mut state, &snap, INTERVAL, day, &mut board).await;

        assert!(board.is_on(Pump::Main));
        assert_eq!(board.switches_of(Pump::Nutrient), vec![true, false]);
        assert!(board.switches_of(Pump::PhDown).is_empty());
        assert!(state.is_irrigating);
        assert_eq!(state.cycle_start_ms, INTERVAL);
        assert_eq!(state.last_cycle_start_ms, INTERVAL);
        assert_eq!(
            out.events,
            vec![
                StatusEvent::CycleStarted,
                StatusEvent::Dosed {
                    pump: Pump::Nutrient,
                    duration: Duration::from_millis(5_000)
                },
            ]
        );
        assert!(started.elapsed() >= Duration::from_millis(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn both_doses_run_in_sequence_after_main_pump() {
        let s = scheduler();
        let mut state = IrrigationState::default();
        let mut board = RecordingBoard::default();
        let snap = SensorSnapshot {
            ec: 1.0,
            ph: 7.0,
            ..nominal()
        };

        let started = Instant::now();
        s.tick(&mut state, &snap, INTERVAL, day, &mut board).await;

        assert_eq!(
            board.switches,
            vec![
                (Pump::Main, true),
                (Pump::Nutrient, true),
                (Pump::Nutrient, false),
                (Pump::PhDown, true),
                (Pump::PhDown, false),
            ]
        );
        assert!(started.elapsed() >= Duration::from_millis(8_000));
    }

    #[tokio::test(start_paused = true)]
    async fn completion_stops_main_pump_and_goes_idle() {
        let s = scheduler();
        let mut state = irrigating_since(INTERVAL);
        let mut board = RecordingBoard::default();
        board.set(Pump::Main, true);

        let out = s
            .tick(&mut state, &nominal(), INTERVAL + DURATION, day, &mut board)
            .await;

        assert_eq!(out.decision, Decision::Complete);
        assert_eq!(out.events, vec![StatusEvent::CycleCompleted]);
        assert!(!state.is_irrigating);
        assert!(!board.is_on(Pump::Main));
        assert_eq!(state.last_cycle_start_ms, INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_and_restart_never_share_a_tick() {
        // Completion falls on the same instant the next cycle would be due.
        let timing = TimingConfig {
            irrigation_interval_ms: 1_000,
            irrigation_duration_ms: 999,
            ..TimingConfig::default()
        };
        let s = Scheduler::new(&timing, &Thresholds::default());
        let mut state = irrigating_since(0);
        let mut board = RecordingBoard::default();

        let out = s.tick(&mut state, &nominal(), 5_000, day, &mut board).await;

        assert_eq!(out.decision, Decision::Complete);
        assert!(!state.is_irrigating);
        assert!(!board.is_on(Pump::Main));

        // The next tick is free to start again.
        let out = s.tick(&mut state, &nominal(), 5_000, day, &mut board).await;
        assert!(matches!(out.decision, Decision::Start(_)));
        assert_eq!(state.last_cycle_start_ms, 5_000);
    }

    #[tokio::test(start_paused = true)]
    async fn night_skip_touches_nothing() {
        let s = scheduler();
        let mut state = IrrigationState::default();
        let mut board = RecordingBoard::default();
        let snap = SensorSnapshot {
            ec: 1.0,
            ph: 7.0,
            ..nominal()
        };

        let out = s.tick(&mut state, &snap, INTERVAL, night, &mut board).await;

        assert_eq!(out.events, vec![StatusEvent::SkippedNightMode]);
        assert!(board.switches.is_empty());
        assert_eq!(state, IrrigationState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn clock_failure_skip_touches_nothing() {
        let s = scheduler();
        let mut state = IrrigationState::default();
        let mut board = RecordingBoard::default();

        let out = s
            .tick(&mut state, &nominal(), INTERVAL, || Err(ClockError::NotSynchronised(1970)), &mut board)
            .await;

        assert_eq!(out.events, vec![StatusEvent::SkippedClockUnavailable]);
        assert!(board.switches.is_empty());
        assert!(!state.is_irrigating);
        assert_eq!(state.last_cycle_start_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn mid_cycle_tick_does_not_dose_again() {
        let s = scheduler();
        let mut state = irrigating_since(INTERVAL);
        let mut board = RecordingBoard::default();
        let snap = SensorSnapshot {
            ec: 0.5,
            ph: 8.0,
            ..nominal()
        };

        let out = s
            .tick(&mut state, &snap, INTERVAL + 1_000, day, &mut board)
            .await;

        assert_eq!(out.decision, Decision::Continue);
        assert!(out.events.is_empty());
        assert!(board.switches.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_tick_emits_nothing() {
        let s = scheduler();
        let mut state = IrrigationState::default();
        let mut board = RecordingBoard::default();

        let out = s.tick(&mut state, &nominal(), 0, day, &mut board).await;

        assert_eq!(out.decision, Decision::Wait);
        assert!(out.events.is_empty());
    }

    // -- Messages -----------------------------------------------------------

    #[test]
    fn status_messages() {
        assert_eq!(StatusEvent::CycleStarted.to_string(), "Starting irrigation cycle");
        assert_eq!(StatusEvent::CycleCompleted.to_string(), "Irrigation cycle completed");
        assert_eq!(
            StatusEvent::SkippedNightMode.to_string(),
            "Irrigation skipped - Night mode"
        );
        assert_eq!(
            StatusEvent::Dosed {
                pump: Pump::PhDown,
                duration: Duration::from_millis(3_000)
            }
            .to_string(),
            "Dosing pH-down pump for 3000 ms"
        );
    }
}
