//! Sensor snapshot type and the provider seam the control loop samples.
//!
//! Converting raw transducer output into engineering units happens behind
//! [`SensorSource`]; everything downstream only ever sees a
//! [`SensorSnapshot`].

use serde::Serialize;
use std::time::Duration;

use crate::pumps::{Pump, PumpStates};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Engineering-unit readings from the transducers, before pump states are
/// attached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Readings {
    /// Air temperature, °C.
    pub temperature: f32,
    /// Relative humidity, %.
    pub humidity: f32,
    pub ph: f32,
    /// Electrical conductivity, mS/cm.
    pub ec: f32,
    /// Reservoir water level, cm.
    pub water_level: f32,
}

/// Point-in-time view of the installation. Immutable once produced; a new
/// one is taken on every sampling pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorSnapshot {
    pub temperature: f32,
    pub humidity: f32,
    pub ph: f32,
    pub ec: f32,
    pub water_level: f32,
    /// `[pH-down, nutrient]` dosing pump states at sampling time.
    pub pump_active: [bool; 2],
}

impl SensorSnapshot {
    pub fn new(readings: Readings, pumps: &PumpStates) -> Self {
        Self {
            temperature: readings.temperature,
            humidity: readings.humidity,
            ph: readings.ph,
            ec: readings.ec,
            water_level: readings.water_level,
            pump_active: [pumps.ph_down, pumps.nutrient],
        }
    }
}

// ---------------------------------------------------------------------------
// Provider seam
// ---------------------------------------------------------------------------

/// Anything that can produce a set of readings on demand.
pub trait SensorSource {
    /// Take one reading of every transducer.
    fn read(&mut self) -> Readings;

    /// Current actuator states, reported before every read. Physical
    /// transducers see the effect of the pumps directly and ignore this.
    fn set_pumps(&mut self, _states: PumpStates) {}

    /// A dosing pulse of `duration` on `pump` has just completed.
    fn record_dose(&mut self, _pump: Pump, _duration: Duration) {}
}

// ===========================================================================
// Tests
// ===========================================================================
