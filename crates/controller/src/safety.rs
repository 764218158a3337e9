//! Water-level interlock. Runs on its own period, independent of the
//! scheduler tick, and always wins: low water stops the main pump and ends
//! any cycle in progress, whatever the scheduler's timers say.

use std::fmt;
use tracing::warn;

use crate::pumps::{Actuators, Pump};
use crate::scheduler::IrrigationState;
use crate::sensors::SensorSnapshot;
use crate::thresholds::Thresholds;

/// Raised every time the check finds the reservoir below its minimum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LowWaterTrip {
    pub level: f32,
    pub min: f32,
    /// Whether a cycle was cut short by this trip.
    pub aborted_cycle: bool,
}

impl fmt::Display for LowWaterTrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Irrigation stopped - Low water level ({:.1} cm < {:.1} cm)",
            self.level, self.min
        )
    }
}

pub fn check_water_level<A: Actuators + ?Sized>(
    state: &mut IrrigationState,
    snap: &SensorSnapshot,
    thresholds: &Thresholds,
    pumps: &mut A,
) -> Option<LowWaterTrip> {
    if thresholds.water_level_ok(snap.water_level) {
        return None;
    }

    let aborted_cycle = state.is_irrigating;
    pumps.set(Pump::Main, false);
    state.is_irrigating = false;

    warn!(
        level = snap.water_level,
        min = thresholds.water_level_min,
        aborted_cycle,
        "safety: low water, main pump off"
    );

    Some(LowWaterTrip {
        level: snap.water_level,
        min: thresholds.water_level_min,
        aborted_cycle,
    })
}

// ===========================================================================
// Tests
// ===========================================================================
