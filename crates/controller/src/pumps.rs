//! Pump control via GPIO. The `gpio` feature gates the real rppal driver;
//! without it, a mock board keeps pump state in memory and logs changes.

use anyhow::Result;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};
#[cfg(feature = "gpio")]
use std::collections::HashMap;

use crate::config::PinConfig;

// ---------------------------------------------------------------------------
// Pump identity and state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pump {
    PhDown,
    Nutrient,
    Main,
}

impl Pump {
    pub const ALL: [Pump; 3] = [Pump::PhDown, Pump::Nutrient, Pump::Main];

    pub const fn as_str(self) -> &'static str {
        match self {
            Pump::PhDown => "ph_down",
            Pump::Nutrient => "nutrient",
            Pump::Main => "main",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PumpStates {
    pub ph_down: bool,
    pub nutrient: bool,
    pub main: bool,
}

impl PumpStates {
    pub fn get(&self, pump: Pump) -> bool {
        match pump {
            Pump::PhDown => self.ph_down,
            Pump::Nutrient => self.nutrient,
            Pump::Main => self.main,
        }
    }

    fn slot(&mut self, pump: Pump) -> &mut bool {
        match pump {
            Pump::PhDown => &mut self.ph_down,
            Pump::Nutrient => &mut self.nutrient,
            Pump::Main => &mut self.main,
        }
    }
}

// ---------------------------------------------------------------------------
// Actuator interface
// ---------------------------------------------------------------------------

/// On/off control over the three pumps.
pub trait Actuators {
    fn set(&mut self, pump: Pump, on: bool);

    fn states(&self) -> PumpStates;

    fn is_on(&self, pump: Pump) -> bool {
        self.states().get(pump)
    }

    fn all_off(&mut self) {
        for pump in Pump::ALL {
            self.set(pump, false);
        }
    }
}

/// Run `pump` for `duration`, then switch it off.
///
/// The on/off bracket is atomic from the caller's side: nothing else on the
/// awaiting task runs until the pump is off again, and there is no way to
/// cut the hold short.
pub async fn pulse<A: Actuators + ?Sized>(board: &mut A, pump: Pump, duration: Duration) {
    board.set(pump, true);
    tokio::time::sleep(duration).await;
    board.set(pump, false);
}

// ---------------------------------------------------------------------------
// Real GPIO pump board (production: requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct PumpBoard {
    pins: HashMap<Pump, OutputPin>,
    active_low: bool, // many relay boards are active-low
    states: PumpStates,
}

#[cfg(feature = "gpio")]
impl PumpBoard {
    pub fn new(cfg: &PinConfig) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut pins = HashMap::new();

        for pump in Pump::ALL {
            let mut pin = gpio.get(cfg.pin_for(pump))?.into_output();

            // Fail-safe: ensure "OFF" at startup
            if cfg.active_low {
                pin.set_high();
            } else {
                pin.set_low();
            }

            pins.insert(pump, pin);
        }

        Ok(Self {
            pins,
            active_low: cfg.active_low,
            states: PumpStates::default(),
        })
    }
}

#[cfg(feature = "gpio")]
impl Actuators for PumpBoard {
    fn set(&mut self, pump: Pump, on: bool) {
        let Some(pin) = self.pins.get_mut(&pump) else {
            return;
        };
        // active-low relay: LOW = ON, HIGH = OFF
        if on != self.active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }
        let slot = self.states.slot(pump);
        if *slot != on {
            *slot = on;
            info!(pump = pump.as_str(), on, "pump switched");
        }
    }

    fn states(&self) -> PumpStates {
        self.states
    }
}

// ---------------------------------------------------------------------------
// Mock pump board (development: no hardware, logs state changes)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct PumpBoard {
    states: PumpStates,
}

#[cfg(not(feature = "gpio"))]
impl PumpBoard {
    pub fn new(cfg: &PinConfig) -> Result<Self> {
        for pump in Pump::ALL {
            info!(
                pump = pump.as_str(),
                gpio = cfg.pin_for(pump),
                "[mock-gpio] registered pump (not wired)"
            );
        }
        Ok(Self {
            states: PumpStates::default(),
        })
    }
}

#[cfg(not(feature = "gpio"))]
impl Actuators for PumpBoard {
    fn set(&mut self, pump: Pump, on: bool) {
        let slot = self.states.slot(pump);
        if *slot != on {
            *slot = on;
            info!(pump = pump.as_str(), on, "[mock-gpio] pump switched");
        }
    }

    fn states(&self) -> PumpStates {
        self.states
    }
}

// ===========================================================================
// Tests
// ===========================================================================
