//! Stateful reservoir simulator, used as the sensor source for local
//! development and when no transducer board is attached.
//!
//! Models:
//! - Temporal coherence via random walk with mean reversion
//! - Nutrient uptake: EC drifts down and pH drifts up between dosings
//! - Per-reading electronic noise
//! - Occasional spikes (sensor flakiness)
//! - Dosing response (nutrient pump raises EC, pH-down pump lowers pH)
//! - Reservoir draw-down while the main pump runs, slow refill otherwise

use std::fmt;
use std::time::Duration;

use crate::pumps::{Pump, PumpStates};
use crate::sensors::{Readings, SensorSource};

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal(rng: &mut fastrand::Rng) -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += rng.f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(rng: &mut fastrand::Rng, mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal(rng)
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `[sim] scenario`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Everything hovers inside the default thresholds. Slow uptake, so
    /// dosing is rare.
    Nominal,
    /// Fast uptake: EC falls and pH climbs out of range within a few cycles,
    /// exercising corrective dosing.
    Drifting,
    /// Reservoir starts just above the minimum and never refills, so the
    /// interlock trips during the first cycle.
    LowWater,
    /// High noise and ~10% spike rate. Exercises alerting on implausible
    /// readings.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "drifting" => Self::Drifting,
            "low-water" => Self::LowWater,
            "flaky" => Self::Flaky,
            _ => Self::Nominal, // default
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nominal => write!(f, "nominal"),
            Self::Drifting => write!(f, "drifting"),
            Self::LowWater => write!(f, "low-water"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-quantity state
// ---------------------------------------------------------------------------

/// One mean-reverting random walk.
struct Channel {
    /// Current "true" value. Evolves each sample.
    value: f64,
    center: f64,
    mean_reversion: f64,
    walk_sigma: f64,
    /// Signed drift per sample, independent of mean reversion.
    drift: f64,
    noise_sigma: f64,
    bounds: (f64, f64),
}

impl Channel {
    fn step(&mut self, rng: &mut fastrand::Rng) {
        let pull = self.mean_reversion * (self.center - self.value);
        let walk = gaussian(rng, 0.0, self.walk_sigma);
        self.value = (self.value + pull + walk + self.drift).clamp(self.bounds.0, self.bounds.1);
    }

    fn nudge(&mut self, delta: f64) {
        self.value = (self.value + delta).clamp(self.bounds.0, self.bounds.1);
    }

    /// Instantaneous reading: true value plus noise, clamped to what the
    /// transducer can physically report.
    fn read(&self, rng: &mut fastrand::Rng, spike: f64) -> f32 {
        let reading = self.value + gaussian(rng, 0.0, self.noise_sigma) + spike;
        reading.clamp(self.bounds.0, self.bounds.1) as f32
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// EC rise per second of nutrient pump run time, mS/cm.
const NUTRIENT_RESPONSE_PER_S: f64 = 0.06;
/// pH drop per second of pH-down pump run time.
const PH_DOWN_RESPONSE_PER_S: f64 = 0.12;
/// Reservoir capacity, cm.
const RESERVOIR_FULL_CM: f64 = 30.0;

pub struct HydroSim {
    rng: fastrand::Rng,
    temperature: Channel,
    humidity: Channel,
    ph: Channel,
    ec: Channel,

    // Reservoir
    water_level: f64,
    water_noise_sigma: f64,
    drain_per_sample: f64,
    refill_per_sample: f64,

    // Spike parameters
    spike_prob: f64,
    spike_scale: f64,

    pumps: PumpStates,
}

impl HydroSim {
    /// `seed` makes the run reproducible; `None` seeds from entropy.
    pub fn new(scenario: Scenario, seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(fastrand::Rng::new, fastrand::Rng::with_seed);

        let (ph_drift, ec_drift, start_level, drain, refill, noise_scale, spike_prob) =
            match scenario {
                Scenario::Nominal => (0.0004, -0.0002, 25.0, 0.8, 0.4, 1.0, 0.005),
                Scenario::Drifting => (0.02, -0.012, 25.0, 0.8, 0.4, 1.0, 0.005),
                Scenario::LowWater => (0.0004, -0.0002, 11.0, 1.5, 0.0, 1.0, 0.005),
                Scenario::Flaky => (0.0004, -0.0002, 25.0, 0.8, 0.4, 4.0, 0.10),
            };

        Self {
            rng,
            temperature: Channel {
                value: 22.5,
                center: 22.5,
                mean_reversion: 0.05,
                walk_sigma: 0.15,
                drift: 0.0,
                noise_sigma: 0.1 * noise_scale,
                bounds: (-10.0, 60.0),
            },
            humidity: Channel {
                value: 70.0,
                center: 70.0,
                mean_reversion: 0.05,
                walk_sigma: 0.6,
                drift: 0.0,
                noise_sigma: 0.5 * noise_scale,
                bounds: (0.0, 100.0),
            },
            ph: Channel {
                value: 6.0,
                center: 6.0,
                mean_reversion: 0.01,
                walk_sigma: 0.01,
                drift: ph_drift,
                noise_sigma: 0.02 * noise_scale,
                bounds: (0.0, 14.0),
            },
            ec: Channel {
                value: 1.85,
                center: 1.85,
                mean_reversion: 0.01,
                walk_sigma: 0.005,
                drift: ec_drift,
                noise_sigma: 0.01 * noise_scale,
                bounds: (0.0, 10.0),
            },
            water_level: start_level,
            water_noise_sigma: 0.1 * noise_scale,
            drain_per_sample: drain,
            refill_per_sample: refill,
            spike_prob,
            spike_scale: noise_scale,
            pumps: PumpStates::default(),
        }
    }

    fn spike(&mut self, sigma: f64) -> f64 {
        if self.rng.f64() < self.spike_prob {
            gaussian(&mut self.rng, 0.0, sigma * self.spike_scale)
        } else {
            0.0
        }
    }
}

impl SensorSource for HydroSim {
    fn read(&mut self) -> Readings {
        // -- Evolve the true values ---------------------------------------
        self.temperature.step(&mut self.rng);
        self.humidity.step(&mut self.rng);
        self.ph.step(&mut self.rng);
        self.ec.step(&mut self.rng);

        self.water_level = if self.pumps.main {
            self.water_level - self.drain_per_sample
        } else {
            self.water_level + self.refill_per_sample
        }
        .clamp(0.0, RESERVOIR_FULL_CM);

        // -- Build the instantaneous readings -----------------------------
        let temperature_spike = self.spike(5.0);
        let ph_spike = self.spike(1.0);
        let ec_spike = self.spike(0.5);
        let level_noise = gaussian(&mut self.rng, 0.0, self.water_noise_sigma);

        Readings {
            temperature: self.temperature.read(&mut self.rng, temperature_spike),
            humidity: self.humidity.read(&mut self.rng, 0.0),
            ph: self.ph.read(&mut self.rng, ph_spike),
            ec: self.ec.read(&mut self.rng, ec_spike),
            water_level: (self.water_level + level_noise).max(0.0) as f32,
        }
    }

    fn set_pumps(&mut self, states: PumpStates) {
        self.pumps = states;
    }

    fn record_dose(&mut self, pump: Pump, duration: Duration) {
        let secs = duration.as_secs_f64();
        match pump {
            Pump::Nutrient => self.ec.nudge(NUTRIENT_RESPONSE_PER_S * secs),
            Pump::PhDown => self.ph.nudge(-PH_DOWN_RESPONSE_PER_S * secs),
            Pump::Main => {}
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
