//! Threshold evaluation: compares every quantity in a snapshot against its
//! configured acceptable range and reports each one that falls outside.
//!
//! Evaluation is stateless. The same condition is reported again on every
//! pass for as long as it persists.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::sensors::SensorSnapshot;

// ---------------------------------------------------------------------------
// Configured ranges
// ---------------------------------------------------------------------------

/// Inclusive acceptable range for one quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRange {
    pub min: f32,
    pub max: f32,
}

impl ThresholdRange {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// `min <= value <= max`. NaN is never contained.
    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub ph: ThresholdRange,
    /// mS/cm
    pub ec: ThresholdRange,
    /// °C
    pub temperature: ThresholdRange,
    /// %RH
    pub humidity: ThresholdRange,
    /// Lower bound only, cm.
    pub water_level_min: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            ph: ThresholdRange::new(5.5, 6.5),
            ec: ThresholdRange::new(1.5, 2.2),
            temperature: ThresholdRange::new(20.0, 25.0),
            humidity: ThresholdRange::new(60.0, 80.0),
            water_level_min: 10.0,
        }
    }
}

impl Thresholds {
    /// NaN counts as low.
    pub fn water_level_ok(&self, level: f32) -> bool {
        level >= self.water_level_min
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    Ph,
    Ec,
    Temperature,
    Humidity,
    WaterLevel,
}

impl Quantity {
    fn label(self) -> &'static str {
        match self {
            Self::Ph => "pH",
            Self::Ec => "EC",
            Self::Temperature => "Temperature",
            Self::Humidity => "Humidity",
            Self::WaterLevel => "Water level",
        }
    }

    fn unit(self) -> &'static str {
        match self {
            Self::Ph => "",
            Self::Ec => " mS/cm",
            Self::Temperature => " °C",
            Self::Humidity => " %",
            Self::WaterLevel => " cm",
        }
    }

    fn precision(self) -> usize {
        match self {
            Self::Ph | Self::Ec => 2,
            Self::Temperature | Self::Humidity | Self::WaterLevel => 1,
        }
    }
}

/// One out-of-range condition found in a single evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Alert {
    pub quantity: Quantity,
    pub value: f32,
    pub min: f32,
    /// `None` for lower-bound-only quantities.
    pub max: Option<f32>,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let q = self.quantity;
        let p = q.precision();
        let unit = q.unit();
        match self.max {
            Some(max) => write!(
                f,
                "{} out of range: {:.p$}{unit} (expected {:.p$}-{:.p$}{unit})",
                q.label(),
                self.value,
                self.min,
                max
            ),
            None => write!(
                f,
                "{} low: {:.p$}{unit} (minimum {:.p$}{unit})",
                q.label(),
                self.value,
                self.min
            ),
        }
    }
}

/// Alerts in evaluation order: pH, EC, temperature, humidity, water level.
pub type AlertSet = Vec<Alert>;

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

pub fn evaluate(snap: &SensorSnapshot, t: &Thresholds) -> AlertSet {
    let mut alerts = AlertSet::new();

    let ranged = [
        (Quantity::Ph, snap.ph, t.ph),
        (Quantity::Ec, snap.ec, t.ec),
        (Quantity::Temperature, snap.temperature, t.temperature),
        (Quantity::Humidity, snap.humidity, t.humidity),
    ];
    for (quantity, value, range) in ranged {
        if !range.contains(value) {
            alerts.push(Alert {
                quantity,
                value,
                min: range.min,
                max: Some(range.max),
            });
        }
    }

    if !t.water_level_ok(snap.water_level) {
        alerts.push(Alert {
            quantity: Quantity::WaterLevel,
            value: snap.water_level,
            min: t.water_level_min,
            max: None,
        });
    }

    alerts
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn nominal() -> SensorSnapshot {
        SensorSnapshot {
            temperature: 22.5,
            humidity: 70.0,
            ph: 6.0,
            ec: 1.8,
            water_level: 25.0,
            pump_active: [false, false],
        }
    }

    fn quantities(alerts: &AlertSet) -> Vec<Quantity> {
        alerts.iter().map(|a| a.quantity).collect()
    }

    // -- In range ---------------------------------------------------------

    #[test]
    fn nominal_snapshot_raises_nothing() {
        assert!(evaluate(&nominal(), &Thresholds::default()).is_empty());
    }

    #[test]
    fn bounds_are_inclusive() {
        let t = Thresholds::default();
        let snap = SensorSnapshot {
            ph: 5.5,
            ec: 2.2,
            temperature: 20.0,
            humidity: 80.0,
            water_level: 10.0,
            ..nominal()
        };
        assert!(evaluate(&snap, &t).is_empty());
    }

    // -- Single quantity out of range -------------------------------------

    #[test]
    fn each_quantity_alone_raises_exactly_one_alert() {
        let t = Thresholds::default();
        let cases = [
            (SensorSnapshot { ph: 7.2, ..nominal() }, Quantity::Ph),
            (SensorSnapshot { ph: 5.0, ..nominal() }, Quantity::Ph),
            (SensorSnapshot { ec: 1.0, ..nominal() }, Quantity::Ec),
            (SensorSnapshot { ec: 3.0, ..nominal() }, Quantity::Ec),
            (
                SensorSnapshot {
                    temperature: 27.0,
                    ..nominal()
                },
                Quantity::Temperature,
            ),
            (
                SensorSnapshot {
                    humidity: 55.0,
                    ..nominal()
                },
                Quantity::Humidity,
            ),
            (
                SensorSnapshot {
                    water_level: 8.0,
                    ..nominal()
                },
                Quantity::WaterLevel,
            ),
        ];

        for (snap, expected) in cases {
            let alerts = evaluate(&snap, &t);
            assert_eq!(quantities(&alerts), vec![expected], "snapshot: {snap:?}");
        }
    }

    // -- Multiple / ordering ----------------------------------------------

    #[test]
    fn all_out_of_range_reported_in_order() {
        let snap = SensorSnapshot {
            temperature: 30.0,
            humidity: 10.0,
            ph: 8.0,
            ec: 0.2,
            water_level: 1.0,
            pump_active: [false, false],
        };
        let alerts = evaluate(&snap, &Thresholds::default());
        assert_eq!(
            quantities(&alerts),
            vec![
                Quantity::Ph,
                Quantity::Ec,
                Quantity::Temperature,
                Quantity::Humidity,
                Quantity::WaterLevel,
            ]
        );
    }

    #[test]
    fn evaluation_is_stateless() {
        let t = Thresholds::default();
        let snap = SensorSnapshot { ph: 7.0, ..nominal() };
        assert_eq!(evaluate(&snap, &t), evaluate(&snap, &t));
        assert_eq!(evaluate(&snap, &t).len(), 1);
    }

    // -- Malformed readings -----------------------------------------------

    #[test]
    fn nan_reading_is_out_of_range() {
        let t = Thresholds::default();
        let snap = SensorSnapshot {
            ph: f32::NAN,
            water_level: f32::NAN,
            ..nominal()
        };
        assert_eq!(
            quantities(&evaluate(&snap, &t)),
            vec![Quantity::Ph, Quantity::WaterLevel]
        );
    }

    // -- Messages ---------------------------------------------------------

    #[test]
    fn two_sided_alert_message() {
        let alert = Alert {
            quantity: Quantity::Ph,
            value: 7.2,
            min: 5.5,
            max: Some(6.5),
        };
        assert_eq!(
            alert.to_string(),
            "pH out of range: 7.20 (expected 5.50-6.50)"
        );
    }

    #[test]
    fn two_sided_alert_carries_unit_on_bounds() {
        let alert = Alert {
            quantity: Quantity::Temperature,
            value: 27.0,
            min: 20.0,
            max: Some(25.0),
        };
        assert_eq!(
            alert.to_string(),
            "Temperature out of range: 27.0 °C (expected 20.0-25.0 °C)"
        );
    }

    #[test]
    fn lower_bound_alert_message() {
        let alert = Alert {
            quantity: Quantity::WaterLevel,
            value: 8.0,
            min: 10.0,
            max: None,
        };
        assert_eq!(alert.to_string(), "Water level low: 8.0 cm (minimum 10.0 cm)");
    }

    #[test]
    fn range_contains_rejects_nan() {
        let r = ThresholdRange::new(0.0, 1.0);
        assert!(r.contains(0.5));
        assert!(!r.contains(f32::NAN));
    }
}
