//! Night-mode gate: decides from the local hour whether automatic irrigation
//! starts are suppressed. When the wall clock can't be trusted the gate
//! returns an error instead of an answer, and callers must not start a cycle.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;
use time::{OffsetDateTime, UtcOffset};

/// Readings from before this year mean the clock was never set.
const MIN_SYNCED_YEAR: i32 = 2020;

// ---------------------------------------------------------------------------
// Window
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NightWindow {
    /// First suppressed hour (0-23).
    pub start_hour: u8,
    /// First hour irrigation is allowed again (0-23).
    pub end_hour: u8,
    /// Fixed offset from UTC. `None` uses the host's local offset.
    pub utc_offset_hours: Option<i8>,
}

impl Default for NightWindow {
    fn default() -> Self {
        Self {
            start_hour: 20,
            end_hour: 6,
            utc_offset_hours: None,
        }
    }
}

impl NightWindow {
    /// Whether automatic starts are suppressed at `hour`.
    ///
    /// `start > end` wraps midnight (20 → 6 suppresses 20:00-05:59).
    /// `start < end` is a same-day window. Equal bounds never suppress.
    pub fn is_suppressed(&self, hour: u8) -> bool {
        match self.start_hour.cmp(&self.end_hour) {
            Ordering::Greater => hour >= self.start_hour || hour < self.end_hour,
            Ordering::Less => hour >= self.start_hour && hour < self.end_hour,
            Ordering::Equal => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Wall clock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("local UTC offset could not be determined")]
    OffsetUnknown,
    #[error("system clock not synchronised (year {0})")]
    NotSynchronised(i32),
}

/// Source of the local hour of day.
pub trait WallClock {
    fn local_hour(&self) -> Result<u8, ClockError>;
}

/// Host system clock, shifted to local time.
pub struct SystemClock {
    offset: Option<UtcOffset>,
}

impl SystemClock {
    pub fn new(utc_offset_hours: Option<i8>) -> Result<Self> {
        let offset = utc_offset_hours
            .map(|h| {
                UtcOffset::from_hms(h, 0, 0)
                    .with_context(|| format!("invalid utc_offset_hours: {h}"))
            })
            .transpose()?;
        Ok(Self { offset })
    }
}

impl WallClock for SystemClock {
    fn local_hour(&self) -> Result<u8, ClockError> {
        let offset = match self.offset {
            Some(o) => o,
            None => UtcOffset::current_local_offset().map_err(|_| ClockError::OffsetUnknown)?,
        };
        local_hour_at(OffsetDateTime::now_utc(), offset)
    }
}

fn local_hour_at(now_utc: OffsetDateTime, offset: UtcOffset) -> Result<u8, ClockError> {
    let year = now_utc.year();
    if year < MIN_SYNCED_YEAR {
        return Err(ClockError::NotSynchronised(year));
    }
    Ok(now_utc.to_offset(offset).hour())
}

/// Consult the clock. `Ok(true)` means irrigation is suppressed right now.
pub fn gate<C: WallClock + ?Sized>(clock: &C, window: &NightWindow) -> Result<bool, ClockError> {
    clock.local_hour().map(|hour| window.is_suppressed(hour))
}

// ===========================================================================
// Tests
// ===========================================================================
