//! Operator commands typed on stdin.

pub const USAGE: &str = "commands:\n  \
    ph on|off        pH-down pump (alias: pump1)\n  \
    nutrient on|off  nutrient pump (alias: pump2)\n  \
    status           latest reading, recent status and alerts\n  \
    help             this text";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpTarget {
    PhDown,
    Nutrient,
}

impl PumpTarget {
    /// Last segment of the control topic the controller listens on.
    pub fn control_suffix(self) -> &'static str {
        match self {
            Self::PhDown => "pump1",
            Self::Nutrient => "pump2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pump { target: PumpTarget, on: bool },
    Status,
    Help,
}

impl Command {
    /// Payload to publish for a pump command.
    pub fn payload(on: bool) -> &'static str {
        if on {
            "ON"
        } else {
            "OFF"
        }
    }
}

/// Parse one input line. Blank lines are `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Command>, String> {
    let lower = line.trim().to_ascii_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();

    let cmd = match words.as_slice() {
        [] => return Ok(None),
        ["status"] => Command::Status,
        ["help"] | ["?"] => Command::Help,
        [pump, state] => {
            let target = match *pump {
                "ph" | "pump1" => PumpTarget::PhDown,
                "nutrient" | "pump2" => PumpTarget::Nutrient,
                _ => return Err(format!("unknown pump '{pump}'")),
            };
            let on = match *state {
                "on" => true,
                "off" => false,
                _ => return Err(format!("expected on/off, got '{state}'")),
            };
            Command::Pump { target, on }
        }
        _ => return Err(format!("unknown command '{}'", line.trim())),
    };
    Ok(Some(cmd))
}

// ===========================================================================
// Tests
// ===========================================================================
