use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub const YELLOW_SECONDS: u32 = 3;

/// Outbound serial token encoding the chosen signal duration bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandCode {
    #[serde(rename = "m0")]
    M0,
    #[serde(rename = "m1")]
    M1,
    #[serde(rename = "m2")]
    M2,
    #[serde(rename = "m3")]
    M3,
    #[serde(rename = "m4")]
    M4,
}

impl CommandCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandCode::M0 => "m0",
            CommandCode::M1 => "m1",
            CommandCode::M2 => "m2",
            CommandCode::M3 => "m3",
            CommandCode::M4 => "m4",
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalPlan {
    pub duration_seconds: u32,
    pub command: CommandCode,
    pub green_seconds: u32,
    pub yellow_seconds: u32,
    pub timestamp_ms: u64,
}

/// Maps a vehicle total onto a red-phase duration bucket and its command code.
pub fn plan(total_vehicles: u32) -> SignalPlan {
    let (duration_seconds, command) = match total_vehicles {
        0 => (30, CommandCode::M0),
        1..=4 => (20, CommandCode::M1),
        5..=10 => (45, CommandCode::M2),
        11..=20 => (60, CommandCode::M3),
        _ => (90, CommandCode::M4),
    };

    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    SignalPlan {
        duration_seconds,
        command,
        green_seconds: duration_seconds.saturating_sub(YELLOW_SECONDS),
        yellow_seconds: YELLOW_SECONDS,
        timestamp_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_boundaries() {
        let cases = [
            (0, 30, CommandCode::M0),
            (1, 20, CommandCode::M1),
            (4, 20, CommandCode::M1),
            (5, 45, CommandCode::M2),
            (10, 45, CommandCode::M2),
            (11, 60, CommandCode::M3),
            (20, 60, CommandCode::M3),
            (21, 90, CommandCode::M4),
            (100, 90, CommandCode::M4),
        ];

        for (total, duration, command) in cases {
            let plan = plan(total);
            assert_eq!(plan.duration_seconds, duration, "total={}", total);
            assert_eq!(plan.command, command, "total={}", total);
        }
    }

    #[test]
    fn test_green_seconds_invariant() {
        for total in 0..=30 {
            let plan = plan(total);
            assert_eq!(plan.yellow_seconds, YELLOW_SECONDS);
            assert_eq!(
                plan.green_seconds,
                plan.duration_seconds.saturating_sub(YELLOW_SECONDS)
            );
        }
    }

    #[test]
    fn test_command_wire_form() {
        assert_eq!(CommandCode::M0.to_string(), "m0");
        assert_eq!(CommandCode::M4.to_string(), "m4");
        assert_eq!(
            serde_json::to_string(&CommandCode::M2).unwrap(),
            "\"m2\""
        );
    }
}
