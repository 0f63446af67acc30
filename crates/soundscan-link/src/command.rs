use serde::{Deserialize, Serialize};

use crate::{LinkError, Result};

/// Stepper profile shared by the head and base motors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorSettings {
    pub speed: u32,
    pub accel: u32,
    #[serde(rename = "MaxSpeed")]
    pub max_speed: u32,
}

/// One device operation. Serialized as `{"command": "<name>", ...params}`.
///
/// Field order is fixed by the declaration order, so encoding the same value
/// twice always produces the same bytes. The link relies on that to match
/// the device's echo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    SetHeadSettings(MotorSettings),
    SetBaseSettings(MotorSettings),
    SetSearchingTime { searching_time: u32 },
    SetCircle { circle_in_steps: u32 },
    SetRecordingTime { recording_time: u32 },
    SetForceToFind { force_to_find: u32 },
    SetBladeWidth { blade_width: u32 },
    SetMotorOn { state: bool },
    MoveHeadUp,
    MoveHeadDown { pressure: u32 },
    StartScan,
    ReturnBase,
    Ding,
    PullBlade,
    Status,
}

impl Command {
    /// Wire name, as it appears in the `command` field.
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetHeadSettings(_) => "set_head_settings",
            Command::SetBaseSettings(_) => "set_base_settings",
            Command::SetSearchingTime { .. } => "set_searching_time",
            Command::SetCircle { .. } => "set_circle",
            Command::SetRecordingTime { .. } => "set_recording_time",
            Command::SetForceToFind { .. } => "set_force_to_find",
            Command::SetBladeWidth { .. } => "set_blade_width",
            Command::SetMotorOn { .. } => "set_motor_on",
            Command::MoveHeadUp => "move_head_up",
            Command::MoveHeadDown { .. } => "move_head_down",
            Command::StartScan => "start_scan",
            Command::ReturnBase => "return_base",
            Command::Ding => "ding",
            Command::PullBlade => "pull_blade",
            Command::Status => "status",
        }
    }

    /// Canonical single-line encoding, without the trailing newline.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(LinkError::Encode)
    }

    /// Parse an echoed line back into a command.
    pub fn decode(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|source| LinkError::Malformed {
            line: line.to_string(),
            source,
        })
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
