//! One function per device operation.
//!
//! The builders in [`build`] turn typed, possibly user-supplied values into
//! [`Command`]s and reject anything negative. [`Dispatcher`] forwards each
//! command straight to the link and waits for its echo; nothing is queued.

use soundscan_link::{Acknowledged, Command, Link};
use tracing::warn;

use crate::device::{DeviceConfig, DiskTypeParams, MotorProfile};
use crate::error::{CoreError, Result};

pub mod build {
    use super::*;
    use soundscan_link::MotorSettings;

    fn non_negative(field: &str, value: i64) -> Result<u32> {
        u32::try_from(value).map_err(|_| {
            CoreError::InvalidArgument(format!("{field} must be between 0 and {}, got {value}", u32::MAX))
        })
    }

    pub fn motor_settings(profile: &MotorProfile) -> Result<MotorSettings> {
        Ok(MotorSettings {
            speed: non_negative("speed", profile.speed)?,
            accel: non_negative("accel", profile.accel)?,
            max_speed: non_negative("max_speed", profile.max_speed)?,
        })
    }

    pub fn head_settings(profile: &MotorProfile) -> Result<Command> {
        Ok(Command::SetHeadSettings(motor_settings(profile)?))
    }

    pub fn base_settings(profile: &MotorProfile) -> Result<Command> {
        Ok(Command::SetBaseSettings(motor_settings(profile)?))
    }

    pub fn searching_time(ms: i64) -> Result<Command> {
        Ok(Command::SetSearchingTime {
            searching_time: non_negative("searching_time", ms)?,
        })
    }

    pub fn circle(steps: i64) -> Result<Command> {
        Ok(Command::SetCircle {
            circle_in_steps: non_negative("circle_in_steps", steps)?,
        })
    }

    pub fn recording_time(ms: i64) -> Result<Command> {
        Ok(Command::SetRecordingTime {
            recording_time: non_negative("recording_time", ms)?,
        })
    }

    pub fn force_to_find(force: i64) -> Result<Command> {
        Ok(Command::SetForceToFind {
            force_to_find: non_negative("force_to_find", force)?,
        })
    }

    pub fn blade_width(width: i64) -> Result<Command> {
        Ok(Command::SetBladeWidth {
            blade_width: non_negative("blade_width", width)?,
        })
    }

    /// Blade force threshold, as sent with `move_head_down`.
    pub fn pressure(force: i64) -> Result<u32> {
        non_negative("pressure", force)
    }

    pub fn move_head_down(force: i64) -> Result<Command> {
        Ok(Command::MoveHeadDown {
            pressure: pressure(force)?,
        })
    }

    pub fn motor_on(state: bool) -> Command {
        Command::SetMotorOn { state }
    }

    /// Calibration upload sent before every scan, in firmware order.
    pub fn settings_upload(device: &DeviceConfig, disk: &DiskTypeParams) -> Result<Vec<Command>> {
        Ok(vec![
            head_settings(&device.head)?,
            base_settings(&device.base)?,
            searching_time(device.searching_time_ms)?,
            circle(device.circle_in_steps)?,
            recording_time(device.recording_time_ms)?,
            force_to_find(device.force_to_find)?,
            blade_width(disk.blade_distance)?,
        ])
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Dispatcher {
    link: Link,
}

impl Dispatcher {
    pub fn new(link: Link) -> Self {
        Self { link }
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub async fn dispatch(&self, command: &Command) -> Result<Acknowledged> {
        Ok(self.link.send(command).await?)
    }

    /// Send every command in order. Unacknowledged commands are logged and
    /// skipped; a lost connection stops the batch.
    pub async fn dispatch_all(&self, commands: &[Command]) -> Result<usize> {
        let mut acked = 0;
        for command in commands {
            match self.dispatch(command).await {
                Ok(_) => acked += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(command = %command, "{e}"),
            }
        }
        Ok(acked)
    }

    pub async fn set_head_settings(&self, profile: &MotorProfile) -> Result<Acknowledged> {
        self.dispatch(&build::head_settings(profile)?).await
    }

    pub async fn set_base_settings(&self, profile: &MotorProfile) -> Result<Acknowledged> {
        self.dispatch(&build::base_settings(profile)?).await
    }

    pub async fn set_searching_time(&self, ms: i64) -> Result<Acknowledged> {
        self.dispatch(&build::searching_time(ms)?).await
    }

    pub async fn set_circle(&self, steps: i64) -> Result<Acknowledged> {
        self.dispatch(&build::circle(steps)?).await
    }

    pub async fn set_recording_time(&self, ms: i64) -> Result<Acknowledged> {
        self.dispatch(&build::recording_time(ms)?).await
    }

    pub async fn set_force_to_find(&self, force: i64) -> Result<Acknowledged> {
        self.dispatch(&build::force_to_find(force)?).await
    }

    pub async fn set_blade_width(&self, width: i64) -> Result<Acknowledged> {
        self.dispatch(&build::blade_width(width)?).await
    }

    pub async fn move_head_up(&self) -> Result<Acknowledged> {
        self.dispatch(&Command::MoveHeadUp).await
    }

    pub async fn move_head_down(&self, pressure: i64) -> Result<Acknowledged> {
        self.dispatch(&build::move_head_down(pressure)?).await
    }

    pub async fn set_motor_on(&self, state: bool) -> Result<Acknowledged> {
        self.dispatch(&build::motor_on(state)).await
    }

    pub async fn start_scan(&self) -> Result<Acknowledged> {
        self.dispatch(&Command::StartScan).await
    }

    pub async fn return_base(&self) -> Result<Acknowledged> {
        self.dispatch(&Command::ReturnBase).await
    }

    pub async fn ding(&self) -> Result<Acknowledged> {
        self.dispatch(&Command::Ding).await
    }

    pub async fn pull_blade(&self) -> Result<Acknowledged> {
        self.dispatch(&Command::PullBlade).await
    }

    pub async fn status(&self) -> Result<Acknowledged> {
        self.dispatch(&Command::Status).await
    }
}
