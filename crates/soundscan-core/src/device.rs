use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// MotorProfile
// ---------------------------------------------------------------------------

/// Speed/acceleration limits for one stepper, as stored. Values are checked
/// by the dispatcher before they reach the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorProfile {
    pub speed: i64,
    pub accel: i64,
    pub max_speed: i64,
}

impl Default for MotorProfile {
    fn default() -> Self {
        Self {
            speed: 800,
            accel: 1600,
            max_speed: 8000,
        }
    }
}

// ---------------------------------------------------------------------------
// DeviceConfig
// ---------------------------------------------------------------------------

/// Rig calibration. One row per installation; the defaults are used when the
/// store has none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub operating_port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default)]
    pub head: MotorProfile,
    #[serde(default)]
    pub base: MotorProfile,
    #[serde(default = "default_head_returning_speed")]
    pub head_returning_speed: i64,
    #[serde(default = "default_head_returning_accel")]
    pub head_returning_accel: i64,
    #[serde(default = "default_circle_in_steps")]
    pub circle_in_steps: i64,
    #[serde(default = "default_searching_time_ms")]
    pub searching_time_ms: i64,
    #[serde(default = "default_recording_time_ms")]
    pub recording_time_ms: i64,
    #[serde(default = "default_force_to_find")]
    pub force_to_find: i64,
}

fn default_baud_rate() -> u32 {
    crate::config::default_baud_rate()
}

fn default_head_returning_speed() -> i64 {
    2000
}

fn default_head_returning_accel() -> i64 {
    3200
}

fn default_circle_in_steps() -> i64 {
    14_400
}

fn default_searching_time_ms() -> i64 {
    10_000
}

fn default_recording_time_ms() -> i64 {
    3000
}

fn default_force_to_find() -> i64 {
    50
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            operating_port: String::new(),
            baud_rate: default_baud_rate(),
            head: MotorProfile::default(),
            base: MotorProfile::default(),
            head_returning_speed: default_head_returning_speed(),
            head_returning_accel: default_head_returning_accel(),
            circle_in_steps: default_circle_in_steps(),
            searching_time_ms: default_searching_time_ms(),
            recording_time_ms: default_recording_time_ms(),
            force_to_find: default_force_to_find(),
        }
    }
}

impl DeviceConfig {
    /// Length of each blade recording. Negative values record nothing.
    pub fn recording_duration(&self) -> Duration {
        Duration::from_millis(self.recording_time_ms.max(0) as u64)
    }
}

// ---------------------------------------------------------------------------
// Disk types and scans
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskType {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub diameter: f64,
    #[serde(default)]
    pub blade_distance: i64,
    #[serde(default)]
    pub blade_force: i64,
    pub created_at: DateTime<Utc>,
}

impl DiskType {
    pub fn params(&self) -> DiskTypeParams {
        DiskTypeParams {
            blade_force: self.blade_force,
            blade_distance: self.blade_distance,
        }
    }
}

/// The two disk-type values a scan session needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskTypeParams {
    pub blade_force: i64,
    pub blade_distance: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskScan {
    pub id: u64,
    pub name: String,
    pub disk_type_id: u64,
    #[serde(default)]
    pub is_training: bool,
    pub created_at: DateTime<Utc>,
}

impl DiskScan {
    pub fn default_name(at: DateTime<Utc>) -> String {
        format!("{} New disc_scan", at.format("%Y-%m-%d %H:%M:%S"))
    }
}

/// One plucked blade. The audio itself is stored alongside, keyed by `id`;
/// `prediction` is filled in later by classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BladeRecord {
    pub id: u64,
    pub scan_id: u64,
    pub seq: u32,
    pub prediction: Option<bool>,
    pub audio_len: usize,
    pub created_at: DateTime<Utc>,
}
