use serde::Serialize;
use serde_json::{Map, Value};

use crate::{LinkError, Result};

// ─── Flag ─────────────────────────────────────────────────────────────────

/// A device-reported boolean. Missing or unrecognised values are `Unknown`
/// rather than silently false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    True,
    False,
    #[default]
    Unknown,
}

impl Flag {
    /// True only for an explicit `true` from the device.
    pub fn is_set(self) -> bool {
        self == Flag::True
    }

    pub fn is_known(self) -> bool {
        self != Flag::Unknown
    }

    /// Booleans and the integers 0/1 are accepted; anything else is unknown.
    fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Bool(b)) => Flag::from(*b),
            Some(Value::Number(n)) => match n.as_u64() {
                Some(0) => Flag::False,
                Some(1) => Flag::True,
                _ => Flag::Unknown,
            },
            _ => Flag::Unknown,
        }
    }
}

impl From<bool> for Flag {
    fn from(b: bool) -> Self {
        if b {
            Flag::True
        } else {
            Flag::False
        }
    }
}

// ─── HeadPosition ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadPosition {
    Up,
    Down,
    #[default]
    Unknown,
}

impl HeadPosition {
    fn from_value(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            Some("up") => HeadPosition::Up,
            Some("down") => HeadPosition::Down,
            _ => HeadPosition::Unknown,
        }
    }
}

// ─── TelemetryFrame ───────────────────────────────────────────────────────

/// One decoded status snapshot sent spontaneously by the device.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TelemetryFrame {
    pub scan_in_progress: Flag,
    pub blade_found: Flag,
    pub head_position: HeadPosition,
    pub pulling_blade: Flag,
    pub pressure_reached: Flag,
    pub making_ding: Flag,
    pub preparing_for_new_blade: Flag,
    pub base_returning: Flag,
    pub base_motor_on: Flag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_weight: Option<f64>,
}

impl TelemetryFrame {
    pub fn from_object(map: &Map<String, Value>) -> Self {
        // The firmware misspells this key; accept both.
        let preparing = map
            .get("prepearing_for_new_blade")
            .or_else(|| map.get("preparing_for_new_blade"));

        TelemetryFrame {
            scan_in_progress: Flag::from_value(map.get("scan_in_progress")),
            blade_found: Flag::from_value(map.get("blade_found")),
            head_position: HeadPosition::from_value(map.get("head_position")),
            pulling_blade: Flag::from_value(map.get("pulling_blade")),
            pressure_reached: Flag::from_value(map.get("pressure_reached")),
            making_ding: Flag::from_value(map.get("making_ding")),
            preparing_for_new_blade: Flag::from_value(preparing),
            base_returning: Flag::from_value(map.get("base_returning")),
            base_motor_on: Flag::from_value(map.get("base_motor_on")),
            current_weight: map.get("current_weight").and_then(Value::as_f64),
        }
    }

    /// Names of the decision fields the device did not report.
    pub fn unknown_fields(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        let flags = [
            ("scan_in_progress", self.scan_in_progress),
            ("blade_found", self.blade_found),
            ("pulling_blade", self.pulling_blade),
            ("pressure_reached", self.pressure_reached),
            ("making_ding", self.making_ding),
            ("preparing_for_new_blade", self.preparing_for_new_blade),
            ("base_returning", self.base_returning),
        ];
        for (name, flag) in flags {
            if !flag.is_known() {
                out.push(name);
            }
        }
        if self.head_position == HeadPosition::Unknown {
            out.push("head_position");
        }
        out
    }
}

// ─── Inbound classification ───────────────────────────────────────────────

/// What an unsolicited line from the device turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Telemetry(TelemetryFrame),
    /// A command echo that matched no armed expectation (late or duplicate).
    StaleEcho(String),
}

/// Classify a non-empty line that did not complete a pending send.
pub fn decode_line(line: &str) -> Result<Inbound> {
    let value: Value = serde_json::from_str(line).map_err(|source| LinkError::Malformed {
        line: line.to_string(),
        source,
    })?;
    let Value::Object(map) = value else {
        return Err(LinkError::NotAnObject(line.to_string()));
    };
    if let Some(name) = map.get("command") {
        let name = name.as_str().unwrap_or("?").to_string();
        return Ok(Inbound::StaleEcho(name));
    }
    Ok(Inbound::Telemetry(TelemetryFrame::from_object(&map)))
}
