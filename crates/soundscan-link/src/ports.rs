use serde::Serialize;
use serialport::SerialPortType;

use crate::{LinkError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    Usb,
    Bluetooth,
    Pci,
    Unknown,
}

/// A serial port as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub name: String,
    pub kind: PortKind,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Whether auto-connect should try this port. The rig's USB bridge
    /// always reports a manufacturer; built-in UARTs do not.
    pub fn is_candidate(&self) -> bool {
        self.manufacturer.as_deref().is_some_and(|m| !m.is_empty())
    }
}

pub fn available() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(LinkError::Enumerate)?;
    Ok(ports
        .into_iter()
        .map(|p| match p.port_type {
            SerialPortType::UsbPort(usb) => PortInfo {
                name: p.port_name,
                kind: PortKind::Usb,
                manufacturer: usb.manufacturer,
                product: usb.product,
                serial_number: usb.serial_number,
            },
            SerialPortType::BluetoothPort => bare(p.port_name, PortKind::Bluetooth),
            SerialPortType::PciPort => bare(p.port_name, PortKind::Pci),
            SerialPortType::Unknown => bare(p.port_name, PortKind::Unknown),
        })
        .collect())
}

fn bare(name: String, kind: PortKind) -> PortInfo {
    PortInfo {
        name,
        kind,
        manufacturer: None,
        product: None,
        serial_number: None,
    }
}

pub fn candidates(ports: &[PortInfo]) -> Vec<&PortInfo> {
    ports.iter().filter(|p| p.is_candidate()).collect()
}

/// Resolve a configured port name to an openable path.
pub fn device_path(name: &str) -> String {
    if cfg!(unix) && !name.contains('/') {
        format!("/dev/{name}")
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb(name: &str, manufacturer: Option<&str>) -> PortInfo {
        PortInfo {
            name: name.into(),
            kind: PortKind::Usb,
            manufacturer: manufacturer.map(String::from),
            product: None,
            serial_number: None,
        }
    }

    #[test]
    fn candidates_need_a_manufacturer() {
        let ports = vec![
            usb("/dev/ttyS0", None),
            usb("/dev/ttyUSB0", Some("FTDI")),
            usb("/dev/ttyUSB1", Some("")),
        ];
        let picked: Vec<_> = candidates(&ports).iter().map(|p| p.name.as_str()).collect();
        assert_eq!(picked, vec!["/dev/ttyUSB0"]);
    }

    #[cfg(unix)]
    #[test]
    fn bare_names_live_under_dev() {
        assert_eq!(device_path("ttyUSB0"), "/dev/ttyUSB0");
        assert_eq!(device_path("/dev/ttyACM0"), "/dev/ttyACM0");
    }
}
