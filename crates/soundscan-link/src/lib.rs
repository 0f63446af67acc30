//! `soundscan-link` — serial transport for the disk inspection rig.
//!
//! The rig's microcontroller speaks newline-delimited JSON. Commands go out
//! as `{"command": "<name>", ...}` and are acknowledged by the device echoing
//! the exact same line back. Everything else the device sends unprompted is
//! a telemetry frame.
//!
//! # Architecture
//!
//! ```text
//! Command          ← typed variants, one canonical encoding
//!     │
//!     ▼
//! Link::send       ← arms the expected echo, writes, waits, retries
//!     │
//!     ▼
//! serial port ───► reader thread ──► echo?      → completes the send
//!                                  ├► telemetry → TelemetryStream
//!                                  └► garbage   → logged, dropped
//! ```

pub mod command;
pub mod error;
pub mod link;
pub mod ports;
pub mod stream;
pub mod telemetry;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use command::{Command, MotorSettings};
pub use error::LinkError;
pub use link::{Acknowledged, Backoff, Link, LinkConfig};
pub use ports::PortInfo;
pub use stream::TelemetryStream;
pub use telemetry::{Flag, HeadPosition, TelemetryFrame};

pub type Result<T> = std::result::Result<T, LinkError>;
