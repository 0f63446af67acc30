use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to open serial port {port}: {source}")]
    Connect {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("no serial port answered (tried: {tried})")]
    NoPort { tried: String },

    #[error("failed to enumerate serial ports: {0}")]
    Enumerate(#[source] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("device disconnected")]
    Disconnected,

    #[error("command '{command}' not acknowledged after {attempts} attempt(s)")]
    Timeout { command: String, attempts: u32 },

    #[error("failed to encode command: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("malformed line from device: {source}\n  line: {line}")]
    Malformed {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("telemetry line is not a JSON object: {0}")]
    NotAnObject(String),
}

impl LinkError {
    /// Whether the connection is gone. Timeouts and bad lines are recoverable;
    /// a lost port is not.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LinkError::Disconnected | LinkError::Io(_))
    }
}
