pub mod blades;
pub mod config;
pub mod control;
pub mod device;
pub mod disk_type;
pub mod init;
pub mod ports;
pub mod record;
pub mod scan;
pub mod scans;

use anyhow::Context;
use soundscan_core::config::Config;
use soundscan_core::store::RedbStore;
use soundscan_link::{ports as serial_ports, Link, TelemetryStream};
use std::path::Path;
use tracing::{info, warn};

/// Connection overrides from the global flags.
pub struct Connection {
    pub port: Option<String>,
    pub baud: Option<u32>,
}

pub fn load_config(root: &Path) -> anyhow::Result<Config> {
    Config::load(root).context("failed to load .soundscan/config.yaml")
}

pub fn open_store(root: &Path, config: &Config) -> anyhow::Result<RedbStore> {
    let path = config.store_path(root);
    RedbStore::open(&path).with_context(|| format!("failed to open store {}", path.display()))
}

/// Open the rig. An explicit `--port` is used as-is; otherwise the
/// configured port is tried first, then auto-detection. A port found by
/// auto-detection is written back to config.yaml.
pub async fn connect(
    root: &Path,
    config: &Config,
    conn: &Connection,
) -> anyhow::Result<(Link, TelemetryStream)> {
    let baud = conn.baud.unwrap_or(config.serial.baud_rate);
    let link_config = config.serial.link_config();

    if let Some(port) = &conn.port {
        return Link::connect(port, baud, link_config)
            .await
            .with_context(|| format!("failed to connect to {port}"));
    }

    let opened = Link::connect_auto(&config.serial.port, baud, link_config)
        .await
        .context("failed to connect to the rig")?;

    let configured = serial_ports::device_path(&config.serial.port);
    if configured != opened.0.port() {
        let mut updated = config.clone();
        updated.serial.port = opened.0.port().to_string();
        match updated.save(root) {
            Ok(()) => info!(port = %updated.serial.port, "saved detected port to config.yaml"),
            Err(e) => warn!("could not save detected port: {e}"),
        }
    }
    Ok(opened)
}

#[cfg(feature = "microphone")]
pub fn recorder(config: &Config) -> anyhow::Result<std::sync::Arc<dyn soundscan_core::capture::Recorder>> {
    Ok(std::sync::Arc::new(
        soundscan_core::capture::MicRecorder::new(&config.audio),
    ))
}

#[cfg(not(feature = "microphone"))]
pub fn recorder(_config: &Config) -> anyhow::Result<std::sync::Arc<dyn soundscan_core::capture::Recorder>> {
    anyhow::bail!("this build has no microphone support")
}
