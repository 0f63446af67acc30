use crate::error::{CoreError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use soundscan_link::{Backoff, LinkConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// SerialConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Empty means auto-detect.
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff: Backoff,
    #[serde(default = "default_command_gap_ms")]
    pub command_gap_ms: u64,
}

pub(crate) fn default_baud_rate() -> u32 {
    115_200
}

fn default_settle_ms() -> u64 {
    2000
}

fn default_read_timeout_ms() -> u64 {
    100
}

fn default_ack_timeout_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_command_gap_ms() -> u64 {
    100
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            settle_ms: default_settle_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            max_retries: default_max_retries(),
            backoff: Backoff::default(),
            command_gap_ms: default_command_gap_ms(),
        }
    }
}

impl SerialConfig {
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            max_retries: self.max_retries,
            backoff: self.backoff,
            command_gap: Duration::from_millis(self.command_gap_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            settle: Duration::from_millis(self.settle_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Substring of the preferred input device name.
    #[serde(default = "default_audio_device")]
    pub device: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default)]
    pub trim_silence: bool,
    #[serde(default = "default_trim_threshold")]
    pub trim_threshold: f32,
    #[serde(default = "default_trim_tail_ms")]
    pub trim_tail_ms: u64,
}

fn default_audio_device() -> String {
    "UMC204HD".to_string()
}

fn default_sample_rate() -> u32 {
    44_100
}

fn default_trim_threshold() -> f32 {
    0.1
}

fn default_trim_tail_ms() -> u64 {
    300
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: default_audio_device(),
            sample_rate: default_sample_rate(),
            trim_silence: false,
            trim_threshold: default_trim_threshold(),
            trim_tail_ms: default_trim_tail_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(paths::STORE_FILE)
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// `.soundscan/config.yaml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(CoreError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn store_path(&self, root: &Path) -> PathBuf {
        paths::store_path(root, &self.store.path)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.serial.baud_rate == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "serial.baud_rate is 0".to_string(),
            });
        }
        if self.serial.ack_timeout_ms == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "serial.ack_timeout_ms is 0; every command will time out".to_string(),
            });
        }
        if self.serial.read_timeout_ms == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "serial.read_timeout_ms is 0; the reader will spin".to_string(),
            });
        }
        if self.audio.sample_rate == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "audio.sample_rate is 0".to_string(),
            });
        }
        if !(self.audio.trim_threshold > 0.0 && self.audio.trim_threshold < 1.0) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "audio.trim_threshold {} is outside (0, 1)",
                    self.audio.trim_threshold
                ),
            });
        }

        warnings
    }
}
