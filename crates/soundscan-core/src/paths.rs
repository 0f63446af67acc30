use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const SOUNDSCAN_DIR: &str = ".soundscan";
pub const CONFIG_FILE: &str = ".soundscan/config.yaml";
pub const STORE_FILE: &str = ".soundscan/soundscan.redb";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn soundscan_dir(root: &Path) -> PathBuf {
    root.join(SOUNDSCAN_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Resolve a configured store path; relative paths hang off the project root.
pub fn store_path(root: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        root.join(configured)
    }
}

pub fn is_initialized(root: &Path) -> bool {
    config_path(root).exists()
}
