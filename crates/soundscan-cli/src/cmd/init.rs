use super::open_store;
use anyhow::Context;
use soundscan_core::{config::Config, io, paths};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    let dir = paths::soundscan_dir(root);
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let defaults = serde_yaml::to_string(&Config::default())?;
    if io::write_if_missing(&paths::config_path(root), defaults.as_bytes())? {
        println!("Created {}", paths::CONFIG_FILE);
    }

    let config = Config::load(root).context("failed to load config")?;
    let store_path = config.store_path(root);
    let existed = store_path.exists();
    open_store(root, &config)?;
    if !existed {
        println!("Created {}", store_path.display());
    }

    println!("Initialized soundscan in {}", root.display());
    Ok(())
}
