use super::{load_config, open_store};
use crate::output::{print_json, print_table, timestamp};
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum ScansSubcommand {
    /// List scan sessions, oldest first
    List,
}

pub fn run(root: &Path, subcmd: ScansSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ScansSubcommand::List => list(root, json),
    }
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let store = open_store(root, &config)?;
    let scans = store.list_scans()?;

    if json {
        return print_json(&scans);
    }
    if scans.is_empty() {
        println!("No scans yet.");
        return Ok(());
    }
    let rows = scans
        .iter()
        .map(|s| {
            vec![
                s.id.to_string(),
                s.name.clone(),
                s.disk_type_id.to_string(),
                if s.is_training { "yes" } else { "no" }.to_string(),
                timestamp(&s.created_at),
            ]
        })
        .collect();
    print_table(&["ID", "NAME", "DISK_TYPE", "TRAINING", "CREATED"], rows);
    Ok(())
}
