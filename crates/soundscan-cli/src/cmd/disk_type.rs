use super::{load_config, open_store};
use crate::output::{print_json, print_table, timestamp};
use anyhow::Context;
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum DiskTypeSubcommand {
    /// Register a disk type
    Add {
        #[arg(long)]
        name: String,
        /// Disk diameter in millimetres
        #[arg(long, default_value = "0")]
        diameter: f64,
        /// Blade width sent to the rig before each scan
        #[arg(long, default_value = "0")]
        blade_distance: i64,
        /// Pressure threshold used when lowering the head
        #[arg(long, default_value = "0")]
        blade_force: i64,
    },
    /// List disk types
    List,
    /// Show one disk type
    Show { id: u64 },
}

pub fn run(root: &Path, subcmd: DiskTypeSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        DiskTypeSubcommand::Add {
            name,
            diameter,
            blade_distance,
            blade_force,
        } => add(root, &name, diameter, blade_distance, blade_force, json),
        DiskTypeSubcommand::List => list(root, json),
        DiskTypeSubcommand::Show { id } => show(root, id, json),
    }
}

fn add(
    root: &Path,
    name: &str,
    diameter: f64,
    blade_distance: i64,
    blade_force: i64,
    json: bool,
) -> anyhow::Result<()> {
    if blade_distance < 0 || blade_force < 0 {
        anyhow::bail!("blade distance and blade force must not be negative");
    }
    let config = load_config(root)?;
    let store = open_store(root, &config)?;
    let disk_type = store
        .put_disk_type(name, diameter, blade_distance, blade_force)
        .with_context(|| format!("failed to add disk type '{name}'"))?;

    if json {
        print_json(&disk_type)?;
    } else {
        println!("Added disk type {} ({})", disk_type.id, disk_type.name);
    }
    Ok(())
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let store = open_store(root, &config)?;
    let disk_types = store.list_disk_types()?;

    if json {
        return print_json(&disk_types);
    }
    if disk_types.is_empty() {
        println!("No disk types. Add one with `soundscan disk-type add --name <name>`.");
        return Ok(());
    }
    let rows = disk_types
        .iter()
        .map(|d| {
            vec![
                d.id.to_string(),
                d.name.clone(),
                d.diameter.to_string(),
                d.blade_distance.to_string(),
                d.blade_force.to_string(),
                timestamp(&d.created_at),
            ]
        })
        .collect();
    print_table(
        &["ID", "NAME", "DIAMETER", "BLADE_DISTANCE", "BLADE_FORCE", "CREATED"],
        rows,
    );
    Ok(())
}

fn show(root: &Path, id: u64, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let store = open_store(root, &config)?;
    let disk_type = store
        .get_disk_type(id)?
        .with_context(|| format!("disk type {id} not found"))?;

    if json {
        return print_json(&disk_type);
    }
    println!("Disk type {}: {}", disk_type.id, disk_type.name);
    println!("  diameter:       {}", disk_type.diameter);
    println!("  blade distance: {}", disk_type.blade_distance);
    println!("  blade force:    {}", disk_type.blade_force);
    println!("  created:        {}", timestamp(&disk_type.created_at));
    Ok(())
}
