use super::{load_config, open_store};
use crate::output::{print_json, print_table, timestamp};
use anyhow::Context;
use clap::Subcommand;
use soundscan_core::io::atomic_write;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum BladesSubcommand {
    /// List the blades recorded in a scan
    List {
        #[arg(long)]
        scan: u64,
    },
    /// Write one blade's recording to a WAV file
    Export {
        /// Blade record id
        id: u64,
        #[arg(long)]
        out: PathBuf,
    },
}

pub fn run(root: &Path, subcmd: BladesSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        BladesSubcommand::List { scan } => list(root, scan, json),
        BladesSubcommand::Export { id, out } => export(root, id, &out, json),
    }
}

fn list(root: &Path, scan_id: u64, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let store = open_store(root, &config)?;
    let blades = store.blades_for_scan(scan_id)?;

    if json {
        return print_json(&blades);
    }
    if blades.is_empty() {
        println!("Scan {scan_id} has no blades.");
        return Ok(());
    }
    let rows = blades
        .iter()
        .map(|b| {
            vec![
                b.id.to_string(),
                b.seq.to_string(),
                b.audio_len.to_string(),
                match b.prediction {
                    Some(true) => "defect",
                    Some(false) => "ok",
                    None => "-",
                }
                .to_string(),
                timestamp(&b.created_at),
            ]
        })
        .collect();
    print_table(&["ID", "SEQ", "BYTES", "PREDICTION", "CREATED"], rows);
    Ok(())
}

fn export(root: &Path, id: u64, out: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let store = open_store(root, &config)?;
    let blade = store.get_blade(id)?;
    let audio = store.blade_audio(id)?;
    atomic_write(out, &audio).with_context(|| format!("failed to write {}", out.display()))?;

    if json {
        print_json(&serde_json::json!({
            "id": blade.id,
            "scan_id": blade.scan_id,
            "seq": blade.seq,
            "bytes": audio.len(),
            "path": out,
        }))?;
    } else {
        println!(
            "Wrote blade {} of scan {} ({} bytes) to {}",
            blade.seq,
            blade.scan_id,
            audio.len(),
            out.display()
        );
    }
    Ok(())
}
