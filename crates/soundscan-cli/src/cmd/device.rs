use super::{load_config, open_store};
use crate::output::print_json;
use anyhow::Context;
use clap::{Args, Subcommand};
use soundscan_core::device::{DeviceConfig, DiskTypeParams};
use soundscan_core::dispatcher::build;
use soundscan_core::store::ScanStore;
use std::path::Path;

#[derive(Subcommand)]
pub enum DeviceSubcommand {
    /// Show the stored calibration (defaults if none is stored)
    Show,
    /// Change calibration fields; unspecified fields keep their value
    Set(DeviceFields),
}

#[derive(Args)]
pub struct DeviceFields {
    #[arg(long)]
    operating_port: Option<String>,
    #[arg(long)]
    baud_rate: Option<u32>,
    #[arg(long)]
    head_speed: Option<i64>,
    #[arg(long)]
    head_accel: Option<i64>,
    #[arg(long)]
    head_max_speed: Option<i64>,
    #[arg(long)]
    base_speed: Option<i64>,
    #[arg(long)]
    base_accel: Option<i64>,
    #[arg(long)]
    base_max_speed: Option<i64>,
    #[arg(long)]
    head_returning_speed: Option<i64>,
    #[arg(long)]
    head_returning_accel: Option<i64>,
    #[arg(long)]
    circle_in_steps: Option<i64>,
    #[arg(long)]
    searching_time_ms: Option<i64>,
    #[arg(long)]
    recording_time_ms: Option<i64>,
    #[arg(long)]
    force_to_find: Option<i64>,
}

impl DeviceFields {
    fn apply(self, cfg: &mut DeviceConfig) -> bool {
        let mut changed = false;
        let mut set = |slot: &mut i64, value: Option<i64>| {
            if let Some(v) = value {
                *slot = v;
                changed = true;
            }
        };
        set(&mut cfg.head.speed, self.head_speed);
        set(&mut cfg.head.accel, self.head_accel);
        set(&mut cfg.head.max_speed, self.head_max_speed);
        set(&mut cfg.base.speed, self.base_speed);
        set(&mut cfg.base.accel, self.base_accel);
        set(&mut cfg.base.max_speed, self.base_max_speed);
        set(&mut cfg.head_returning_speed, self.head_returning_speed);
        set(&mut cfg.head_returning_accel, self.head_returning_accel);
        set(&mut cfg.circle_in_steps, self.circle_in_steps);
        set(&mut cfg.searching_time_ms, self.searching_time_ms);
        set(&mut cfg.recording_time_ms, self.recording_time_ms);
        set(&mut cfg.force_to_find, self.force_to_find);

        if let Some(port) = self.operating_port {
            cfg.operating_port = port;
            changed = true;
        }
        if let Some(baud) = self.baud_rate {
            cfg.baud_rate = baud;
            changed = true;
        }
        changed
    }
}

pub fn run(root: &Path, subcmd: DeviceSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        DeviceSubcommand::Show => show(root, json),
        DeviceSubcommand::Set(fields) => set(root, fields, json),
    }
}

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let store = open_store(root, &config)?;
    let stored = store.get_device_config()?;
    let is_default = stored.is_none();
    let device = stored.unwrap_or_default();

    if json {
        return print_json(&device);
    }
    if is_default {
        println!("# no calibration stored; showing defaults");
    }
    print!("{}", serde_yaml::to_string(&device)?);
    Ok(())
}

fn set(root: &Path, fields: DeviceFields, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let store = open_store(root, &config)?;
    let mut device = store.get_device_config()?.unwrap_or_default();

    if !fields.apply(&mut device) {
        anyhow::bail!("nothing to change; pass at least one --<field>");
    }
    // Everything except the disk-type values must already be sendable.
    let probe = DiskTypeParams {
        blade_force: 0,
        blade_distance: 0,
    };
    build::settings_upload(&device, &probe).context("invalid calibration")?;

    store
        .put_device_config(&device)
        .context("failed to save calibration")?;

    if json {
        print_json(&device)?;
    } else {
        println!("Calibration saved.");
    }
    Ok(())
}
