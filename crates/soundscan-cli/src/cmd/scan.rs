use super::{connect, load_config, open_store, recorder, Connection};
use crate::output::print_json_line;
use anyhow::Context;
use soundscan_core::dispatcher::Dispatcher;
use soundscan_core::sequencer::{start_scan, ScanContext, ScanEvent, ScanOutcome};
use std::path::Path;
use std::sync::Arc;

/// Exit status for a session that ended in a fault.
const EXIT_FAULTED: i32 = 2;

pub fn run(root: &Path, disk_type_id: u64, conn: &Connection, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let store = Arc::new(open_store(root, &config)?);
    if store.get_disk_type(disk_type_id)?.is_none() {
        anyhow::bail!("disk type {disk_type_id} not found");
    }
    let recorder = recorder(&config)?;

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(async {
        let (link, telemetry) = connect(root, &config, conn).await?;
        let ctx = ScanContext {
            dispatcher: Dispatcher::new(link.clone()),
            telemetry,
            store,
            recorder,
        };
        let (handle, mut events) = start_scan(ctx, disk_type_id)
            .await
            .context("failed to start scan")?;
        if !json {
            println!(
                "Scan {} started on {}. Press Ctrl-C to stop.",
                handle.scan_id(),
                link.port()
            );
        }

        let mut interrupts = 0;
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => report(&event, json)?,
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    interrupts += 1;
                    if interrupts == 1 {
                        eprintln!("Stopping: waiting for the base to return (Ctrl-C again to abort)");
                        handle.stop();
                    } else {
                        eprintln!("Aborting.");
                        handle.abort();
                        link.close();
                        break;
                    }
                }
            }
        }
        anyhow::Ok(handle.wait().await)
    })?;

    if !outcome.success() {
        std::process::exit(EXIT_FAULTED);
    }
    Ok(())
}

fn report(event: &ScanEvent, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json_line(event);
    }
    match event {
        ScanEvent::Started { .. } | ScanEvent::Phase { .. } => {}
        ScanEvent::BladeDownloaded { blade, .. } => {
            println!(
                "blade {:>3}  record {}  {} bytes",
                blade.seq, blade.id, blade.audio_len
            );
        }
        ScanEvent::Finished { outcome } => match outcome {
            ScanOutcome::Completed { scan_id, blades } => {
                println!("Scan {scan_id} finished: {blades} blade(s) recorded.");
            }
            ScanOutcome::Faulted {
                scan_id,
                blades,
                reason,
            } => {
                eprintln!("Scan {scan_id} faulted after {blades} blade(s): {reason}");
            }
        },
    }
    Ok(())
}
