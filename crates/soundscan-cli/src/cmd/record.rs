use std::path::Path;

#[cfg(feature = "microphone")]
pub fn run(
    root: &Path,
    ms: u64,
    out: Option<&Path>,
    list_devices: bool,
    json: bool,
) -> anyhow::Result<()> {
    use super::load_config;
    use crate::output::print_json;
    use anyhow::Context;
    use soundscan_core::capture::{list_input_devices, MicRecorder, Recorder};
    use soundscan_core::io::atomic_write;
    use std::time::Duration;

    if list_devices {
        let devices = list_input_devices().context("failed to list input devices")?;
        if json {
            return print_json(&devices);
        }
        for name in devices {
            println!("{name}");
        }
        return Ok(());
    }

    let out = out.context("--out is required")?;
    let config = load_config(root)?;
    let recorder = MicRecorder::new(&config.audio);
    let wav = recorder
        .capture(Duration::from_millis(ms))
        .context("recording failed")?;
    atomic_write(out, &wav).with_context(|| format!("failed to write {}", out.display()))?;

    if json {
        print_json(&serde_json::json!({ "path": out, "bytes": wav.len(), "ms": ms }))?;
    } else {
        println!("Recorded {ms} ms ({} bytes) to {}", wav.len(), out.display());
    }
    Ok(())
}

#[cfg(not(feature = "microphone"))]
pub fn run(
    _root: &Path,
    _ms: u64,
    _out: Option<&Path>,
    _list_devices: bool,
    _json: bool,
) -> anyhow::Result<()> {
    anyhow::bail!("this build has no microphone support")
}
