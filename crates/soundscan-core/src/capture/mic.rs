use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use tracing::{debug, info, warn};

use super::{encode_wav, frames_for, trim_silence, CaptureError, Recorder, TrimSettings};
use crate::config::AudioConfig;

/// Grace period after the nominal duration before giving up on a stalled
/// stream.
const STALL_GRACE: Duration = Duration::from_secs(2);

/// Records from a live input device through cpal.
///
/// The stream is opened per capture and closed before returning, so the
/// device is free between blades.
pub struct MicRecorder {
    device_hint: String,
    sample_rate: u32,
    trim: Option<TrimSettings>,
}

impl MicRecorder {
    pub fn new(config: &AudioConfig) -> Self {
        let trim = config.trim_silence.then(|| TrimSettings {
            threshold: config.trim_threshold,
            tail: Duration::from_millis(config.trim_tail_ms),
        });
        Self {
            device_hint: config.device.clone(),
            sample_rate: config.sample_rate,
            trim,
        }
    }

    fn pick_device(&self, host: &cpal::Host) -> Result<cpal::Device, CaptureError> {
        if !self.device_hint.is_empty() {
            let devices = host
                .input_devices()
                .map_err(|e| CaptureError::Device(e.to_string()))?;
            for device in devices {
                if device
                    .name()
                    .is_ok_and(|name| name.contains(&self.device_hint))
                {
                    return Ok(device);
                }
            }
            debug!(hint = %self.device_hint, "preferred input not found; using default");
        }
        host.default_input_device().ok_or(CaptureError::NoDevice)
    }

    fn stream_config(
        &self,
        device: &cpal::Device,
    ) -> Result<cpal::SupportedStreamConfig, CaptureError> {
        let wanted = cpal::SampleRate(self.sample_rate);
        let matching = device
            .supported_input_configs()
            .map_err(|e| CaptureError::Device(e.to_string()))?
            .find(|c| c.min_sample_rate() <= wanted && wanted <= c.max_sample_rate());
        match matching {
            Some(range) => Ok(range.with_sample_rate(wanted)),
            None => {
                let fallback = device
                    .default_input_config()
                    .map_err(|e| CaptureError::Device(e.to_string()))?;
                warn!(
                    wanted = self.sample_rate,
                    using = fallback.sample_rate().0,
                    "input device does not support the configured sample rate"
                );
                Ok(fallback)
            }
        }
    }
}

impl Recorder for MicRecorder {
    fn capture(&self, duration: Duration) -> Result<Vec<u8>, CaptureError> {
        let host = cpal::default_host();
        let device = self.pick_device(&host)?;
        let supported = self.stream_config(&device)?;
        let rate = supported.sample_rate().0;
        let channels = usize::from(supported.channels()).max(1);
        let config: cpal::StreamConfig = supported.config();

        let (tx, rx) = mpsc::channel::<Vec<f32>>();
        let failure = Arc::new(Mutex::new(None::<String>));
        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, channels, tx, Arc::clone(&failure)),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, channels, tx, Arc::clone(&failure)),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, channels, tx, Arc::clone(&failure)),
            SampleFormat::I32 => build_stream::<i32>(&device, &config, channels, tx, Arc::clone(&failure)),
            other => Err(CaptureError::Device(format!("unsupported sample format {other}"))),
        }?;
        stream
            .play()
            .map_err(|e| CaptureError::Stream(e.to_string()))?;

        let target = frames_for(duration, rate);
        let deadline = Instant::now() + duration + STALL_GRACE;
        let mut samples = Vec::with_capacity(target);
        info!(frames = target, rate, "recording");

        while samples.len() < target {
            if failure.lock().map(|f| f.is_some()).unwrap_or(true) {
                break;
            }
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(chunk) => samples.extend(chunk),
                Err(RecvTimeoutError::Timeout) if Instant::now() < deadline => continue,
                Err(_) => break,
            }
        }
        drop(stream);
        samples.truncate(target);

        let failed = failure.lock().ok().and_then(|mut f| f.take());
        if samples.is_empty() {
            return Err(match failed {
                Some(e) => CaptureError::Stream(e),
                None => CaptureError::Empty,
            });
        }
        if let Some(e) = failed {
            warn!(kept = samples.len(), "capture cut short: {e}");
        } else if samples.len() < target {
            warn!(kept = samples.len(), target, "input stalled before the clip was full");
        }

        let clip = match self.trim {
            Some(settings) => trim_silence(&samples, rate, settings),
            None => &samples[..],
        };
        encode_wav(clip, rate)
    }
}

/// Forward channel 0 of every callback buffer as `f32`.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    tx: Sender<Vec<f32>>,
    failure: Arc<Mutex<Option<String>>>,
) -> Result<cpal::Stream, CaptureError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono: Vec<f32> = data
                    .chunks(channels)
                    .filter_map(|frame| frame.first())
                    .map(|s| f32::from_sample(*s))
                    .collect();
                let _ = tx.send(mono);
            },
            move |err| {
                if let Ok(mut slot) = failure.lock() {
                    slot.get_or_insert_with(|| err.to_string());
                }
            },
            None,
        )
        .map_err(|e| CaptureError::Stream(e.to_string()))
}

/// Names of every input device the default host can see.
pub fn list_input_devices() -> Result<Vec<String>, CaptureError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::Device(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}
