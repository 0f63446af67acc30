//! Blade audio capture.
//!
//! A [`Recorder`] blocks for the requested duration and returns a complete
//! 16-bit mono WAV file. Nothing is streamed out partially.

use std::io::Cursor;
use std::time::Duration;

use thiserror::Error;

#[cfg(feature = "microphone")]
mod mic;
mod trim;

#[cfg(feature = "microphone")]
pub use mic::{list_input_devices, MicRecorder};
pub use trim::{trim_silence, TrimSettings};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no audio input device available")]
    NoDevice,

    #[error("audio device error: {0}")]
    Device(String),

    #[error("audio stream error: {0}")]
    Stream(String),

    #[error("no samples were captured")]
    Empty,

    #[error("WAV encoding failed: {0}")]
    Encode(#[from] hound::Error),
}

/// Records one fixed-length clip.
pub trait Recorder: Send + Sync {
    fn capture(&self, duration: Duration) -> Result<Vec<u8>, CaptureError>;
}

/// Number of mono frames in `duration` at `sample_rate`.
pub fn frames_for(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_millis() as u64 * u64::from(sample_rate) / 1000) as usize
}

/// Encode normalised `[-1, 1]` samples as a 16-bit PCM mono WAV in memory.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, CaptureError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            let clamped = sample.clamp(-1.0, 1.0);
            writer.write_sample((clamped * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_for_three_seconds() {
        assert_eq!(frames_for(Duration::from_millis(3000), 44_100), 132_300);
        assert_eq!(frames_for(Duration::ZERO, 44_100), 0);
    }

    #[test]
    fn encoded_wav_reads_back() {
        let samples = vec![0.0, 0.5, -0.5, 1.0, -2.0];
        let bytes = encode_wav(&samples, 44_100).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.bits_per_sample, 16);
        let decoded: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded.len(), 5);
        assert_eq!(decoded[3], i16::MAX);
        // Out-of-range input is clamped, not wrapped.
        assert_eq!(decoded[4], -i16::MAX);
    }
}
