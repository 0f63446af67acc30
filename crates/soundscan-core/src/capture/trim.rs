use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimSettings {
    /// Fraction of the peak amplitude that counts as signal.
    pub threshold: f32,
    /// Kept after the last loud sample so the decay is not cut off.
    pub tail: Duration,
}

/// Cut leading silence and everything after the ring-out.
///
/// Keeps the span from the first to the last sample louder than
/// `threshold * peak`, plus `tail`. Silent or empty input comes back whole.
pub fn trim_silence(samples: &[f32], sample_rate: u32, settings: TrimSettings) -> &[f32] {
    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak == 0.0 {
        return samples;
    }
    let cutoff = settings.threshold * peak;
    let loud = |s: &f32| s.abs() > cutoff;

    let (Some(first), Some(last)) = (
        samples.iter().position(loud),
        samples.iter().rposition(loud),
    ) else {
        return samples;
    };

    let tail = super::frames_for(settings.tail, sample_rate);
    let end = (last + 1 + tail).min(samples.len());
    &samples[first..end]
}
