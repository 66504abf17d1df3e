//! Common types for Chainflow
//!
//! Fundamental sample and position types shared by buffers, endpoints,
//! chains and the engine.

/// Audio sample type (32-bit float for processing)
pub type Sample = f32;

/// Position or length measured in sample frames
///
/// Signed so that relative seeks (rewind/forward) can be expressed directly.
pub type SamplePos = i64;

/// Default sample rate when nothing else is configured (CD rate)
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default channel count for new buffers and endpoints
pub const DEFAULT_CHANNELS: usize = 2;

/// Default engine buffer size in frames
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Upper clipping bound for samples
pub const MAX_AMPLITUDE: Sample = 1.0;

/// Lower clipping bound for samples
pub const MIN_AMPLITUDE: Sample = -1.0;

/// Sample value representing silence
pub const SILENT_VALUE: Sample = 0.0;

/// Convert a duration in seconds to a frame count at `sample_rate`
#[inline]
pub fn seconds_to_frames(seconds: f64, sample_rate: u32) -> SamplePos {
    (seconds * sample_rate as f64).round() as SamplePos
}

/// Convert a frame count to seconds at `sample_rate`
#[inline]
pub fn frames_to_seconds(frames: SamplePos, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    frames as f64 / sample_rate as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_frames_conversion() {
        assert_eq!(seconds_to_frames(1.0, 44100), 44100);
        assert_eq!(seconds_to_frames(0.5, 48000), 24000);
        assert!((frames_to_seconds(22050, 44100) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_zero_rate_is_safe() {
        assert_eq!(frames_to_seconds(1000, 0), 0.0);
    }
}
