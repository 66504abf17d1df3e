//! Raw PCM encodings and conversion to/from [`SampleBuffer`]
//!
//! Integer formats scale symmetrically: a value `v` of a `b`-bit format maps
//! to `v / 2^(b-1)`, and export rounds to the nearest step before clamping
//! to the format's range, so integer streams survive an import/export cycle
//! unchanged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::SampleBuffer;
use crate::types::{Sample, DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE, MAX_AMPLITUDE, MIN_AMPLITUDE};

/// Errors raised by raw sample conversion
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    /// Unknown or unsupported sample format description
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// Input holds fewer bytes than the requested frame count needs
    #[error("Raw input too short: need {needed} bytes, got {got}")]
    ShortInput { needed: usize, got: usize },

    /// Zero channels or zero sample rate
    #[error("Invalid audio format: {0}")]
    InvalidFormat(String),
}

pub type FormatResult<T> = Result<T, FormatError>;

/// Encoding of a single sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// Unsigned 8-bit, 128 is silence
    U8,
    /// Signed 16-bit little endian
    #[default]
    S16Le,
    /// Signed 16-bit big endian
    S16Be,
    /// Signed 24-bit in a 4-byte little endian container
    S24Le,
    /// Signed 24-bit in a 4-byte big endian container
    S24Be,
    /// Signed 32-bit little endian
    S32Le,
    /// Signed 32-bit big endian
    S32Be,
    /// IEEE float little endian
    F32Le,
    /// IEEE float big endian
    F32Be,
}

impl SampleFormat {
    pub const ALL: [SampleFormat; 9] = [
        SampleFormat::U8,
        SampleFormat::S16Le,
        SampleFormat::S16Be,
        SampleFormat::S24Le,
        SampleFormat::S24Be,
        SampleFormat::S32Le,
        SampleFormat::S32Be,
        SampleFormat::F32Le,
        SampleFormat::F32Be,
    ];

    /// Pick a format from bit depth, signedness and byte order
    pub fn from_parts(bits: u16, signed: bool, float: bool, little_endian: bool) -> FormatResult<Self> {
        use SampleFormat::*;
        let format = match (bits, signed, float, little_endian) {
            (8, false, false, _) => U8,
            (16, true, false, true) => S16Le,
            (16, true, false, false) => S16Be,
            (24, true, false, true) => S24Le,
            (24, true, false, false) => S24Be,
            (32, true, false, true) => S32Le,
            (32, true, false, false) => S32Be,
            (32, _, true, true) => F32Le,
            (32, _, true, false) => F32Be,
            _ => {
                return Err(FormatError::UnsupportedFormat(format!(
                    "{} bits, signed={}, float={}",
                    bits, signed, float
                )))
            }
        };
        Ok(format)
    }

    /// Bytes used to store one sample
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16Le | SampleFormat::S16Be => 2,
            _ => 4,
        }
    }

    /// Significant bits per sample
    pub fn bits(&self) -> u16 {
        match self {
            SampleFormat::U8 => 8,
            SampleFormat::S16Le | SampleFormat::S16Be => 16,
            SampleFormat::S24Le | SampleFormat::S24Be => 24,
            _ => 32,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, SampleFormat::F32Le | SampleFormat::F32Be)
    }

    pub fn is_little_endian(&self) -> bool {
        !matches!(
            self,
            SampleFormat::S16Be | SampleFormat::S24Be | SampleFormat::S32Be | SampleFormat::F32Be
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16Le => "s16_le",
            SampleFormat::S16Be => "s16_be",
            SampleFormat::S24Le => "s24_le",
            SampleFormat::S24Be => "s24_be",
            SampleFormat::S32Le => "s32_le",
            SampleFormat::S32Be => "s32_be",
            SampleFormat::F32Le => "f32_le",
            SampleFormat::F32Be => "f32_be",
        }
    }

    /// Decode one sample from the start of `bytes`
    #[inline]
    fn decode(&self, bytes: &[u8]) -> Sample {
        match self {
            SampleFormat::U8 => (bytes[0] as Sample - 128.0) / 128.0,
            SampleFormat::S16Le => i16::from_le_bytes([bytes[0], bytes[1]]) as Sample / 32768.0,
            SampleFormat::S16Be => i16::from_be_bytes([bytes[0], bytes[1]]) as Sample / 32768.0,
            SampleFormat::S24Le => {
                // sign-extend from the third byte, the pad byte is ignored
                let v = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
                v as Sample / 8_388_608.0
            }
            SampleFormat::S24Be => {
                let v = i32::from_be_bytes([bytes[1], bytes[2], bytes[3], 0]) >> 8;
                v as Sample / 8_388_608.0
            }
            SampleFormat::S32Le => {
                let v = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                (v as f64 / 2_147_483_648.0) as Sample
            }
            SampleFormat::S32Be => {
                let v = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                (v as f64 / 2_147_483_648.0) as Sample
            }
            SampleFormat::F32Le => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            SampleFormat::F32Be => f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }

    /// Encode one (already clamped) sample into the start of `out`
    #[inline]
    fn encode(&self, sample: Sample, out: &mut [u8]) {
        match self {
            SampleFormat::U8 => {
                let v = (sample * 128.0).round() + 128.0;
                out[0] = v.clamp(0.0, 255.0) as u8;
            }
            SampleFormat::S16Le | SampleFormat::S16Be => {
                let v = (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
                let bytes = if *self == SampleFormat::S16Le {
                    v.to_le_bytes()
                } else {
                    v.to_be_bytes()
                };
                out[..2].copy_from_slice(&bytes);
            }
            SampleFormat::S24Le | SampleFormat::S24Be => {
                let v = (sample * 8_388_608.0).round().clamp(-8_388_608.0, 8_388_607.0) as i32;
                // the pad byte carries the sign extension
                let bytes = if *self == SampleFormat::S24Le {
                    v.to_le_bytes()
                } else {
                    v.to_be_bytes()
                };
                out[..4].copy_from_slice(&bytes);
            }
            SampleFormat::S32Le | SampleFormat::S32Be => {
                let v = (sample as f64 * 2_147_483_648.0)
                    .round()
                    .clamp(-2_147_483_648.0, 2_147_483_647.0) as i32;
                let bytes = if *self == SampleFormat::S32Le {
                    v.to_le_bytes()
                } else {
                    v.to_be_bytes()
                };
                out[..4].copy_from_slice(&bytes);
            }
            SampleFormat::F32Le => out[..4].copy_from_slice(&sample.to_le_bytes()),
            SampleFormat::F32Be => out[..4].copy_from_slice(&sample.to_be_bytes()),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SampleFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        SampleFormat::ALL
            .iter()
            .copied()
            .find(|f| f.name() == lower)
            .or(match lower.as_str() {
                "s16" => Some(SampleFormat::S16Le),
                "s24" => Some(SampleFormat::S24Le),
                "s32" => Some(SampleFormat::S32Le),
                "f32" => Some(SampleFormat::F32Le),
                _ => None,
            })
            .ok_or_else(|| FormatError::UnsupportedFormat(s.to_string()))
    }
}

/// Complete description of a raw sample stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioFormat {
    pub sample_format: SampleFormat,
    pub channels: usize,
    pub sample_rate: u32,
    /// Frames stored as `[c0 c1 c0 c1 ..]` when true, channel after channel otherwise
    pub interleaved: bool,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_format: SampleFormat::default(),
            channels: DEFAULT_CHANNELS,
            sample_rate: DEFAULT_SAMPLE_RATE,
            interleaved: true,
        }
    }
}

impl AudioFormat {
    pub fn new(sample_format: SampleFormat, channels: usize, sample_rate: u32) -> Self {
        Self {
            sample_format,
            channels,
            sample_rate,
            interleaved: true,
        }
    }

    pub fn with_interleaving(mut self, interleaved: bool) -> Self {
        self.interleaved = interleaved;
        self
    }

    /// Bytes per frame (all channels)
    pub fn frame_size(&self) -> usize {
        self.sample_format.bytes_per_sample() * self.channels
    }

    fn validate(&self) -> FormatResult<()> {
        if self.channels == 0 {
            return Err(FormatError::InvalidFormat("zero channels".into()));
        }
        if self.sample_rate == 0 {
            return Err(FormatError::InvalidFormat("zero sample rate".into()));
        }
        Ok(())
    }

    #[inline]
    fn sample_offset(&self, frame: usize, channel: usize, frames: usize) -> usize {
        let bps = self.sample_format.bytes_per_sample();
        if self.interleaved {
            (frame * self.channels + channel) * bps
        } else {
            (channel * frames + frame) * bps
        }
    }
}

impl SampleBuffer {
    /// Decode `frames` frames of raw `bytes` described by `format`
    ///
    /// The buffer takes the format's channel count. When the format's rate
    /// differs from the buffer's own rate the decoded block is resampled
    /// with [`resample_with_memory`](SampleBuffer::resample_with_memory).
    pub fn import_from_raw(&mut self, bytes: &[u8], frames: usize, format: &AudioFormat) -> FormatResult<()> {
        format.validate()?;
        let needed = frames * format.frame_size();
        if bytes.len() < needed {
            return Err(FormatError::ShortInput {
                needed,
                got: bytes.len(),
            });
        }

        let target_rate = self.sample_rate;
        self.set_channel_count(format.channels);
        self.resize(frames);
        for ch in 0..format.channels {
            let channel = &mut self.channels[ch];
            for (frame, out) in channel.iter_mut().take(frames).enumerate() {
                let offset = format.sample_offset(frame, ch, frames);
                *out = format.sample_format.decode(&bytes[offset..]);
            }
        }

        if format.sample_rate != target_rate {
            self.sample_rate = format.sample_rate;
            self.resample_with_memory(format.sample_rate, target_rate);
        }
        Ok(())
    }

    /// Encode the buffer into `out` as described by `format`
    ///
    /// Resamples in place to the format's rate first, then clamps and
    /// encodes. Channels missing from the buffer are written as silence.
    /// Returns the number of frames written.
    pub fn export_to_raw(&mut self, out: &mut Vec<u8>, format: &AudioFormat) -> FormatResult<usize> {
        format.validate()?;
        if format.sample_rate != self.sample_rate {
            let from = self.sample_rate;
            self.resample_with_memory(from, format.sample_rate);
        }

        let frames = self.length;
        out.clear();
        out.resize(frames * format.frame_size(), 0);
        let bps = format.sample_format.bytes_per_sample();
        for ch in 0..format.channels {
            for frame in 0..frames {
                let sample = if ch < self.channel_count {
                    self.channels[ch][frame].clamp(MIN_AMPLITUDE, MAX_AMPLITUDE)
                } else {
                    0.0
                };
                let offset = format.sample_offset(frame, ch, frames);
                format
                    .sample_format
                    .encode(sample, &mut out[offset..offset + bps]);
            }
        }
        Ok(frames)
    }
}
