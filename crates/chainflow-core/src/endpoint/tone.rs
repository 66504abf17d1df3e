//! Tone generator endpoint

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

use super::{AudioEndpoint, Capabilities, EndpointBase, EndpointResult, IoMode};
use crate::buffer::{AudioFormat, SampleBuffer, SampleFormat};
use crate::types::{Sample, SamplePos, DEFAULT_SAMPLE_RATE};

/// Sine table size is `1 << SINE_TABLE_BITS`
const SINE_TABLE_BITS: u32 = 14;

fn build_sine_table() -> Vec<Sample> {
    let size = 1usize << SINE_TABLE_BITS;
    (0..size)
        .map(|i| (TAU * i as f64 / size as f64).sin() as Sample)
        .collect()
}

/// Signal produced by a [`ToneGenerator`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    /// Sine at the given frequency in Hz
    Sine { frequency: f64 },
    /// DC at the given level
    Constant { level: Sample },
}

/// A generator source
///
/// Produces the same signal on every channel. The sine wavetable belongs
/// to the generator and is built the first time a sine is rendered. With
/// a duration set the generator finishes after that many frames, otherwise
/// it runs forever.
pub struct ToneGenerator {
    base: EndpointBase,
    waveform: Waveform,
    amplitude: Sample,
    /// Phase in cycles, `[0, 1)`
    phase: f64,
    table: Option<Vec<Sample>>,
}

impl ToneGenerator {
    pub fn new(label: impl Into<String>, waveform: Waveform, channels: usize) -> Self {
        let format = AudioFormat::new(SampleFormat::F32Le, channels, DEFAULT_SAMPLE_RATE);
        Self {
            base: EndpointBase::new(label, IoMode::Read, format),
            waveform,
            amplitude: 1.0,
            phase: 0.0,
            table: None,
        }
    }

    pub fn sine(label: impl Into<String>, frequency: f64, channels: usize) -> Self {
        Self::new(label, Waveform::Sine { frequency }, channels)
    }

    pub fn constant(label: impl Into<String>, level: Sample, channels: usize) -> Self {
        Self::new(label, Waveform::Constant { level }, channels)
    }

    /// Stop after `frames` frames
    pub fn with_duration(mut self, frames: SamplePos) -> Self {
        self.base.set_length(Some(frames));
        self
    }

    pub fn with_amplitude(mut self, amplitude: Sample) -> Self {
        self.amplitude = amplitude;
        self
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    fn remaining(&self) -> usize {
        let wanted = self.base.buffersize();
        match self.base.length() {
            Some(len) => (len - self.base.position()).clamp(0, wanted as SamplePos) as usize,
            None => wanted,
        }
    }
}

impl AudioEndpoint for ToneGenerator {
    fn label(&self) -> &str {
        self.base.label()
    }

    fn io_mode(&self) -> IoMode {
        IoMode::Read
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            readable: true,
            writable: false,
            realtime: false,
            seekable: true,
        }
    }

    fn format(&self) -> AudioFormat {
        self.base.format()
    }

    fn set_buffersize(&mut self, frames: usize, sample_rate: u32) {
        self.base.set_buffersize(frames, sample_rate);
        self.base.format_mut().sample_rate = sample_rate;
    }

    fn buffersize(&self) -> usize {
        self.base.buffersize()
    }

    fn open(&mut self) -> EndpointResult<()> {
        self.base.set_position(0);
        self.phase = 0.0;
        self.base.set_finished(self.base.length() == Some(0));
        self.base.set_open(true);
        Ok(())
    }

    fn close(&mut self) {
        self.base.set_open(false);
    }

    fn is_open(&self) -> bool {
        self.base.is_open()
    }

    fn read_buffer(&mut self, buffer: &mut SampleBuffer) -> EndpointResult<()> {
        self.base.ensure_open()?;
        let frames = self.remaining();
        let channels = self.base.format().channels;
        let rate = self.base.engine_rate();

        buffer.set_channel_count(channels);
        buffer.resize(frames);
        buffer.set_sample_rate(rate);

        match self.waveform {
            Waveform::Constant { level } => {
                let value = level * self.amplitude;
                for ch in buffer.channels_mut() {
                    ch.fill(value);
                }
            }
            Waveform::Sine { frequency } => {
                let step = frequency / rate as f64;
                let amplitude = self.amplitude;
                let mut phase = self.phase;
                let size = 1usize << SINE_TABLE_BITS;
                let table: &[Sample] = self.table.get_or_insert_with(build_sine_table);
                for frame in 0..frames {
                    let value = table[(phase * size as f64) as usize % size] * amplitude;
                    for ch in 0..channels {
                        buffer.channel_mut(ch)[frame] = value;
                    }
                    phase = (phase + step).fract();
                }
                self.phase = phase;
            }
        }

        self.base.advance(frames);
        if let Some(len) = self.base.length() {
            if self.base.position() >= len {
                self.base.set_finished(true);
            }
        }
        Ok(())
    }

    fn write_buffer(&mut self, _buffer: &mut SampleBuffer) -> EndpointResult<()> {
        self.base.ensure_writable()
    }

    fn position(&self) -> SamplePos {
        self.base.position()
    }

    fn seek(&mut self, position: SamplePos) -> EndpointResult<()> {
        let position = position.max(0);
        if let Waveform::Sine { frequency } = self.waveform {
            let rate = self.base.engine_rate().max(1) as f64;
            self.phase = (position as f64 * frequency / rate).fract();
        }
        self.base.set_position(position);
        let finished = self.base.length().map_or(false, |len| position >= len);
        self.base.set_finished(finished);
        Ok(())
    }

    fn length(&self) -> Option<SamplePos> {
        self.base.length()
    }

    fn finished(&self) -> bool {
        self.base.finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_tone() {
        let mut tone = ToneGenerator::constant("dc", 0.5, 2);
        tone.set_buffersize(32, 44100);
        tone.open().unwrap();
        let mut buf = SampleBuffer::default();
        tone.read_buffer(&mut buf).unwrap();
        assert_eq!(buf.len(), 32);
        assert!(buf.channels().all(|c| c.iter().all(|&s| s == 0.5)));
        assert!(!tone.finished());
    }

    #[test]
    fn test_sine_tone_peak_and_zero_start() {
        let mut tone = ToneGenerator::sine("sine", 441.0, 1);
        tone.set_buffersize(100, 44100);
        tone.open().unwrap();
        let mut buf = SampleBuffer::default();
        tone.read_buffer(&mut buf).unwrap();
        assert_eq!(buf.channel(0)[0], 0.0);
        // one full cycle per 100 frames at 441 Hz
        assert!((buf.channel(0)[25] - 1.0).abs() < 1e-3);
        assert!((buf.channel(0)[75] + 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_duration_finishes() {
        let mut tone = ToneGenerator::constant("dc", 0.1, 1).with_duration(50);
        tone.set_buffersize(32, 44100);
        tone.open().unwrap();
        let mut buf = SampleBuffer::default();
        tone.read_buffer(&mut buf).unwrap();
        assert!(!tone.finished());
        tone.read_buffer(&mut buf).unwrap();
        assert_eq!(buf.len(), 18);
        assert!(tone.finished());

        tone.seek(0).unwrap();
        assert!(!tone.finished());
    }

    #[test]
    fn test_wavetable_built_lazily() {
        let mut tone = ToneGenerator::sine("sine", 1000.0, 1);
        assert!(tone.table.is_none());
        tone.set_buffersize(8, 44100);
        tone.open().unwrap();
        let mut buf = SampleBuffer::default();
        tone.read_buffer(&mut buf).unwrap();
        assert_eq!(tone.table.as_ref().map(|t| t.len()), Some(1 << SINE_TABLE_BITS));
    }
}
