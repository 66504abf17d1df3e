//! Multi-channel sample buffers
//!
//! [`SampleBuffer`] is the unit of audio that moves between endpoints,
//! chains and the engine's mixing stage. Channel count and length can change
//! at runtime; the backing storage only ever grows, so once a buffer has
//! reached its working size no further allocation happens on the audio
//! thread.
//!
//! Mixing N sources into one buffer follows a fixed protocol: the first
//! contributor is written with [`SampleBuffer::copy`] followed by
//! [`SampleBuffer::divide_by`]`(N)`, every following contributor with
//! [`SampleBuffer::add_with_weight`]`(buf, N)`.

mod format;
mod resample;

pub use format::*;
pub use resample::ResampleMemory;

use crate::types::{Sample, DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE, MAX_AMPLITUDE, MIN_AMPLITUDE};

/// A block of non-interleaved floating point samples
///
/// Every allocated channel array holds `reserved` samples, so any index
/// below `length` is valid for every channel below `channel_count`.
#[derive(Debug)]
pub struct SampleBuffer {
    /// Allocated channel arrays (count only grows)
    channels: Vec<Vec<Sample>>,
    /// Number of channels in use
    channel_count: usize,
    /// Working length in frames
    length: usize,
    /// Allocated length of every channel array (high-water mark)
    reserved: usize,
    sample_rate: u32,
    memory: ResampleMemory,
    /// Transient scratch used by resampling, never cloned
    scratch: Vec<Sample>,
}

impl SampleBuffer {
    /// Create a silent buffer of `length` frames
    pub fn new(length: usize, channels: usize, sample_rate: u32) -> Self {
        Self {
            channels: (0..channels).map(|_| vec![0.0; length]).collect(),
            channel_count: channels,
            length,
            reserved: length,
            sample_rate,
            memory: ResampleMemory::default(),
            scratch: Vec::new(),
        }
    }

    /// Create a buffer from per-channel sample slices
    ///
    /// The length is taken from the shortest channel.
    pub fn from_channels(channels: &[&[Sample]], sample_rate: u32) -> Self {
        let length = channels.iter().map(|c| c.len()).min().unwrap_or(0);
        let mut buffer = Self::new(length, channels.len(), sample_rate);
        for (dst, src) in buffer.channels.iter_mut().zip(channels) {
            dst[..length].copy_from_slice(&src[..length]);
        }
        buffer
    }

    /// Number of channels in use
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Working length in frames
    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Allocated frames per channel
    #[inline]
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Number of allocated channel arrays (may exceed `channel_count`)
    #[inline]
    pub fn allocated_channels(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, rate: u32) {
        self.sample_rate = rate;
    }

    /// Samples of channel `ch` in `[0, len)`
    ///
    /// Panics if `ch >= channel_count()`.
    #[inline]
    pub fn channel(&self, ch: usize) -> &[Sample] {
        assert!(ch < self.channel_count, "channel {} out of range", ch);
        &self.channels[ch][..self.length]
    }

    /// Mutable samples of channel `ch` in `[0, len)`
    #[inline]
    pub fn channel_mut(&mut self, ch: usize) -> &mut [Sample] {
        assert!(ch < self.channel_count, "channel {} out of range", ch);
        &mut self.channels[ch][..self.length]
    }

    /// Iterate over the channels in use
    pub fn channels(&self) -> impl Iterator<Item = &[Sample]> {
        let len = self.length;
        self.channels[..self.channel_count].iter().map(move |c| &c[..len])
    }

    /// Iterate mutably over the channels in use
    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut [Sample]> {
        let len = self.length;
        self.channels[..self.channel_count]
            .iter_mut()
            .map(move |c| &mut c[..len])
    }

    /// Set the working length, growing storage if needed
    ///
    /// Samples below the old length are preserved; shrinking only updates
    /// the length.
    pub fn resize(&mut self, new_length: usize) {
        self.reserve_length(new_length);
        self.length = new_length;
    }

    /// Grow storage to hold `frames` without changing the working length
    pub fn reserve_length(&mut self, frames: usize) {
        if frames > self.reserved {
            for channel in &mut self.channels {
                channel.resize(frames, 0.0);
            }
            self.reserved = frames;
        }
    }

    /// Set the number of channels in use, allocating arrays as needed
    ///
    /// Arrays beyond the new count are kept for later reuse.
    pub fn set_channel_count(&mut self, count: usize) {
        while self.channels.len() < count {
            self.channels.push(vec![0.0; self.reserved]);
        }
        self.channel_count = count;
    }

    /// Zero every sample in `[0, len)`
    pub fn make_silent(&mut self) {
        let len = self.length;
        for channel in &mut self.channels[..self.channel_count] {
            channel[..len].fill(0.0);
        }
    }

    /// Zero samples in `[start, end)`, clamped to the working length
    pub fn make_silent_range(&mut self, start: usize, end: usize) {
        let end = end.min(self.length);
        if start >= end {
            return;
        }
        for channel in &mut self.channels[..self.channel_count] {
            channel[start..end].fill(0.0);
        }
    }

    /// Grow to `length` frames with the new tail silent; never shrinks
    fn extend_silent(&mut self, length: usize) {
        if length > self.length {
            let old = self.length;
            self.resize(length);
            self.make_silent_range(old, length);
        }
    }

    /// Resize to `length` frames and silence the whole buffer
    pub fn silence_frames(&mut self, length: usize) {
        self.resize(length);
        self.make_silent();
    }

    /// Channel-wise copy of `other`
    ///
    /// The working length becomes `other.len()`. Only the overlapping
    /// channel range is written.
    pub fn copy(&mut self, other: &SampleBuffer) {
        self.resize(other.length);
        let len = self.length;
        let channels = self.channel_count.min(other.channel_count);
        for ch in 0..channels {
            self.channels[ch][..len].copy_from_slice(&other.channels[ch][..len]);
        }
    }

    /// Copy frames `[start, end)` of `other` into this buffer at `to`
    ///
    /// Copying stops at the end of either buffer.
    pub fn copy_range(&mut self, other: &SampleBuffer, start: usize, end: usize, to: usize) {
        let end = end.min(other.length);
        if start >= end || to >= self.length {
            return;
        }
        let count = (end - start).min(self.length - to);
        let channels = self.channel_count.min(other.channel_count);
        for ch in 0..channels {
            self.channels[ch][to..to + count]
                .copy_from_slice(&other.channels[ch][start..start + count]);
        }
    }

    /// Overwrite channel `to` with channel `from`
    pub fn copy_channel(&mut self, from: usize, to: usize) {
        assert!(
            from < self.channel_count && to < self.channel_count,
            "copy_channel {} -> {} out of range",
            from,
            to
        );
        if from == to {
            return;
        }
        let len = self.length;
        let (src, dst) = if from < to {
            let (head, tail) = self.channels.split_at_mut(to);
            (&head[from], &mut tail[0])
        } else {
            let (head, tail) = self.channels.split_at_mut(from);
            (&tail[0], &mut head[to])
        };
        dst[..len].copy_from_slice(&src[..len]);
    }

    /// Full assignment from `other`: channels, length, rate and resample memory
    ///
    /// Unlike [`copy`](Self::copy) this always writes every channel of
    /// `other`, allocating arrays as needed.
    pub fn assign(&mut self, other: &SampleBuffer) {
        self.set_channel_count(other.channel_count);
        self.resize(other.length);
        self.sample_rate = other.sample_rate;
        self.memory.clone_from(&other.memory);
        let len = self.length;
        for ch in 0..self.channel_count {
            self.channels[ch][..len].copy_from_slice(&other.channels[ch][..len]);
        }
    }

    /// Channel-wise sum of `other` into this buffer
    ///
    /// Grows the working length to `other.len()` if needed.
    pub fn add(&mut self, other: &SampleBuffer) {
        self.extend_silent(other.length);
        let channels = self.channel_count.min(other.channel_count);
        for ch in 0..channels {
            let src = &other.channels[ch][..other.length];
            for (dst, s) in self.channels[ch].iter_mut().zip(src) {
                *dst += *s;
            }
        }
    }

    /// Channel-wise sum where every sample of `other` is divided by `weight`
    ///
    /// `weight` must be non-zero.
    pub fn add_with_weight(&mut self, other: &SampleBuffer, weight: usize) {
        debug_assert!(weight != 0, "add_with_weight: zero weight");
        self.extend_silent(other.length);
        let weight = weight as Sample;
        let channels = self.channel_count.min(other.channel_count);
        for ch in 0..channels {
            let src = &other.channels[ch][..other.length];
            for (dst, s) in self.channels[ch].iter_mut().zip(src) {
                *dst += *s / weight;
            }
        }
    }

    /// Divide every sample in use by `divisor` (must be non-zero)
    pub fn divide_by(&mut self, divisor: Sample) {
        debug_assert!(divisor != 0.0, "divide_by: zero divisor");
        for channel in self.channels_mut() {
            for s in channel.iter_mut() {
                *s /= divisor;
            }
        }
    }

    /// Multiply every sample in use by `factor`
    pub fn scale(&mut self, factor: Sample) {
        for channel in self.channels_mut() {
            for s in channel.iter_mut() {
                *s *= factor;
            }
        }
    }

    /// Clamp every sample into `[MIN_AMPLITUDE, MAX_AMPLITUDE]`
    pub fn limit_values(&mut self) {
        for channel in self.channels_mut() {
            for s in channel.iter_mut() {
                *s = s.clamp(MIN_AMPLITUDE, MAX_AMPLITUDE);
            }
        }
    }

    /// Largest absolute sample value across all channels in use
    pub fn peak(&self) -> Sample {
        self.channels()
            .flat_map(|c| c.iter())
            .fold(0.0, |acc: Sample, s| acc.max(s.abs()))
    }

    /// Write the buffer as interleaved frames into `out`
    pub fn write_interleaved(&self, out: &mut Vec<Sample>) {
        out.clear();
        out.reserve(self.length * self.channel_count);
        for frame in 0..self.length {
            for ch in 0..self.channel_count {
                out.push(self.channels[ch][frame]);
            }
        }
    }

    /// Replace the contents with interleaved `data` of `channels` channels
    pub fn read_interleaved(&mut self, data: &[Sample], channels: usize) {
        if channels == 0 {
            self.resize(0);
            return;
        }
        let frames = data.len() / channels;
        self.set_channel_count(channels);
        self.resize(frames);
        for (frame, chunk) in data.chunks_exact(channels).enumerate() {
            for (ch, s) in chunk.iter().enumerate() {
                self.channels[ch][frame] = *s;
            }
        }
    }

    /// Carried interpolation state of [`resample_with_memory`](Self::resample_with_memory)
    pub fn resample_memory(&self) -> &ResampleMemory {
        &self.memory
    }

    /// Forget carried resampling state (after a seek, for example)
    pub fn reset_resample_memory(&mut self) {
        self.memory.reset();
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new(0, DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE)
    }
}

impl Clone for SampleBuffer {
    fn clone(&self) -> Self {
        Self {
            channels: self.channels.clone(),
            channel_count: self.channel_count,
            length: self.length,
            reserved: self.reserved,
            sample_rate: self.sample_rate,
            memory: self.memory.clone(),
            scratch: Vec::new(),
        }
    }
}
