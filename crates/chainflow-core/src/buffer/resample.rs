//! Linear-interpolation sample rate conversion with carried state
//!
//! Each channel remembers its last input sample and the fractional read head
//! left over from the previous block, so a stream converted block by block
//! is identical to the same stream converted in one pass.

use super::SampleBuffer;
use crate::types::Sample;

/// State carried between successive [`SampleBuffer::resample_with_memory`] calls
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResampleMemory {
    /// Fractional read head relative to the start of the next input block
    position: f64,
    /// Last input sample of the previous block, per channel
    last: Vec<Sample>,
}

impl ResampleMemory {
    pub fn reset(&mut self) {
        self.position = 0.0;
        self.last.fill(0.0);
    }

    /// Fractional read head carried into the next block
    pub fn position(&self) -> f64 {
        self.position
    }
}

impl SampleBuffer {
    /// Convert the buffer in place from rate `from` to rate `to`
    ///
    /// Output sample `n` interpolates between input frames `i - 1` and `i`
    /// where `i + frac = start + n * from / to`; frame `-1` is the last sample
    /// of the previous call. The working length becomes the number of output
    /// frames produced and the buffer's rate becomes `to`.
    pub fn resample_with_memory(&mut self, from: u32, to: u32) {
        if from == 0 || to == 0 || from == to {
            if to != 0 {
                self.sample_rate = to;
            }
            return;
        }

        let step = from as f64 / to as f64;
        let old_len = self.length;
        let start = self.memory.position;

        let mut out_len = 0usize;
        let mut head = start;
        while head < old_len as f64 {
            out_len += 1;
            head += step;
        }
        let next_position = head - old_len as f64;

        self.reserve_length(out_len);
        if self.memory.last.len() < self.channel_count {
            self.memory.last.resize(self.channel_count, 0.0);
        }

        for ch in 0..self.channel_count {
            self.scratch.clear();
            self.scratch.extend_from_slice(&self.channels[ch][..old_len]);
            let previous = self.memory.last[ch];
            let output = &mut self.channels[ch];

            let mut head = start;
            for out in output.iter_mut().take(out_len) {
                let index = head as usize;
                let frac = (head - index as f64) as Sample;
                let a = if index == 0 {
                    previous
                } else {
                    self.scratch[index - 1]
                };
                let b = self.scratch[index.min(old_len - 1)];
                *out = a + (b - a) * frac;
                head += step;
            }

            if old_len > 0 {
                self.memory.last[ch] = self.scratch[old_len - 1];
            }
        }

        self.length = out_len;
        self.memory.position = next_position;
        self.sample_rate = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frames: usize, rate: u32, freq: f64) -> Vec<Sample> {
        (0..frames)
            .map(|n| (2.0 * std::f64::consts::PI * freq * n as f64 / rate as f64).sin() as Sample)
            .collect()
    }

    fn max_delta(samples: &[Sample]) -> Sample {
        samples
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0, Sample::max)
    }

    fn resample_in_chunks(input: &[Sample], chunk: usize, from: u32, to: u32) -> Vec<Sample> {
        let mut buf = SampleBuffer::new(0, 1, from);
        let mut out = Vec::new();
        for block in input.chunks(chunk) {
            buf.set_sample_rate(from);
            buf.resize(block.len());
            buf.channel_mut(0).copy_from_slice(block);
            buf.resample_with_memory(from, to);
            out.extend_from_slice(buf.channel(0));
        }
        out
    }

    #[test]
    fn test_same_rate_is_noop() {
        let mut buf = SampleBuffer::from_channels(&[&[0.1, 0.2, 0.3]], 44100);
        buf.resample_with_memory(44100, 44100);
        assert_eq!(buf.channel(0), &[0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_output_length_follows_ratio() {
        let input = sine(4410, 44100, 440.0);
        let out = resample_in_chunks(&input, 4410, 44100, 48000);
        assert!((out.len() as i64 - 4800).abs() <= 1, "len {}", out.len());

        let out = resample_in_chunks(&input, 4410, 44100, 22050);
        assert!((out.len() as i64 - 2205).abs() <= 1, "len {}", out.len());
    }

    #[test]
    fn test_chunked_matches_single_pass() {
        let input = sine(8192, 44100, 1000.0);
        for (from, to) in [(44100, 48000), (48000, 44100), (22050, 44100)] {
            let whole = resample_in_chunks(&input, input.len(), from, to);
            let chunked = resample_in_chunks(&input, 333, from, to);
            assert_eq!(whole.len(), chunked.len());
            for (a, b) in whole.iter().zip(&chunked) {
                assert!((a - b).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_chunk_boundaries_have_no_clicks() {
        let input = sine(8192, 44100, 440.0);
        let whole = resample_in_chunks(&input, input.len(), 44100, 48000);
        let chunked = resample_in_chunks(&input, 256, 44100, 48000);
        // skip the leading ramp from the zero memory sample
        assert!(max_delta(&chunked[1..]) <= max_delta(&whole[1..]) + 1e-4);
    }

    #[test]
    fn test_memory_carries_last_sample() {
        let mut buf = SampleBuffer::from_channels(&[&[0.0, 0.5, 1.0]], 22050);
        buf.resample_with_memory(22050, 44100);
        assert_eq!(buf.sample_rate(), 44100);
        assert_eq!(buf.len(), 6);
        assert_eq!(buf.resample_memory().last, vec![1.0]);
    }
}
