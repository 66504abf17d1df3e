//! Loop device - routes chain outputs back into chain inputs

use super::{AudioEndpoint, Capabilities, EndpointBase, EndpointResult, IoMode};
use crate::buffer::{AudioFormat, SampleBuffer};
use crate::types::SamplePos;

/// Internal routing point
///
/// Registered as an output of some chains and an input of others. Every
/// write during one engine iteration is accumulated with the mixing
/// protocol (`copy` + `divide_by(n)`, then `add_with_weight(buf, n)` where
/// `n` is the number of output slots registered on the loop by the setup);
/// the next read hands out the
/// mix and starts a new round. Reads before anything was written return
/// silence, so data written in iteration `i` is read in iteration `i + 1`.
///
/// A loop never keeps the engine alive: it always reports `finished`, so
/// the block written in the very last iteration is not read back.
pub struct LoopDevice {
    base: EndpointBase,
    writers: usize,
    writes_this_round: usize,
    mix: SampleBuffer,
    filled: bool,
}

impl LoopDevice {
    pub fn new(label: impl Into<String>, channels: usize) -> Self {
        let format = AudioFormat {
            channels,
            ..AudioFormat::default()
        };
        Self {
            base: EndpointBase::new(label, IoMode::ReadWrite, format),
            writers: 1,
            writes_this_round: 0,
            mix: SampleBuffer::new(0, channels, format.sample_rate),
            filled: false,
        }
    }

    pub fn writers(&self) -> usize {
        self.writers
    }
}

impl AudioEndpoint for LoopDevice {
    fn label(&self) -> &str {
        self.base.label()
    }

    fn io_mode(&self) -> IoMode {
        IoMode::ReadWrite
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            readable: true,
            writable: true,
            realtime: false,
            seekable: false,
        }
    }

    fn format(&self) -> AudioFormat {
        self.base.format()
    }

    fn set_buffersize(&mut self, frames: usize, sample_rate: u32) {
        self.base.set_buffersize(frames, sample_rate);
        self.base.format_mut().sample_rate = sample_rate;
        self.mix.set_sample_rate(sample_rate);
        self.mix.reserve_length(frames);
    }

    fn buffersize(&self) -> usize {
        self.base.buffersize()
    }

    fn set_writer_count(&mut self, writers: usize) {
        self.writers = writers.max(1);
    }

    fn open(&mut self) -> EndpointResult<()> {
        self.filled = false;
        self.writes_this_round = 0;
        self.base.set_position(0);
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
        let channels = self.base.format().channels;
        buffer.set_channel_count(channels);
        buffer.set_sample_rate(self.base.engine_rate());
        if self.filled {
            buffer.copy(&self.mix);
        } else {
            buffer.silence_frames(self.base.buffersize());
        }
        self.writes_this_round = 0;
        self.base.advance(buffer.len());
        Ok(())
    }

    fn write_buffer(&mut self, buffer: &mut SampleBuffer) -> EndpointResult<()> {
        self.base.ensure_open()?;
        self.mix.set_channel_count(self.base.format().channels);
        if self.writes_this_round == 0 {
            self.mix.make_silent();
            self.mix.copy(buffer);
            if self.writers > 1 {
                self.mix.divide_by(self.writers as f32);
            }
        } else {
            self.mix.add_with_weight(buffer, self.writers);
        }
        self.writes_this_round += 1;
        self.filled = true;
        Ok(())
    }

    fn position(&self) -> SamplePos {
        self.base.position()
    }

    fn seek(&mut self, position: SamplePos) -> EndpointResult<()> {
        self.base.set_position(position.max(0));
        Ok(())
    }

    fn finished(&self) -> bool {
        true
    }
}
