//! Null endpoint - silent source, discarding sink

use super::{AudioEndpoint, Capabilities, EndpointBase, EndpointResult, IoMode};
use crate::buffer::{AudioFormat, SampleBuffer};
use crate::types::SamplePos;

/// Reads silence, swallows writes
///
/// Never finishes as a source; give the engine a processing length when
/// the null endpoint is the only input.
pub struct NullEndpoint {
    base: EndpointBase,
}

impl NullEndpoint {
    pub fn new(label: impl Into<String>, io_mode: IoMode, channels: usize) -> Self {
        let format = AudioFormat {
            channels,
            ..AudioFormat::default()
        };
        Self {
            base: EndpointBase::new(label, io_mode, format),
        }
    }
}

impl AudioEndpoint for NullEndpoint {
    fn label(&self) -> &str {
        self.base.label()
    }

    fn io_mode(&self) -> IoMode {
        self.base.io_mode()
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
    }

    fn buffersize(&self) -> usize {
        self.base.buffersize()
    }

    fn open(&mut self) -> EndpointResult<()> {
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
        self.base.ensure_readable()?;
        buffer.set_channel_count(self.base.format().channels);
        buffer.set_sample_rate(self.base.engine_rate());
        buffer.silence_frames(self.base.buffersize());
        self.base.advance(buffer.len());
        Ok(())
    }

    fn write_buffer(&mut self, buffer: &mut SampleBuffer) -> EndpointResult<()> {
        self.base.ensure_writable()?;
        self.base.advance(buffer.len());
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
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_source_is_silent() {
        let mut null = NullEndpoint::new("null", IoMode::ReadWrite, 3);
        null.set_buffersize(16, 48000);
        null.open().unwrap();

        let mut buf = SampleBuffer::new(16, 3, 48000);
        for ch in buf.channels_mut() {
            ch.fill(1.0);
        }
        null.read_buffer(&mut buf).unwrap();
        assert_eq!(buf.channel_count(), 3);
        assert_eq!(buf.peak(), 0.0);

        null.write_buffer(&mut buf).unwrap();
        assert_eq!(null.position(), 32);
        assert!(!null.finished());
    }
}
