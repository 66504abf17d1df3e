//! In-memory endpoints
//!
//! A [`MemoryEndpoint`] either plays back sample data it was given or
//! records everything written to it into a [`Capture`] that can be inspected
//! from another thread. Used for embedding the engine and throughout the
//! engine tests.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{AudioEndpoint, Capabilities, EndpointBase, EndpointResult, IoMode};
use crate::buffer::{AudioFormat, SampleBuffer};
use crate::types::{Sample, SamplePos};

/// Shared view of the data recorded by a memory sink
#[derive(Debug, Clone, Default)]
pub struct Capture {
    data: Arc<Mutex<Vec<Vec<Sample>>>>,
}

impl Capture {
    fn new(channels: usize) -> Self {
        Self {
            data: Arc::new(Mutex::new(vec![Vec::new(); channels])),
        }
    }

    /// Recorded frames (length of the longest channel)
    pub fn frames(&self) -> usize {
        self.data.lock().iter().map(|c| c.len()).max().unwrap_or(0)
    }

    pub fn channels(&self) -> usize {
        self.data.lock().len()
    }

    /// Copy of the recorded samples, one `Vec` per channel
    pub fn snapshot(&self) -> Vec<Vec<Sample>> {
        self.data.lock().clone()
    }

    pub fn clear(&self) {
        for ch in self.data.lock().iter_mut() {
            ch.clear();
        }
    }
}

/// Memory-backed source or sink
pub struct MemoryEndpoint {
    base: EndpointBase,
    source: Vec<Vec<Sample>>,
    capture: Option<Capture>,
}

impl MemoryEndpoint {
    /// Source playing `channels` (one `Vec` per channel, equal lengths)
    pub fn source(label: impl Into<String>, channels: Vec<Vec<Sample>>) -> Self {
        let format = AudioFormat {
            channels: channels.len(),
            ..AudioFormat::default()
        };
        let length = channels.iter().map(|c| c.len()).min().unwrap_or(0);
        let mut base = EndpointBase::new(label, IoMode::Read, format);
        base.set_length(Some(length as SamplePos));
        Self {
            base,
            source: channels,
            capture: None,
        }
    }

    /// Sink recording `channels` channels
    pub fn sink(label: impl Into<String>, channels: usize) -> Self {
        let format = AudioFormat {
            channels,
            ..AudioFormat::default()
        };
        Self {
            base: EndpointBase::new(label, IoMode::Write, format),
            source: Vec::new(),
            capture: Some(Capture::new(channels)),
        }
    }

    /// Handle to the recorded data, `None` for sources
    pub fn capture(&self) -> Option<Capture> {
        self.capture.clone()
    }

    fn source_frames(&self) -> usize {
        self.source.iter().map(|c| c.len()).min().unwrap_or(0)
    }
}

impl AudioEndpoint for MemoryEndpoint {
    fn label(&self) -> &str {
        self.base.label()
    }

    fn io_mode(&self) -> IoMode {
        self.base.io_mode()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            readable: self.capture.is_none(),
            writable: self.capture.is_some(),
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
        self.base.set_finished(self.capture.is_none() && self.source_frames() == 0);
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
        self.base.ensure_readable()?;
        let total = self.source_frames();
        let start = (self.base.position().max(0) as usize).min(total);
        let frames = self.base.buffersize().min(total - start);

        buffer.set_channel_count(self.source.len());
        buffer.set_sample_rate(self.base.engine_rate());
        buffer.resize(frames);
        for (ch, data) in self.source.iter().enumerate() {
            buffer.channel_mut(ch).copy_from_slice(&data[start..start + frames]);
        }

        self.base.advance(frames);
        if start + frames >= total {
            self.base.set_finished(true);
        }
        Ok(())
    }

    fn write_buffer(&mut self, buffer: &mut SampleBuffer) -> EndpointResult<()> {
        self.base.ensure_open()?;
        self.base.ensure_writable()?;
        let at = self.base.position().max(0) as usize;
        let frames = buffer.len();
        if let Some(capture) = &self.capture {
            let mut data = capture.data.lock();
            for (ch, dst) in data.iter_mut().enumerate() {
                if dst.len() < at + frames {
                    dst.resize(at + frames, 0.0);
                }
                if ch < buffer.channel_count() {
                    dst[at..at + frames].copy_from_slice(buffer.channel(ch));
                } else {
                    dst[at..at + frames].fill(0.0);
                }
            }
        }
        self.base.advance(frames);
        self.base.extend_length();
        Ok(())
    }

    fn position(&self) -> SamplePos {
        self.base.position()
    }

    fn seek(&mut self, position: SamplePos) -> EndpointResult<()> {
        let position = position.max(0);
        self.base.set_position(position);
        if self.capture.is_none() {
            self.base.set_finished(position as usize >= self.source_frames());
        }
        Ok(())
    }

    fn length(&self) -> Option<SamplePos> {
        self.base.length()
    }

    fn finished(&self) -> bool {
        self.base.finished()
    }
}
