//! Audio endpoints - sources and sinks behind one interface
//!
//! Every file, device, generator and internal routing point implements
//! [`AudioEndpoint`]. The engine never downcasts: it asks an endpoint for its
//! [`Capabilities`] and treats realtime devices (prepare/start/stop,
//! fixed-rate I/O) differently from everything else.
//!
//! Endpoints are shared between the engine thread and the proxy I/O thread
//! as [`SharedEndpoint`] handles. Concrete variants:
//! - [`RawFileEndpoint`]: headerless PCM file in any [`SampleFormat`](crate::buffer::SampleFormat)
//! - [`WavFileEndpoint`]: RIFF/WAVE file
//! - [`ToneGenerator`]: sine or constant source
//! - [`NullEndpoint`]: silent source / discarding sink
//! - [`RtNullDevice`]: realtime null device paced by the wall clock
//! - [`LoopDevice`]: internal routing from chain outputs back to chain inputs
//! - [`MemoryEndpoint`]: in-memory source / capturing sink

mod error;
mod loopback;
mod memory;
mod null;
mod raw;
mod registry;
mod rtnull;
mod tone;
mod wav;

pub use error::*;
pub use loopback::LoopDevice;
pub use memory::{Capture, MemoryEndpoint};
pub use null::NullEndpoint;
pub use raw::RawFileEndpoint;
pub use registry::{EndpointParams, EndpointRegistry};
pub use rtnull::RtNullDevice;
pub use tone::{ToneGenerator, Waveform};
pub use wav::WavFileEndpoint;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::buffer::{AudioFormat, SampleBuffer};
use crate::types::{SamplePos, DEFAULT_BUFFER_SIZE, DEFAULT_SAMPLE_RATE};

/// Direction(s) an endpoint is opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoMode {
    Read,
    Write,
    ReadWrite,
}

impl IoMode {
    pub fn can_read(&self) -> bool {
        matches!(self, IoMode::Read | IoMode::ReadWrite)
    }

    pub fn can_write(&self) -> bool {
        matches!(self, IoMode::Write | IoMode::ReadWrite)
    }
}

impl fmt::Display for IoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IoMode::Read => "read",
            IoMode::Write => "write",
            IoMode::ReadWrite => "read-write",
        };
        f.write_str(name)
    }
}

/// What an endpoint variant can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub readable: bool,
    pub writable: bool,
    /// Live device with prepare/start/stop semantics
    pub realtime: bool,
    pub seekable: bool,
}

impl Capabilities {
    pub fn supports(&self, mode: IoMode) -> bool {
        match mode {
            IoMode::Read => self.readable,
            IoMode::Write => self.writable,
            IoMode::ReadWrite => self.readable && self.writable,
        }
    }
}

/// The uniform source/sink interface
///
/// Buffered I/O moves one [`SampleBuffer`] per call. `read_buffer` sets the
/// buffer's channel count, length (frames actually read) and sample rate;
/// a read that returns fewer frames than the buffer size marks the end of
/// the stream. Positions and lengths are in frames at the engine rate.
pub trait AudioEndpoint: Send {
    /// Identifier, usually a path or device name
    fn label(&self) -> &str;

    fn io_mode(&self) -> IoMode;

    fn capabilities(&self) -> Capabilities;

    fn is_realtime(&self) -> bool {
        self.capabilities().realtime
    }

    /// Native stream format (rate may differ from the engine rate)
    fn format(&self) -> AudioFormat;

    fn channels(&self) -> usize {
        self.format().channels
    }

    fn sample_rate(&self) -> u32 {
        self.format().sample_rate
    }

    /// Negotiate block size and engine sample rate
    fn set_buffersize(&mut self, frames: usize, sample_rate: u32);

    fn buffersize(&self) -> usize;

    /// Output slots of the setup that write into this endpoint each iteration
    fn set_writer_count(&mut self, _writers: usize) {}

    fn open(&mut self) -> EndpointResult<()>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn read_buffer(&mut self, buffer: &mut SampleBuffer) -> EndpointResult<()>;

    /// Consume `buffer`; the endpoint may resample or reshape it in place
    fn write_buffer(&mut self, buffer: &mut SampleBuffer) -> EndpointResult<()>;

    /// Current position in frames
    fn position(&self) -> SamplePos;

    fn seek(&mut self, position: SamplePos) -> EndpointResult<()>;

    /// Move the position by `frames` relative to the current one
    fn seek_advance(&mut self, frames: SamplePos) -> EndpointResult<()> {
        let target = (self.position() + frames).max(0);
        self.seek(target)
    }

    /// Total length in frames, `None` when unknown or unbounded
    fn length(&self) -> Option<SamplePos> {
        None
    }

    /// No more data can be read (or written)
    fn finished(&self) -> bool;

    // ─────────────────────────────────────────────────────────────
    // Realtime sub-lifecycle (no-ops for non-realtime endpoints)
    // ─────────────────────────────────────────────────────────────

    fn prepare(&mut self) -> EndpointResult<()> {
        Ok(())
    }

    fn start(&mut self) -> EndpointResult<()> {
        Ok(())
    }

    fn stop(&mut self) -> EndpointResult<()> {
        Ok(())
    }

    fn is_running(&self) -> bool {
        false
    }

    /// Device latency in frames
    fn latency(&self) -> usize {
        0
    }
}

/// Handle through which the engine and proxy thread share an endpoint
pub type SharedEndpoint = Arc<Mutex<dyn AudioEndpoint>>;

/// Wrap a concrete endpoint into a [`SharedEndpoint`]
pub fn shared<E: AudioEndpoint + 'static>(endpoint: E) -> SharedEndpoint {
    Arc::new(Mutex::new(endpoint))
}

/// State every endpoint variant carries
///
/// Composed into concrete endpoints the same way operators compose
/// [`OperatorBase`](crate::operator::OperatorBase).
#[derive(Debug, Clone)]
pub struct EndpointBase {
    label: String,
    io_mode: IoMode,
    format: AudioFormat,
    buffersize: usize,
    engine_rate: u32,
    position: SamplePos,
    length: Option<SamplePos>,
    open: bool,
    finished: bool,
}

impl EndpointBase {
    pub fn new(label: impl Into<String>, io_mode: IoMode, format: AudioFormat) -> Self {
        Self {
            label: label.into(),
            io_mode,
            format,
            buffersize: DEFAULT_BUFFER_SIZE,
            engine_rate: DEFAULT_SAMPLE_RATE,
            position: 0,
            length: None,
            open: false,
            finished: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn io_mode(&self) -> IoMode {
        self.io_mode
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn format_mut(&mut self) -> &mut AudioFormat {
        &mut self.format
    }

    pub fn buffersize(&self) -> usize {
        self.buffersize
    }

    /// Rate of the buffers exchanged with the engine
    pub fn engine_rate(&self) -> u32 {
        self.engine_rate
    }

    pub fn set_buffersize(&mut self, frames: usize, sample_rate: u32) {
        self.buffersize = frames;
        self.engine_rate = sample_rate;
    }

    pub fn position(&self) -> SamplePos {
        self.position
    }

    pub fn set_position(&mut self, position: SamplePos) {
        self.position = position;
    }

    pub fn advance(&mut self, frames: usize) {
        self.position += frames as SamplePos;
    }

    pub fn length(&self) -> Option<SamplePos> {
        self.length
    }

    pub fn set_length(&mut self, length: Option<SamplePos>) {
        self.length = length;
    }

    /// Extend the known length if the position moved past it
    pub fn extend_length(&mut self) {
        let len = self.length.unwrap_or(0);
        if self.position > len {
            self.length = Some(self.position);
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn set_open(&mut self, open: bool) {
        self.open = open;
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn set_finished(&mut self, finished: bool) {
        self.finished = finished;
    }

    pub fn ensure_open(&self) -> EndpointResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(EndpointError::NotOpen(self.label.clone()))
        }
    }

    pub fn ensure_readable(&self) -> EndpointResult<()> {
        if self.io_mode.can_read() {
            Ok(())
        } else {
            Err(EndpointError::UnsupportedIoMode {
                label: self.label.clone(),
                mode: IoMode::Read,
            })
        }
    }

    pub fn ensure_writable(&self) -> EndpointResult<()> {
        if self.io_mode.can_write() {
            Ok(())
        } else {
            Err(EndpointError::UnsupportedIoMode {
                label: self.label.clone(),
                mode: IoMode::Write,
            })
        }
    }

    /// Frames of engine-rate data equivalent to `native` frames of the endpoint's own rate
    pub fn native_to_engine(&self, native: SamplePos) -> SamplePos {
        rescale(native, self.format.sample_rate, self.engine_rate)
    }

    /// Native-rate frames equivalent to `engine` frames at the engine rate
    pub fn engine_to_native(&self, engine: SamplePos) -> SamplePos {
        rescale(engine, self.engine_rate, self.format.sample_rate)
    }
}

fn rescale(frames: SamplePos, from: u32, to: u32) -> SamplePos {
    if from == to || from == 0 {
        return frames;
    }
    ((frames as i128 * to as i128) / from as i128) as SamplePos
}
