//! Realtime null device
//!
//! Behaves like a sound card that plays into (or records from) nothing: it
//! has the full prepare/start/stop lifecycle and consumes or produces data
//! at exactly the sample rate, measured against the wall clock. Useful for
//! timing tests and for running realtime topologies without hardware.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::{AudioEndpoint, Capabilities, EndpointBase, EndpointError, EndpointResult, IoMode};
use crate::buffer::{AudioFormat, SampleBuffer};
use crate::types::SamplePos;

/// Buffer periods a device may run ahead/behind before an xrun is declared
const XRUN_PERIODS: f64 = 2.0;

/// Counters shared with whoever created the device
#[derive(Debug, Default)]
pub struct DeviceStats {
    pub reads: AtomicU64,
    pub writes: AtomicU64,
    pub starts: AtomicU64,
    pub stops: AtomicU64,
    pub xruns: AtomicU64,
    /// Writes that had happened when the device was first started
    pub writes_before_start: AtomicU64,
}

impl DeviceStats {
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// A realtime null device
pub struct RtNullDevice {
    base: EndpointBase,
    prepared: bool,
    running: bool,
    /// Wall-clock origin of the current run
    started_at: Option<Instant>,
    /// Frames moved since `started_at`
    frames_done: u64,
    /// Frames queued by writes before the device was started
    prefill: u64,
    stats: Arc<DeviceStats>,
}

impl RtNullDevice {
    pub fn new(label: impl Into<String>, io_mode: IoMode, channels: usize) -> Self {
        let format = AudioFormat {
            channels,
            ..AudioFormat::default()
        };
        Self {
            base: EndpointBase::new(label, io_mode, format),
            prepared: false,
            running: false,
            started_at: None,
            frames_done: 0,
            prefill: 0,
            stats: Arc::new(DeviceStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<DeviceStats> {
        Arc::clone(&self.stats)
    }

    fn period(&self) -> Duration {
        let rate = self.base.engine_rate().max(1) as f64;
        Duration::from_secs_f64(self.base.buffersize() as f64 / rate)
    }

    /// Wall-clock frames elapsed since start
    fn elapsed_frames(&self) -> f64 {
        match self.started_at {
            Some(t) => t.elapsed().as_secs_f64() * self.base.engine_rate() as f64,
            None => 0.0,
        }
    }

    fn declare_xrun(&mut self, what: &str) -> EndpointError {
        self.stats.xruns.fetch_add(1, Ordering::Relaxed);
        log::info!("rtnull: {} on '{}'", what, self.base.label());
        self.started_at = Some(Instant::now());
        self.frames_done = 0;
        self.prefill = 0;
        EndpointError::Xrun(self.base.label().to_string())
    }
}

impl AudioEndpoint for RtNullDevice {
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
            realtime: true,
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
        self.running = false;
        self.prepared = false;
        self.base.set_open(false);
    }

    fn is_open(&self) -> bool {
        self.base.is_open()
    }

    fn read_buffer(&mut self, buffer: &mut SampleBuffer) -> EndpointResult<()> {
        self.base.ensure_open()?;
        self.base.ensure_readable()?;
        let frames = self.base.buffersize();
        buffer.set_channel_count(self.base.format().channels);
        buffer.set_sample_rate(self.base.engine_rate());
        buffer.silence_frames(frames);
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        self.base.advance(frames);

        if !self.running {
            return Ok(());
        }

        // a block is available once the device has recorded it
        self.frames_done += frames as u64;
        let behind = self.elapsed_frames() - self.frames_done as f64;
        if behind > XRUN_PERIODS * frames as f64 {
            return Err(self.declare_xrun("overrun"));
        }
        if behind < 0.0 {
            let rate = self.base.engine_rate().max(1) as f64;
            thread::sleep(Duration::from_secs_f64(-behind / rate));
        }
        Ok(())
    }

    fn write_buffer(&mut self, buffer: &mut SampleBuffer) -> EndpointResult<()> {
        self.base.ensure_open()?;
        self.base.ensure_writable()?;
        let frames = buffer.len() as u64;
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        self.base.advance(buffer.len());

        if !self.running {
            self.prefill += frames;
            return Ok(());
        }

        self.frames_done += frames;
        let queued = (self.prefill + self.frames_done) as f64 - self.elapsed_frames();
        if queued < 0.0 {
            return Err(self.declare_xrun("underrun"));
        }
        let limit = XRUN_PERIODS * self.base.buffersize() as f64;
        if queued > limit {
            let rate = self.base.engine_rate().max(1) as f64;
            thread::sleep(Duration::from_secs_f64((queued - limit) / rate));
        }
        Ok(())
    }

    fn position(&self) -> SamplePos {
        self.base.position()
    }

    fn seek(&mut self, _position: SamplePos) -> EndpointResult<()> {
        Err(EndpointError::NotSeekable(self.base.label().to_string()))
    }

    fn finished(&self) -> bool {
        false
    }

    fn prepare(&mut self) -> EndpointResult<()> {
        self.base.ensure_open()?;
        self.prepared = true;
        self.frames_done = 0;
        Ok(())
    }

    fn start(&mut self) -> EndpointResult<()> {
        if !self.prepared {
            self.prepare()?;
        }
        if self.stats.starts.fetch_add(1, Ordering::Relaxed) == 0 {
            let writes = self.stats.writes.load(Ordering::Relaxed);
            self.stats.writes_before_start.store(writes, Ordering::Relaxed);
        }
        self.running = true;
        self.started_at = Some(Instant::now());
        self.frames_done = 0;
        log::debug!("rtnull: started '{}' (period {:?})", self.base.label(), self.period());
        Ok(())
    }

    fn stop(&mut self) -> EndpointResult<()> {
        if self.running {
            self.stats.stops.fetch_add(1, Ordering::Relaxed);
        }
        self.running = false;
        self.prepared = false;
        self.started_at = None;
        self.prefill = 0;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn latency(&self) -> usize {
        self.base.buffersize()
    }
}
